//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "rdaplink")]
#[command(author, version, about = "Drag-and-drop firmware update simulator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Board description shared across commands
#[derive(clap::Args, Debug, Clone)]
pub struct BoardArgs {
    /// Board description file (TOML format)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Hold the reset button down
    #[arg(long)]
    pub button: bool,
}

/// Flash region to dump
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpRegion {
    /// Flash of the target device
    Target,
    /// The probe's own update region
    Iap,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy a firmware image onto the emulated drive
    Copy {
        #[command(flatten)]
        board: BoardArgs,

        /// Image file to copy
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving the drive's files after the remount
        #[arg(short, long)]
        drive: Option<PathBuf>,

        /// 8.3 name on the drive (defaults to the input file name)
        #[arg(long)]
        name: Option<String>,

        /// First data sector of the file
        #[arg(long, default_value = "64", value_parser = parse_hex_u32)]
        start_sector: u32,

        /// Sectors per host write request
        #[arg(long, default_value = "8")]
        sectors_per_write: u32,

        /// Stop copying after this many sectors, as if the host gave up
        #[arg(long)]
        stop_after: Option<u32>,

        /// Write the emulated flash to a file afterwards
        #[arg(long)]
        dump: Option<PathBuf>,

        /// Region written by --dump
        #[arg(long, value_enum, default_value = "target")]
        dump_region: DumpRegion,
    },

    /// Show how an image would be classified and where it would go
    Identify {
        #[command(flatten)]
        board: BoardArgs,

        /// Image file to inspect
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Create a command file (e.g. ERASE.ACT) on the emulated drive
    Touch {
        #[command(flatten)]
        board: BoardArgs,

        /// 8.3 file name
        name: String,

        /// Directory receiving the drive's files after the remount
        #[arg(short, long)]
        drive: Option<PathBuf>,
    },
}
