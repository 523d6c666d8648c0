//! CLI command implementations
//!
//! Every command loads a board description, builds an emulated probe from
//! it and talks to the probe through the same `TransferManager` calls the
//! USB stack makes on hardware.

pub mod copy;
pub mod identify;
pub mod touch;

use std::fs;
use std::path::{Path, PathBuf};

use rdaplink_core::board::MemoryRange;
use rdaplink_core::config::BoardFile;
use rdaplink_core::transfer::{ShortName, ASSERT_TXT, FAIL_TXT};
use rdaplink_dummy::{DummyConfig, DummyDrive, DummyProbe};
use thiserror::Error;

use crate::cli::{BoardArgs, DumpRegion};

/// Errors reported by the commands themselves
#[derive(Debug, Error)]
pub enum CliError {
    /// Name cannot be stored in a directory entry
    #[error("'{0}' is not a valid 8.3 file name")]
    InvalidName(String),

    /// The probe reported a failed transfer
    #[error("transfer failed: {0}")]
    TransferFailed(rdaplink_core::Error),
}

/// Arguments of the `copy` command
pub struct CopyArgs {
    pub board: BoardArgs,
    pub input: PathBuf,
    pub drive: Option<PathBuf>,
    pub name: Option<String>,
    pub start_sector: u32,
    pub sectors_per_write: u32,
    pub stop_after: Option<u32>,
    pub dump: Option<PathBuf>,
    pub dump_region: DumpRegion,
}

/// Load the board description named on the command line
fn load_board(args: &BoardArgs) -> Result<BoardFile, Box<dyn std::error::Error>> {
    let board = BoardFile::from_toml_file(&args.config)?;
    log::info!(
        "Loaded board from {:?} ({:?} mode, HDK {})",
        args.config,
        board.config.mode,
        board.details.hdk_id
    );
    Ok(board)
}

/// Build an erased emulated probe for `board`
fn build_probe<'a>(board: &'a BoardFile, button: bool) -> DummyProbe<'a> {
    let target_range = board
        .config
        .target
        .map(|t| t.flash)
        .unwrap_or(MemoryRange::new(0, 0));
    let target = DummyConfig::for_range(
        target_range,
        board.target_flash.page_size,
        board.target_flash.sector_size,
    );
    let iap = DummyConfig::for_range(
        DummyProbe::update_region(&board.config),
        board.iap_flash.page_size,
        board.iap_flash.sector_size,
    );

    let mut probe = DummyProbe::new(board.config.clone(), target, iap).with_info(board.info());
    probe.drive_mut().set_button(button);
    probe
}

/// Convert a file name to a directory entry name
fn short_name(name: &str) -> Result<ShortName, CliError> {
    ShortName::from_8_3(name).ok_or_else(|| CliError::InvalidName(name.to_string()))
}

/// Mirror the generated drive files into `dir`
fn write_drive(dir: &Path, drive: &DummyDrive) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;

    for stale in [FAIL_TXT, ASSERT_TXT] {
        let name = stale.to_string();
        let path = dir.join(&name);
        if !drive.files().contains_key(&name) && path.exists() {
            fs::remove_file(&path)?;
        }
    }
    for (name, text) in drive.files() {
        fs::write(dir.join(name), text)?;
        log::debug!("wrote {}", name);
    }
    println!("Drive contents written to {}", dir.display());
    Ok(())
}

/// Print a status file to the console
fn show_file(drive: &DummyDrive, name: &str) {
    if let Some(text) = drive.file(name) {
        println!("--- {} ---", name);
        print!("{}", text.replace("\r\n", "\n"));
    }
}
