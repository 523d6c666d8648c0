//! rdaplink - Drag-and-drop firmware update simulator
//!
//! Runs the probe side of a USB drag-and-drop update on the host: a board
//! description provides the flash layout, the flash regions and the drive
//! are emulated in memory, and the copy is played the way an operating
//! system would perform it.
//!
//! # Architecture
//!
//! - `rdaplink-core` holds the update pipeline (stream detection, image
//!   decoding, flash buffering, the transfer state machine)
//! - `rdaplink-dummy` emulates the flash regions and the drive
//! - this binary loads the board description, drives a copy and writes
//!   the files the drive shows afterwards to a directory

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::CopyArgs;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Copy {
            board,
            input,
            drive,
            name,
            start_sector,
            sectors_per_write,
            stop_after,
            dump,
            dump_region,
        } => commands::copy::run(&CopyArgs {
            board,
            input,
            drive,
            name,
            start_sector,
            sectors_per_write,
            stop_after,
            dump,
            dump_region,
        }),
        Commands::Identify { board, input } => commands::identify::run(&board, &input),
        Commands::Touch { board, name, drive } => {
            commands::touch::run(&board, &name, drive.as_deref())
        }
    }
}
