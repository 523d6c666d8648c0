//! Touch command implementation

use std::path::Path;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use rdaplink_core::transfer::{
    ConnectionControl, DriveCommand, FileChange, FileHandle, FileInfo, TransferManager,
};
use rdaplink_dummy::host;

use super::{build_probe, load_board, short_name, show_file, write_drive};
use crate::cli::BoardArgs;

/// Simulated time allowed for the remount after a command
const SETTLE_MS: u32 = 10_000;
const TICK_MS: u32 = 10;

/// Create `name` on the drive and show the resulting settings
pub fn run(args: &BoardArgs, name: &str, drive: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let board = load_board(args)?;
    let name = short_name(name)?;

    match DriveCommand::from_name(&name, board.config.mode) {
        Some(command) => println!("{} is the {:?} command", name, command),
        None => println!("{} is not a command file in {:?} mode", name, board.config.mode),
    }

    let connection = ConnectionControl::<NoopRawMutex>::new(board.config.delays);
    let mut manager = TransferManager::new(&connection, board.settings);
    let mut probe = build_probe(&board, args.button);
    manager.init(&mut probe, true);

    manager.file_change(&mut probe, &name, FileChange::Created, FileHandle(1), FileInfo::default());
    let rebuilds = probe.drive().rebuilds();
    let mut idle = 0;
    while idle < SETTLE_MS && probe.drive().rebuilds() == rebuilds {
        manager.periodic(&mut probe, TICK_MS);
        idle += TICK_MS;
    }
    if probe.drive().rebuilds() == rebuilds {
        log::warn!("drive was not remounted");
    }
    if host::wait_for_media(&mut manager, &mut probe, TICK_MS, SETTLE_MS).is_none() {
        log::warn!("drive did not come back");
    }

    let settings = manager.settings();
    println!("auto reset:         {}", settings.auto_reset);
    println!("automation allowed: {}", settings.automation_allowed);
    println!("hold in bootloader: {}", settings.hold_in_bootloader);
    if probe.drive().resets() > 0 {
        println!("probe would reset");
    }
    if let Err(e) = manager.status() {
        println!("status:             {}", e);
    }
    show_file(probe.drive(), "ASSERT.TXT");

    if let Some(dir) = drive {
        write_drive(dir, probe.drive())?;
    }
    Ok(())
}
