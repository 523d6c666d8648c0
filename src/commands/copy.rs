//! Copy command implementation

use std::fs;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use indicatif::{ProgressBar, ProgressStyle};
use rdaplink_core::transfer::{ConnectionControl, FileHandle, TransferManager};
use rdaplink_dummy::host::{self, CopyOptions};

use super::{build_probe, load_board, short_name, show_file, write_drive, CliError, CopyArgs};
use crate::cli::DumpRegion;

/// Copy `args.input` onto the emulated drive and report the outcome
pub fn run(args: &CopyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let board = load_board(&args.board)?;
    let data = fs::read(&args.input)?;

    let file_name = match &args.name {
        Some(name) => name.clone(),
        None => args
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let name = short_name(&file_name)?;

    let connection = ConnectionControl::<NoopRawMutex>::new(board.config.delays);
    let mut manager = TransferManager::new(&connection, board.settings);
    let mut probe = build_probe(&board, args.board.button);
    manager.init(&mut probe, true);

    let options = CopyOptions {
        name,
        handle: FileHandle(1),
        start_sector: args.start_sector,
        sectors_per_write: args.sectors_per_write,
        stop_after: args.stop_after,
        ..Default::default()
    };

    println!("Copying {} ({} bytes) as {}", args.input.display(), data.len(), name);
    let pb = ProgressBar::new(data.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    let report = host::copy_file(&mut manager, &mut probe, &data, &options, |n| {
        pb.set_position(n)
    });
    pb.finish_and_clear();

    println!(
        "{} sectors written, {} ms simulated, drive {}",
        report.sectors_written,
        report.elapsed_ms,
        if report.remounted {
            "remounted"
        } else {
            "not remounted"
        }
    );
    if let Some(record) = manager.assertion() {
        log::warn!("assertion recorded at {}:{}", record.file, record.line);
    }

    if let Some(dir) = &args.drive {
        write_drive(dir, probe.drive())?;
    }

    if let Some(path) = &args.dump {
        let flash = match args.dump_region {
            DumpRegion::Target => probe.target(),
            DumpRegion::Iap => probe.iap(),
        };
        fs::write(path, flash.data())?;
        println!(
            "Dumped {} bytes of {:?} flash to {}",
            flash.data().len(),
            args.dump_region,
            path.display()
        );
    }

    match report.status {
        Ok(()) => {
            println!("Transfer finished successfully");
            Ok(())
        }
        Err(e) => {
            show_file(probe.drive(), "FAIL.TXT");
            show_file(probe.drive(), "ASSERT.TXT");
            Err(CliError::TransferFailed(e).into())
        }
    }
}
