//! Identify command implementation

use std::fs;
use std::path::Path;

use rdaplink_core::stream::{self, StreamDispatcher, WriteStatus};

use super::{build_probe, load_board};
use crate::cli::BoardArgs;

/// Classify `input` the way the probe would when it is copied
pub fn run(args: &BoardArgs, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let board = load_board(args)?;
    let data = fs::read(input)?;
    let mut probe = build_probe(&board, args.button);

    let sector_size = board.config.drive.sector_size as usize;
    let prefix = &data[..data.len().min(sector_size)];
    let Some(kind) = stream::identify(&probe, prefix) else {
        println!("{}: not a recognized image, the copy would be ignored", input.display());
        return Ok(());
    };
    println!("Stream:  {:?}", kind);

    let mut streams = StreamDispatcher::new();
    streams.open(&probe, kind)?;
    let written = streams.write(&mut probe, &data);
    let target = streams.target();
    let closed = streams.close(&mut probe);

    match target {
        Some(target) => {
            println!("Image:   {:?}", target.image);
            println!("Region:  {:?}", target.region);
            println!("Base:    0x{:08X}", target.base);
        }
        None => println!("Image:   not enough data to classify"),
    }

    match written.and_then(|status| closed.map(|()| status)) {
        Ok(WriteStatus::Continue) => println!("Result:  incomplete, more data expected"),
        Ok(_) => println!("Result:  complete"),
        Err(e) => println!("Result:  {} ({})", e, e.kind()),
    }
    Ok(())
}
