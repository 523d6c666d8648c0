//! rdaplink-core - Drag-and-drop firmware update pipeline for debug probes
//!
//! A probe that exposes a USB mass-storage drive lets users program a
//! target by copying a firmware file onto it. This crate turns the raw
//! sector writes the host makes into flash operations: it classifies the
//! file, decodes binary and Intel-Hex images, programs the right flash
//! region, decides when the transfer is over, and renders the status files
//! the drive shows after it remounts.
//!
//! It is `no_std` compatible; the board supplies flash drivers through
//! [`board::Board`] and the drive through [`transfer::Drive`].
//!
//! # Features
//!
//! - `std` - Enable standard library support, TOML board descriptions
//!   and `std::error::Error` impls
//!
//! # Example
//!
//! ```ignore
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
//! use rdaplink_core::transfer::{ConnectionControl, ConnectionDelays, Settings, TransferManager};
//!
//! static CONNECTION: ConnectionControl<CriticalSectionRawMutex> =
//!     ConnectionControl::new(ConnectionDelays::DEFAULT);
//!
//! let mut manager = TransferManager::new(&CONNECTION, Settings::default());
//! manager.init(&mut probe, true);
//!
//! // USB thread
//! manager.sector_write(&mut probe, sector, &data);
//! // 10 ms timer
//! manager.periodic(&mut probe, 10);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod board;
#[cfg(feature = "std")]
pub mod config;
pub mod diag;
pub mod error;
pub mod flash;
pub mod hex;
pub mod image;
pub mod stream;
pub mod transfer;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
