//! Board flash-region configuration
//!
//! Describes where the probe's own firmware lives, what the attached
//! target looks like, and how the emulated drive is laid out. Boards
//! expose it together with their flash drivers through [`Board`].

use crate::flash::{FlashDriver, FlashRegion};
use crate::image;
use crate::transfer::ConnectionDelays;

/// Which firmware the probe is currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
pub enum ProbeMode {
    /// Interface firmware (normal operation)
    Interface,
    /// Bootloader (maintenance mode)
    Bootloader,
}

/// A contiguous flash or RAM range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryRange {
    /// First address
    pub start: u32,
    /// Size in bytes
    pub size: u32,
}

impl MemoryRange {
    /// Create a new range
    pub const fn new(start: u32, size: u32) -> Self {
        Self { start, size }
    }

    /// Exclusive end address
    pub fn end(&self) -> u64 {
        self.start as u64 + self.size as u64
    }

    /// Check whether `addr` lies inside the range
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && (addr as u64) < self.end()
    }
}

/// The device behind the debug port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetConfig {
    /// Program flash of the target
    pub flash: MemoryRange,
    /// RAM of the target (initial stack pointer must point here)
    pub ram: MemoryRange,
}

/// Geometry of the emulated drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveGeometry {
    /// Disk sector size
    pub sector_size: u32,
    /// FAT cluster size
    pub cluster_size: u32,
}

impl Default for DriveGeometry {
    fn default() -> Self {
        Self {
            sector_size: 512,
            cluster_size: 4096,
        }
    }
}

/// Everything the update pipeline needs to know about a board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Firmware currently running
    pub mode: ProbeMode,
    /// Hardware development kit id stamped into the probe's own images
    pub hdk_id: u32,
    /// Interface firmware region
    pub interface: MemoryRange,
    /// Bootloader region
    pub bootloader: MemoryRange,
    /// Target device, if this probe can program one
    pub target: Option<TargetConfig>,
    /// Board id selecting Universal Hex blocks
    pub board_id: Option<u16>,
    /// Drive layout
    pub drive: DriveGeometry,
    /// Remount timing
    pub delays: ConnectionDelays,
}

/// Flash access and configuration supplied by the board
pub trait Board {
    /// Board configuration
    fn config(&self) -> &ProbeConfig;

    /// Driver for the given region
    fn flash(&mut self, region: FlashRegion) -> &mut dyn FlashDriver;

    /// Check whether `prefix` starts with a plausible vector table for the
    /// target
    fn validate_bin_nvic(&self, prefix: &[u8]) -> bool {
        self.config()
            .target
            .as_ref()
            .is_some_and(|target| image::validate_bin_nvic(target, prefix))
    }
}
