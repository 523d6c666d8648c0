//! Flash driver contract and the sector-aligned write buffer
//!
//! Boards hand the pipeline one [`FlashDriver`] per flash region. The
//! [`FlashManager`] sits in front of it and turns small, disk-sector sized
//! chunks into page-aligned program operations.

mod manager;

pub use manager::{FlashManager, BUFFER_SIZE};

use crate::error::Result;

/// Flash region an image is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashRegion {
    /// Flash of the attached target device
    Target,
    /// The probe's own flash (interface or bootloader update)
    Iap,
}

/// Erase and program primitives for one flash region
///
/// All calls block until the hardware reports completion.
///
/// Implementations must keep `program_page_min_size` a divisor of
/// [`BUFFER_SIZE`] and of `erase_sector_size` at every address.
pub trait FlashDriver {
    /// Prepare the region for erase/program operations
    fn init(&mut self) -> Result<()>;

    /// Release the region
    fn uninit(&mut self) -> Result<()>;

    /// Erase the whole region
    fn erase_chip(&mut self) -> Result<()>;

    /// Erase the sector containing `addr`
    fn erase_sector(&mut self, addr: u32) -> Result<()>;

    /// Program `data` at `addr`
    ///
    /// `addr` is aligned to, and `data.len()` is a multiple of,
    /// [`FlashDriver::program_page_min_size`].
    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Minimum program granularity at `addr`
    fn program_page_min_size(&self, addr: u32) -> u32;

    /// Erase sector size at `addr`
    fn erase_sector_size(&self, addr: u32) -> u32;
}

/// Round `value` down to a multiple of `align`
pub(crate) fn round_down(value: u32, align: u32) -> u32 {
    value - value % align
}

/// Round `value` up to a multiple of `align`
pub(crate) fn round_up(value: u32, align: u32) -> u32 {
    match value.checked_rem(align) {
        None | Some(0) => value,
        Some(rem) => value.saturating_add(align - rem),
    }
}
