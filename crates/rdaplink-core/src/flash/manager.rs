//! Sector-aligned flash write buffer
//!
//! Image data arrives in pieces no larger than a disk sector, while flash
//! hardware wants whole, aligned pages. The manager stages data for one
//! program block at a time and hands complete blocks to the driver.

use core::cmp::min;

use super::{round_down, FlashDriver};
use crate::error::{Error, Result};

/// Size of the staging buffer in bytes
pub const BUFFER_SIZE: usize = 1024;

/// Value of erased flash bytes
const ERASED: u8 = 0xFF;

#[repr(C, align(4))]
struct StagingBuffer([u8; BUFFER_SIZE]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    Error,
}

/// Address range `[addr, addr + size)`
#[derive(Debug, Clone, Copy, Default)]
struct Span {
    addr: u32,
    size: u32,
}

impl Span {
    fn end(&self) -> u64 {
        self.addr as u64 + self.size as u64
    }

    fn contains(&self, addr: u32) -> bool {
        self.size != 0 && addr >= self.addr && (addr as u64) < self.end()
    }
}

/// Buffers image data and programs it block by block
///
/// Lifecycle: [`init`](Self::init), any number of [`data`](Self::data)
/// calls at non-decreasing addresses, then [`uninit`](Self::uninit).
pub struct FlashManager {
    state: State,
    buf: StagingBuffer,
    sector: Span,
    block: Span,
    dirty: bool,
    next_addr: Option<u32>,
}

impl Default for FlashManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashManager {
    /// Create a closed manager
    pub const fn new() -> Self {
        Self {
            state: State::Closed,
            buf: StagingBuffer([ERASED; BUFFER_SIZE]),
            sector: Span { addr: 0, size: 0 },
            block: Span { addr: 0, size: 0 },
            dirty: false,
            next_addr: None,
        }
    }

    /// Whether `init` succeeded and `uninit` has not been called yet
    pub fn is_open(&self) -> bool {
        self.state != State::Closed
    }

    /// Initialize the driver and erase the whole region
    pub fn init(&mut self, driver: &mut dyn FlashDriver) -> Result<()> {
        if self.state != State::Closed {
            return Err(Error::internal());
        }

        driver.init()?;
        if let Err(e) = driver.erase_chip() {
            log::debug!("chip erase failed: {}", e);
            let _ = driver.uninit();
            return Err(e);
        }

        self.sector = Span::default();
        self.block = Span::default();
        self.dirty = false;
        self.next_addr = None;
        self.state = State::Open;
        log::trace!("flash manager open");
        Ok(())
    }

    /// Stage `data` for programming at `addr`
    ///
    /// Addresses must never go backwards across calls. Full blocks are
    /// programmed as soon as they are complete.
    pub fn data(&mut self, driver: &mut dyn FlashDriver, addr: u32, data: &[u8]) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::internal());
        }
        if self.next_addr.is_some_and(|next| addr < next) {
            self.state = State::Error;
            return Err(Error::internal());
        }
        let Some(end) = u32::try_from(data.len())
            .ok()
            .and_then(|len| addr.checked_add(len))
        else {
            self.state = State::Error;
            return Err(Error::internal());
        };

        let mut addr = addr;
        let mut data = data;
        while !data.is_empty() {
            if !self.block.contains(addr) {
                self.flush(driver)?;
                self.seek(driver, addr)?;
            }

            let offset = (addr - self.block.addr) as usize;
            let count = min(data.len(), self.block.size as usize - offset);
            self.buf.0[offset..offset + count].copy_from_slice(&data[..count]);
            self.dirty = true;
            addr += count as u32;
            data = &data[count..];

            if addr as u64 == self.block.end() {
                self.flush(driver)?;
            }
        }

        self.next_addr = Some(end);
        Ok(())
    }

    /// Flush the partial block and release the driver
    ///
    /// The driver is released even when the flush fails; its own error
    /// takes priority over the flush error.
    pub fn uninit(&mut self, driver: &mut dyn FlashDriver) -> Result<()> {
        if self.state == State::Closed {
            return Err(Error::internal());
        }

        let flushed = if self.state == State::Open {
            self.flush(driver)
        } else {
            Ok(())
        };
        let released = driver.uninit();
        self.state = State::Closed;
        log::trace!("flash manager closed");

        released.and(flushed)
    }

    fn flush(&mut self, driver: &mut dyn FlashDriver) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let size = self.block.size as usize;
        log::trace!("program 0x{:08X} ({} bytes)", self.block.addr, size);
        if let Err(e) = driver.program_page(self.block.addr, &self.buf.0[..size]) {
            self.state = State::Error;
            return Err(e);
        }
        self.dirty = false;
        Ok(())
    }

    /// Point the staging block at the block containing `addr`
    fn seek(&mut self, driver: &mut dyn FlashDriver, addr: u32) -> Result<()> {
        if !self.sector.contains(addr) {
            self.setup_sector(driver, addr)?;
        }

        let block_size = min(self.sector.size, BUFFER_SIZE as u32);
        let block_addr = self.sector.addr + round_down(addr - self.sector.addr, block_size);
        let remaining = self.sector.end() - block_addr as u64;
        self.block = Span {
            addr: block_addr,
            size: min(block_size as u64, remaining) as u32,
        };
        self.buf.0[..self.block.size as usize].fill(ERASED);
        Ok(())
    }

    fn setup_sector(&mut self, driver: &mut dyn FlashDriver, addr: u32) -> Result<()> {
        let min_prog = driver.program_page_min_size(addr);
        let sector_size = driver.erase_sector_size(addr);
        if min_prog == 0
            || sector_size == 0
            || BUFFER_SIZE as u32 % min_prog != 0
            || sector_size % min_prog != 0
        {
            log::error!(
                "unusable flash geometry at 0x{:08X}: page {} sector {}",
                addr,
                min_prog,
                sector_size
            );
            self.state = State::Error;
            return Err(Error::internal());
        }

        self.sector = Span {
            addr: round_down(addr, sector_size),
            size: sector_size,
        };
        log::trace!(
            "sector 0x{:08X} size {} page {}",
            self.sector.addr,
            sector_size,
            min_prog
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FlashOp, MockFlash};
    use std::vec;
    use std::vec::Vec;

    fn open(flash: &mut MockFlash) -> FlashManager {
        let mut mgr = FlashManager::new();
        mgr.init(flash).unwrap();
        mgr
    }

    #[test]
    fn test_init_erases_chip() {
        let mut flash = MockFlash::new(0, 0x4000, 256, 1024);
        let mut mgr = open(&mut flash);
        assert_eq!(flash.ops, vec![FlashOp::Init, FlashOp::EraseChip]);
        mgr.uninit(&mut flash).unwrap();
        assert_eq!(flash.ops.last(), Some(&FlashOp::Uninit));
    }

    #[test]
    fn test_erase_failure_releases_driver() {
        let mut flash = MockFlash::new(0, 0x4000, 256, 1024);
        flash.fail_erase = true;
        let mut mgr = FlashManager::new();
        assert_eq!(mgr.init(&mut flash), Err(Error::EraseAll));
        assert_eq!(flash.ops.last(), Some(&FlashOp::Uninit));
        assert!(!mgr.is_open());
    }

    #[test]
    fn test_half_pages_make_one_program() {
        let mut flash = MockFlash::new(0, 0x4000, 1024, 1024);
        let mut mgr = open(&mut flash);
        mgr.data(&mut flash, 0, &[0x11; 512]).unwrap();
        assert!(flash.programs().is_empty());
        mgr.data(&mut flash, 512, &[0x22; 512]).unwrap();
        mgr.uninit(&mut flash).unwrap();
        assert_eq!(flash.programs(), vec![(0, 1024)]);
        assert_eq!(flash.read(0, 512), &[0x11; 512][..]);
        assert_eq!(flash.read(512, 512), &[0x22; 512][..]);
    }

    #[test]
    fn test_programs_cover_every_byte_once() {
        let mut flash = MockFlash::new(0x1000, 0x8000, 256, 4096);
        let mut mgr = open(&mut flash);
        let image: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        for (i, chunk) in image.chunks(300).enumerate() {
            mgr.data(&mut flash, 0x1000 + (i * 300) as u32, chunk).unwrap();
        }
        mgr.uninit(&mut flash).unwrap();

        let programs = flash.programs();
        let mut expected = 0x1000;
        for (addr, len) in &programs {
            assert_eq!(*addr, expected);
            assert_eq!(*len, 1024);
            expected += 1024;
        }
        assert_eq!(expected, 0x1000 + 5 * 1024);
        assert_eq!(flash.read(0x1000, image.len()), &image[..]);
    }

    #[test]
    fn test_gap_skips_clean_blocks() {
        let mut flash = MockFlash::new(0, 0x10000, 256, 4096);
        let mut mgr = open(&mut flash);
        mgr.data(&mut flash, 0x10, &[1; 16]).unwrap();
        mgr.data(&mut flash, 0x2F00, &[2; 16]).unwrap();
        mgr.uninit(&mut flash).unwrap();
        assert_eq!(flash.programs(), vec![(0, 1024), (0x2C00, 1024)]);
        assert_eq!(flash.read(0x2F00, 16), &[2; 16][..]);
        assert_eq!(flash.read(0x2F10, 16), &[0xFF; 16][..]);
    }

    #[test]
    fn test_geometry_changes_between_sectors() {
        let mut flash = MockFlash::new(0, 0x20000, 256, 512);
        flash.large_sectors_from = Some((0x1000, 0x2000));
        let mut mgr = open(&mut flash);
        mgr.data(&mut flash, 0x0E00, &[3; 0x400]).unwrap();
        mgr.uninit(&mut flash).unwrap();
        assert_eq!(flash.programs(), vec![(0x0E00, 512), (0x1000, 1024)]);
    }

    #[test]
    fn test_backward_address_is_fatal() {
        let mut flash = MockFlash::new(0, 0x4000, 256, 1024);
        let mut mgr = open(&mut flash);
        mgr.data(&mut flash, 0x100, &[0; 16]).unwrap();
        assert!(matches!(
            mgr.data(&mut flash, 0x80, &[0; 16]),
            Err(Error::Internal(_))
        ));
        assert!(matches!(
            mgr.data(&mut flash, 0x200, &[0; 16]),
            Err(Error::Internal(_))
        ));
        // Nothing staged is flushed once the manager has failed
        mgr.uninit(&mut flash).unwrap();
        assert!(flash.programs().is_empty());
    }

    #[test]
    fn test_uninit_error_takes_priority() {
        let mut flash = MockFlash::new(0, 0x4000, 256, 1024);
        let mut mgr = open(&mut flash);
        mgr.data(&mut flash, 0, &[0; 16]).unwrap();
        flash.fail_program = true;
        flash.fail_uninit = true;
        assert_eq!(mgr.uninit(&mut flash), Err(Error::Failure));
        assert_eq!(flash.ops.last(), Some(&FlashOp::Uninit));
    }

    #[test]
    fn test_flush_error_surfaces() {
        let mut flash = MockFlash::new(0, 0x4000, 256, 1024);
        let mut mgr = open(&mut flash);
        flash.fail_program = true;
        assert_eq!(mgr.data(&mut flash, 0, &[0; 1024]), Err(Error::Write));
        assert!(matches!(
            mgr.data(&mut flash, 1024, &[0; 16]),
            Err(Error::Internal(_))
        ));
        assert_eq!(mgr.uninit(&mut flash), Ok(()));
    }

    #[test]
    fn test_bad_geometry_rejected() {
        let mut flash = MockFlash::new(0, 0x4000, 384, 1152);
        let mut mgr = open(&mut flash);
        assert!(matches!(
            mgr.data(&mut flash, 0, &[0; 16]),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_calls_outside_lifecycle_are_fatal() {
        let mut flash = MockFlash::new(0, 0x4000, 256, 1024);
        let mut mgr = FlashManager::new();
        assert!(matches!(
            mgr.data(&mut flash, 0, &[0; 4]),
            Err(Error::Internal(_))
        ));
        assert!(matches!(mgr.uninit(&mut flash), Err(Error::Internal(_))));
        mgr.init(&mut flash).unwrap();
        assert!(matches!(mgr.init(&mut flash), Err(Error::Internal(_))));
    }
}
