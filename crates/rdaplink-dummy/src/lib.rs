//! rdaplink-dummy - In-memory probe emulator for testing
//!
//! This crate emulates the flash regions and the mass-storage drive of a
//! debug probe in memory, so the drag-and-drop pipeline can be exercised
//! without hardware. [`host`] plays the part of the host computer.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
pub mod host;
#[cfg(feature = "alloc")]
mod probe;

#[cfg(feature = "alloc")]
pub use probe::{DummyDrive, DummyProbe};

#[cfg(feature = "alloc")]
use alloc::vec;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use rdaplink_core::board::MemoryRange;
use rdaplink_core::error::{Error, Result};
use rdaplink_core::flash::{FlashDriver, FlashRegion};

/// Configuration for one emulated flash region
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Address of the first byte
    pub base: u32,
    /// Region size in bytes
    pub size: usize,
    /// Program granularity
    pub page_size: u32,
    /// Erase granularity
    pub sector_size: u32,
    /// Which region the driver stands in for; selects the errors it reports
    pub region: FlashRegion,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            base: 0,
            size: 512 * 1024,
            page_size: 256,
            sector_size: 4096,
            region: FlashRegion::Target,
        }
    }
}

impl DummyConfig {
    /// Emulate `range` with the given geometry
    pub fn for_range(range: MemoryRange, page_size: u32, sector_size: u32) -> Self {
        Self {
            base: range.start,
            size: range.size as usize,
            page_size,
            sector_size,
            region: FlashRegion::Target,
        }
    }
}

/// A driver call that reached the emulated flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// `init`
    Init,
    /// `uninit`
    Uninit,
    /// `erase_chip`
    EraseChip,
    /// `erase_sector` at an address
    EraseSector(u32),
    /// `program_page` at an address with a length
    Program(u32, usize),
}

/// Driver call to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail `init`
    Init,
    /// Fail `uninit`
    Uninit,
    /// Fail every erase
    Erase,
    /// Fail program calls once this many have succeeded
    ProgramAfter(usize),
}

/// Driver step a failure is reported for
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, Copy)]
enum Step {
    Init,
    Uninit,
    EraseChip,
    EraseSector,
    Program,
    Verify,
}

/// Dummy flash region
///
/// Behaves like NOR flash: erase sets bytes to 0xFF and programming can
/// only clear bits. A program that would need to set a bit fails its
/// verify. Every successful driver call is logged.
#[cfg(feature = "alloc")]
pub struct DummyFlash {
    config: DummyConfig,
    data: Vec<u8>,
    ops: Vec<FlashOp>,
    initialized: bool,
    fault: Option<Fault>,
}

#[cfg(feature = "alloc")]
impl DummyFlash {
    /// Create an erased region with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            config,
            data,
            ops: Vec::new(),
            initialized: false,
            fault: None,
        }
    }

    /// Create a region with pre-filled data
    pub fn with_data(config: DummyConfig, initial_data: &[u8]) -> Self {
        let mut flash = Self::new(config);
        let len = core::cmp::min(initial_data.len(), flash.data.len());
        flash.data[..len].copy_from_slice(&initial_data[..len]);
        flash
    }

    /// Get a reference to the flash data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes at `addr`, if the whole range lies in the region
    pub fn read(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let offset = addr.checked_sub(self.config.base)? as usize;
        self.data.get(offset..offset.checked_add(len)?)
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Driver calls so far
    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    /// Program calls so far as `(addr, len)`
    pub fn programs(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.ops.iter().filter_map(|op| match op {
            FlashOp::Program(addr, len) => Some((*addr, *len)),
            _ => None,
        })
    }

    /// Forget the operation log
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Make a driver call fail
    pub fn inject(&mut self, fault: Option<Fault>) {
        self.fault = fault;
    }

    /// Error the driver for this region reports when `step` fails
    fn error(&self, step: Step) -> Error {
        match (self.config.region, step) {
            (FlashRegion::Target, Step::Init) => Error::TargetInit,
            (FlashRegion::Target, Step::Uninit) => Error::Failure,
            (FlashRegion::Target, Step::EraseChip) => Error::EraseAll,
            (FlashRegion::Target, Step::EraseSector) => Error::EraseSector,
            (FlashRegion::Target, Step::Program) => Error::Write,
            (FlashRegion::Target, Step::Verify) => Error::WriteVerify,
            (FlashRegion::Iap, Step::Init) => Error::IapInit,
            (FlashRegion::Iap, Step::Uninit) => Error::IapUninit,
            (FlashRegion::Iap, Step::EraseChip) => Error::IapEraseAll,
            (FlashRegion::Iap, Step::EraseSector) => Error::IapEraseSector,
            (FlashRegion::Iap, Step::Program | Step::Verify) => Error::IapWrite,
        }
    }

    /// Error for an address outside the region
    fn out_of_bounds(&self, step: Step) -> Error {
        match self.config.region {
            FlashRegion::Target => self.error(step),
            FlashRegion::Iap => Error::IapOutOfBounds,
        }
    }

    fn offset(&self, addr: u32, len: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.config.base)? as usize;
        (offset.checked_add(len)? <= self.data.len()).then_some(offset)
    }

    fn check_ready(&self) -> Result<()> {
        if !self.initialized {
            log::warn!("dummy flash used before init");
            return Err(Error::Failure);
        }
        Ok(())
    }
}

#[cfg(feature = "alloc")]
impl FlashDriver for DummyFlash {
    fn init(&mut self) -> Result<()> {
        if self.fault == Some(Fault::Init) {
            return Err(self.error(Step::Init));
        }
        self.initialized = true;
        self.ops.push(FlashOp::Init);
        Ok(())
    }

    fn uninit(&mut self) -> Result<()> {
        self.check_ready()?;
        self.initialized = false;
        if self.fault == Some(Fault::Uninit) {
            return Err(self.error(Step::Uninit));
        }
        self.ops.push(FlashOp::Uninit);
        Ok(())
    }

    fn erase_chip(&mut self) -> Result<()> {
        self.check_ready()?;
        if self.fault == Some(Fault::Erase) {
            return Err(self.error(Step::EraseChip));
        }
        self.data.fill(0xFF);
        self.ops.push(FlashOp::EraseChip);
        Ok(())
    }

    fn erase_sector(&mut self, addr: u32) -> Result<()> {
        self.check_ready()?;
        if self.fault == Some(Fault::Erase) {
            return Err(self.error(Step::EraseSector));
        }
        let sector = self.config.sector_size;
        let relative = addr
            .checked_sub(self.config.base)
            .ok_or_else(|| self.out_of_bounds(Step::EraseSector))?;
        let start = addr - relative % sector;
        let offset = self
            .offset(start, sector as usize)
            .ok_or_else(|| self.out_of_bounds(Step::EraseSector))?;
        self.data[offset..offset + sector as usize].fill(0xFF);
        self.ops.push(FlashOp::EraseSector(start));
        Ok(())
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.check_ready()?;
        if let Some(Fault::ProgramAfter(n)) = self.fault {
            if self.programs().count() >= n {
                return Err(self.error(Step::Program));
            }
        }

        let page = self.config.page_size;
        if addr % page != 0 || data.len() % page as usize != 0 {
            log::warn!("unaligned program at 0x{:08X} ({} bytes)", addr, data.len());
            return Err(self.error(Step::Program));
        }
        let offset = self
            .offset(addr, data.len())
            .ok_or_else(|| self.out_of_bounds(Step::Program))?;

        let cells = &mut self.data[offset..offset + data.len()];
        for (cell, byte) in cells.iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.ops.push(FlashOp::Program(addr, data.len()));
        if cells != data {
            log::warn!("verify failed at 0x{:08X}", addr);
            return Err(self.error(Step::Verify));
        }
        log::trace!("programmed 0x{:08X} ({} bytes)", addr, data.len());
        Ok(())
    }

    fn program_page_min_size(&self, _addr: u32) -> u32 {
        self.config.page_size
    }

    fn erase_sector_size(&self, _addr: u32) -> u32 {
        self.config.sector_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> DummyFlash {
        DummyFlash::new(DummyConfig {
            base: 0x1000,
            size: 0x2000,
            page_size: 256,
            sector_size: 1024,
            region: FlashRegion::Target,
        })
    }

    fn small_iap() -> DummyFlash {
        let mut flash = small();
        flash.config.region = FlashRegion::Iap;
        flash
    }

    #[test]
    fn test_requires_init() {
        let mut flash = small();
        assert_eq!(flash.erase_chip(), Err(Error::Failure));
        flash.init().unwrap();
        flash.erase_chip().unwrap();
        flash.uninit().unwrap();
        assert_eq!(flash.ops(), &[FlashOp::Init, FlashOp::EraseChip, FlashOp::Uninit]);
    }

    #[test]
    fn test_nor_semantics() {
        let mut flash = small();
        flash.init().unwrap();
        flash.program_page(0x1100, &[0xF0; 256]).unwrap();
        assert_eq!(
            flash.program_page(0x1100, &[0x3C; 256]),
            Err(Error::WriteVerify)
        );
        assert_eq!(flash.read(0x1100, 2), Some(&[0x30, 0x30][..]));
        flash.program_page(0x1100, &[0x10; 256]).unwrap();

        flash.erase_sector(0x1123).unwrap();
        assert_eq!(flash.read(0x1100, 2), Some(&[0xFF, 0xFF][..]));
        assert_eq!(flash.ops().last(), Some(&FlashOp::EraseSector(0x1000)));
    }

    #[test]
    fn test_rejects_bad_programs() {
        let mut flash = small();
        flash.init().unwrap();
        assert_eq!(flash.program_page(0x1080, &[0; 256]), Err(Error::Write));
        assert_eq!(flash.program_page(0x1000, &[0; 100]), Err(Error::Write));
        assert_eq!(flash.program_page(0x3000, &[0; 256]), Err(Error::Write));
        assert_eq!(flash.programs().count(), 0);
    }

    #[test]
    fn test_fault_injection() {
        let mut flash = small();
        flash.inject(Some(Fault::ProgramAfter(1)));
        flash.init().unwrap();
        flash.program_page(0x1000, &[0; 256]).unwrap();
        assert_eq!(flash.program_page(0x1100, &[0; 256]), Err(Error::Write));

        flash.inject(Some(Fault::Erase));
        assert_eq!(flash.erase_chip(), Err(Error::EraseAll));

        flash.inject(Some(Fault::Init));
        assert_eq!(flash.init(), Err(Error::TargetInit));
    }

    #[test]
    fn test_iap_region_errors() {
        let mut flash = small_iap();
        flash.inject(Some(Fault::Init));
        assert_eq!(flash.init(), Err(Error::IapInit));

        flash.inject(Some(Fault::Erase));
        flash.init().unwrap();
        assert_eq!(flash.erase_chip(), Err(Error::IapEraseAll));
        assert_eq!(flash.erase_sector(0x1000), Err(Error::IapEraseSector));

        flash.inject(None);
        assert_eq!(flash.erase_sector(0x0400), Err(Error::IapOutOfBounds));
        assert_eq!(flash.program_page(0x3000, &[0; 256]), Err(Error::IapOutOfBounds));
        assert_eq!(flash.program_page(0x1080, &[0; 256]), Err(Error::IapWrite));

        flash.program_page(0x1000, &[0; 256]).unwrap();
        assert_eq!(flash.program_page(0x1000, &[0xFF; 256]), Err(Error::IapWrite));

        flash.inject(Some(Fault::ProgramAfter(0)));
        assert_eq!(flash.program_page(0x1100, &[0; 256]), Err(Error::IapWrite));

        flash.inject(Some(Fault::Uninit));
        assert_eq!(flash.uninit(), Err(Error::IapUninit));
        assert_eq!(flash.erase_chip(), Err(Error::Failure));
    }

    #[test]
    fn test_with_data() {
        let flash = DummyFlash::with_data(DummyConfig::default(), &[1, 2, 3]);
        assert_eq!(&flash.data()[..4], &[1, 2, 3, 0xFF]);
        assert_eq!(flash.read(0x7_FFFF, 2), None);
    }
}
