//! Mock board, flash and file builders shared by the unit tests

use core::fmt::Write;
use std::string::String;
use std::vec;
use std::vec::Vec;

use crate::board::{MemoryRange, ProbeConfig, ProbeMode, TargetConfig};
use crate::diag::Diagnostics;
use crate::error::{Error, Result};
use crate::flash::{FlashDriver, FlashRegion};
use crate::hex::record;
use crate::image::BUILD_INFO_OFFSET;
use crate::transfer::{ConnectionDelays, Drive, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    Init,
    Uninit,
    EraseChip,
    EraseSector(u32),
    Program(u32, usize),
}

/// RAM-backed flash with NOR semantics and an operation log
pub struct MockFlash {
    pub base: u32,
    pub page: u32,
    pub sector: u32,
    /// Sector size from the given address upward
    pub large_sectors_from: Option<(u32, u32)>,
    pub mem: Vec<u8>,
    pub ops: Vec<FlashOp>,
    pub fail_erase: bool,
    pub fail_program: bool,
    pub fail_uninit: bool,
}

impl MockFlash {
    pub fn new(base: u32, size: u32, page: u32, sector: u32) -> Self {
        Self {
            base,
            page,
            sector,
            large_sectors_from: None,
            mem: vec![0xFF; size as usize],
            ops: Vec::new(),
            fail_erase: false,
            fail_program: false,
            fail_uninit: false,
        }
    }

    pub fn programs(&self) -> Vec<(u32, usize)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                FlashOp::Program(addr, len) => Some((*addr, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn read(&self, addr: u32, len: usize) -> &[u8] {
        let offset = (addr - self.base) as usize;
        &self.mem[offset..offset + len]
    }
}

impl FlashDriver for MockFlash {
    fn init(&mut self) -> Result<()> {
        self.ops.push(FlashOp::Init);
        Ok(())
    }

    fn uninit(&mut self) -> Result<()> {
        self.ops.push(FlashOp::Uninit);
        if self.fail_uninit {
            return Err(Error::Failure);
        }
        Ok(())
    }

    fn erase_chip(&mut self) -> Result<()> {
        if self.fail_erase {
            return Err(Error::EraseAll);
        }
        self.ops.push(FlashOp::EraseChip);
        self.mem.fill(0xFF);
        Ok(())
    }

    fn erase_sector(&mut self, addr: u32) -> Result<()> {
        if self.fail_erase {
            return Err(Error::EraseSector);
        }
        self.ops.push(FlashOp::EraseSector(addr));
        let size = self.erase_sector_size(addr) as usize;
        let offset = (addr - self.base) as usize;
        self.mem[offset..offset + size].fill(0xFF);
        Ok(())
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if self.fail_program {
            return Err(Error::Write);
        }
        let page = self.program_page_min_size(addr);
        assert_eq!(addr % page, 0, "unaligned program at 0x{:X}", addr);
        assert_eq!(data.len() % page as usize, 0, "partial page at 0x{:X}", addr);
        self.ops.push(FlashOp::Program(addr, data.len()));
        let offset = (addr - self.base) as usize;
        for (cell, byte) in self.mem[offset..offset + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        Ok(())
    }

    fn program_page_min_size(&self, _addr: u32) -> u32 {
        self.page
    }

    fn erase_sector_size(&self, addr: u32) -> u32 {
        match self.large_sectors_from {
            Some((from, size)) if addr >= from => size,
            _ => self.sector,
        }
    }
}

/// What the transfer manager asked of the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveEvent {
    MediaReady(bool),
    Rebuild { fail: bool, assert: bool },
    Disconnecting(Result<()>),
}

pub struct MockProbe {
    pub config: ProbeConfig,
    pub target: MockFlash,
    pub iap: MockFlash,
    pub events: Vec<DriveEvent>,
    pub button: bool,
}

impl MockProbe {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            target: MockFlash::new(0, 0x40000, 256, 4096),
            iap: MockFlash::new(0, 0x40000, 256, 4096),
            events: Vec::new(),
            button: false,
        }
    }
}

impl crate::board::Board for MockProbe {
    fn config(&self) -> &ProbeConfig {
        &self.config
    }

    fn flash(&mut self, region: FlashRegion) -> &mut dyn FlashDriver {
        match region {
            FlashRegion::Target => &mut self.target,
            FlashRegion::Iap => &mut self.iap,
        }
    }
}

impl Drive for MockProbe {
    fn set_media_ready(&mut self, ready: bool) {
        self.events.push(DriveEvent::MediaReady(ready));
    }

    fn rebuild(&mut self, diagnostics: &Diagnostics<'_>) {
        self.events.push(DriveEvent::Rebuild {
            fail: diagnostics.fail_txt().is_some(),
            assert: diagnostics.assert_txt().is_some(),
        });
    }

    fn disconnecting(&mut self, status: Result<()>, _settings: &Settings) {
        self.events.push(DriveEvent::Disconnecting(status));
    }

    fn reset_button_pressed(&self) -> bool {
        self.button
    }
}

pub fn test_config() -> ProbeConfig {
    ProbeConfig {
        mode: ProbeMode::Interface,
        hdk_id: 0x0000_0240,
        bootloader: MemoryRange::new(0, 0x8000),
        interface: MemoryRange::new(0x8000, 0x38000),
        target: Some(TargetConfig {
            flash: MemoryRange::new(0, 0x40000),
            ram: MemoryRange::new(0x2000_0000, 0x8000),
        }),
        board_id: Some(0x9903),
        drive: Default::default(),
        delays: ConnectionDelays::default(),
    }
}

/// A probe firmware image carrying the given build record
pub fn build_image(key: u32, hdk_id: u32, len: usize) -> Vec<u8> {
    let mut image: Vec<u8> = (0..len).map(|i| (i * 13 + 5) as u8).collect();
    let record = [key, hdk_id, 0x0000_0100];
    for (i, word) in record.iter().enumerate() {
        let at = BUILD_INFO_OFFSET + 4 * i;
        image[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }
    image
}

/// A target image with a plausible vector table
pub fn nvic_image(target: &TargetConfig, len: usize) -> Vec<u8> {
    let mut image: Vec<u8> = (0..len).map(|i| (i * 31 + 7) as u8).collect();
    let words = [
        target.ram.start + target.ram.size / 2,
        target.flash.start + 0x101,
        target.flash.start + 0x201,
        target.flash.start + 0x301,
    ];
    for (i, word) in words.iter().enumerate() {
        let at = 4 * i;
        if at + 4 <= len {
            image[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
    }
    image
}

/// One Intel-Hex record, CRLF terminated
pub fn hex_record(kind: u8, offset: u16, data: &[u8]) -> String {
    let mut line = String::new();
    let [hi, lo] = offset.to_be_bytes();
    let mut sum = (data.len() as u8).wrapping_add(hi).wrapping_add(lo).wrapping_add(kind);
    write!(line, ":{:02X}{:04X}{:02X}", data.len(), offset, kind).unwrap();
    for b in data {
        write!(line, "{:02X}", b).unwrap();
        sum = sum.wrapping_add(*b);
    }
    write!(line, "{:02X}\r\n", sum.wrapping_neg()).unwrap();
    line
}

/// A complete hex file placing `data` at `base`
pub fn hex_file(base: u32, data: &[u8]) -> String {
    let mut file = String::new();
    let mut upper = None;
    let mut addr = base;
    let mut rest = data;
    while !rest.is_empty() || upper.is_none() {
        if upper != Some(addr >> 16) {
            let high = (addr >> 16) as u16;
            file.push_str(&hex_record(record::EXTENDED_LINEAR_ADDRESS, 0, &high.to_be_bytes()));
            upper = Some(addr >> 16);
        }
        let room = 0x10000 - (addr & 0xFFFF) as usize;
        let len = rest.len().min(16).min(room);
        if len == 0 {
            break;
        }
        file.push_str(&hex_record(record::DATA, addr as u16, &rest[..len]));
        rest = &rest[len..];
        addr += len as u32;
    }
    file.push_str(&hex_record(record::EOF, 0, &[]));
    file
}
