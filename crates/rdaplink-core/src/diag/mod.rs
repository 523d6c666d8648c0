//! Status files published on the drive
//!
//! After every remount the drive shows `FAIL.TXT` when the last transfer
//! failed and `ASSERT.TXT` when an internal invariant was violated. The
//! text of both is rendered here; the drive only stores it.

mod template;

pub use template::{expand, Overflow, ProbeInfo, MBED_HTM_TEMPLATE};

use core::fmt::Write;

use heapless::{String, Vec};

use crate::board::ProbeMode;
use crate::error::{Assertion, Result};
use crate::transfer::Settings;

/// Capacity of a rendered status file
pub const FILE_CAPACITY: usize = 512;

/// Rendered status file
pub type FileText = String<FILE_CAPACITY>;

/// Longest stored source path; longer paths keep their tail
pub const ASSERT_FILE_LEN: usize = 64;

/// A recorded assertion failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertRecord {
    /// Source file, truncated from the front
    pub file: String<ASSERT_FILE_LEN>,
    /// Source line
    pub line: u32,
    /// Firmware that hit the assertion
    pub source: ProbeMode,
    /// Return addresses captured by a fault handler, if any
    pub trace: Vec<u32, 8>,
}

impl AssertRecord {
    /// Record an assertion raised in `source`
    pub fn new(at: Assertion, source: ProbeMode) -> Self {
        let mut start = at.file.len().saturating_sub(ASSERT_FILE_LEN);
        while !at.file.is_char_boundary(start) {
            start += 1;
        }
        let mut file = String::new();
        // Cannot overflow: the tail is at most ASSERT_FILE_LEN bytes
        let _ = file.push_str(&at.file[start..]);
        Self {
            file,
            line: at.line,
            source,
            trace: Vec::new(),
        }
    }
}

/// Everything the drive needs to decide which status files to show
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics<'a> {
    /// Outcome of the last transfer
    pub status: Result<()>,
    /// Stored assertion, if any
    pub assertion: Option<&'a AssertRecord>,
    /// Current settings
    pub settings: Settings,
    /// Firmware running
    pub mode: ProbeMode,
}

impl Diagnostics<'_> {
    /// `FAIL.TXT` contents, present only after a failed transfer
    pub fn fail_txt(&self) -> Option<FileText> {
        let err = self.status.err()?;
        let mut out = FileText::new();
        write!(out, "error: {}\r\ntype: {}\r\n", err, err.kind()).ok()?;
        Some(out)
    }

    /// `ASSERT.TXT` contents, present while an assertion is stored
    pub fn assert_txt(&self) -> Option<FileText> {
        let record = self.assertion?;
        let mut out = FileText::new();
        write!(
            out,
            "Assert\r\nFile: {}\r\nLine: {}\r\nSource: {}\r\n",
            record.file,
            record.line,
            mode_name(record.source)
        )
        .ok()?;
        for (i, addr) in record.trace.iter().enumerate() {
            write!(out, "Trace {}: 0x{:08X}\r\n", i, addr).ok()?;
        }
        Some(out)
    }

    /// `DETAILS.TXT` contents
    pub fn details_txt(&self, info: &ProbeInfo<'_>) -> core::result::Result<FileText, Overflow> {
        let mut out = FileText::new();
        let mode = mode_name(self.mode);
        write!(
            out,
            "# rdaplink\r\nUnique ID: {}\r\nHDK ID: {}\r\nAuto Reset: {}\r\nAutomation allowed: {}\r\nDaplink Mode: {}\r\n{} Version: {}\r\n",
            info.unique_id,
            info.hdk_id,
            u8::from(self.settings.auto_reset),
            u8::from(self.settings.automation_allowed),
            mode,
            mode,
            info.version,
        )
        .map_err(|_| Overflow)?;
        Ok(out)
    }
}

fn mode_name(mode: ProbeMode) -> &'static str {
    match mode {
        ProbeMode::Interface => "Interface",
        ProbeMode::Bootloader => "Bootloader",
    }
}
