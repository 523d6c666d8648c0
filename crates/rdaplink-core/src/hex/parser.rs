//! Incremental Intel-Hex record parser
//!
//! Input may be cut anywhere, including in the middle of a record; the
//! partial record is kept until the next call. Decoded bytes are gathered
//! into the caller's output buffer as long as they are contiguous.

use heapless::Vec;

use super::record;

/// Length byte, two address bytes, type byte and checksum
const RECORD_OVERHEAD: usize = 5;
const MAX_RECORD: usize = RECORD_OVERHEAD + 255;

/// Result of one [`HexParser::parse`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// All input consumed
    Ok,
    /// Output is full or the next record is not contiguous; call again
    /// with the unconsumed input
    Unaligned,
    /// End-of-file record reached
    Eof,
    /// A record failed its checksum
    ChecksumFail,
    /// Malformed input
    ParserFailure,
}

/// What one [`HexParser::parse`] call produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOutput {
    /// Outcome
    pub status: ParseStatus,
    /// Input bytes consumed
    pub consumed: usize,
    /// Address of the first output byte
    pub address: u32,
    /// Output bytes written
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line {
    /// Between records
    Idle,
    /// Expecting the high nibble of a byte
    High,
    /// Expecting the low nibble
    Low(u8),
}

/// Which data records are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blocks {
    /// Plain hex file, every data record counts
    All,
    /// Universal Hex, only blocks for this board id count
    Board { id: u16, active: bool },
}

#[derive(Debug, Default)]
struct Emitted {
    address: u32,
    len: usize,
}

/// Streaming Intel-Hex decoder
#[derive(Debug)]
pub struct HexParser {
    line: Line,
    record: Vec<u8, MAX_RECORD>,
    upper: u32,
    blocks: Blocks,
    pending: Vec<u8, 255>,
    pending_addr: u32,
    eof: bool,
    failed: Option<ParseStatus>,
}

impl Default for HexParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HexParser {
    /// Parser for a plain hex file
    pub const fn new() -> Self {
        Self::with_blocks(Blocks::All)
    }

    /// Parser for a Universal Hex file keeping only blocks for `board_id`
    pub const fn universal(board_id: u16) -> Self {
        Self::with_blocks(Blocks::Board {
            id: board_id,
            active: false,
        })
    }

    const fn with_blocks(blocks: Blocks) -> Self {
        Self {
            line: Line::Idle,
            record: Vec::new(),
            upper: 0,
            blocks,
            pending: Vec::new(),
            pending_addr: 0,
            eof: false,
            failed: None,
        }
    }

    /// Decode `input` into `out`
    ///
    /// On [`ParseStatus::Unaligned`] the record that did not fit is kept
    /// and comes out first on the next call, which should be given
    /// `input[consumed..]`.
    pub fn parse(&mut self, input: &[u8], out: &mut [u8]) -> ParseOutput {
        let mut emitted = Emitted::default();

        if !self.pending.is_empty() {
            let len = self.pending.len();
            if len > out.len() {
                return self.fail(ParseStatus::ParserFailure, 0, &emitted);
            }
            out[..len].copy_from_slice(&self.pending);
            emitted.address = self.pending_addr;
            emitted.len = len;
            self.pending.clear();
        }

        if let Some(status) = self.failed {
            return output(status, 0, &emitted);
        }
        if self.eof {
            return output(ParseStatus::Eof, input.len(), &emitted);
        }

        for (i, &c) in input.iter().enumerate() {
            if let Some(status) = self.feed(c, out, &mut emitted) {
                return match status {
                    ParseStatus::ChecksumFail | ParseStatus::ParserFailure => {
                        self.fail(status, i + 1, &emitted)
                    }
                    ParseStatus::Eof => {
                        self.eof = true;
                        output(status, i + 1, &emitted)
                    }
                    _ => output(status, i + 1, &emitted),
                };
            }
        }

        output(ParseStatus::Ok, input.len(), &emitted)
    }

    fn fail(&mut self, status: ParseStatus, consumed: usize, emitted: &Emitted) -> ParseOutput {
        log::debug!("hex parse failed: {:?}", status);
        self.failed = Some(status);
        output(status, consumed, emitted)
    }

    fn feed(&mut self, c: u8, out: &mut [u8], emitted: &mut Emitted) -> Option<ParseStatus> {
        match self.line {
            Line::Idle => {
                // Anything between records (line endings, padding) is skipped
                if c == b':' {
                    self.record.clear();
                    self.line = Line::High;
                }
                None
            }
            Line::High => match hex_value(c) {
                Some(high) => {
                    self.line = Line::Low(high);
                    None
                }
                None => Some(ParseStatus::ParserFailure),
            },
            Line::Low(high) => {
                let Some(low) = hex_value(c) else {
                    return Some(ParseStatus::ParserFailure);
                };
                if self.record.push(high << 4 | low).is_err() {
                    return Some(ParseStatus::ParserFailure);
                }
                self.line = Line::High;
                if self.record.len() == self.record[0] as usize + RECORD_OVERHEAD {
                    self.line = Line::Idle;
                    return self.process(out, emitted);
                }
                None
            }
        }
    }

    fn process(&mut self, out: &mut [u8], emitted: &mut Emitted) -> Option<ParseStatus> {
        let raw = core::mem::take(&mut self.record);
        let sum = raw.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            return Some(ParseStatus::ChecksumFail);
        }

        let len = raw[0] as usize;
        let offset = u16::from_be_bytes([raw[1], raw[2]]);
        let kind = raw[3];
        let data = &raw[4..4 + len];

        match kind {
            record::DATA => self.data(offset, data, out, emitted),
            record::CUSTOM_DATA if matches!(self.blocks, Blocks::Board { .. }) => {
                self.data(offset, data, out, emitted)
            }
            record::EOF => Some(ParseStatus::Eof),
            record::EXTENDED_SEGMENT_ADDRESS | record::EXTENDED_LINEAR_ADDRESS => {
                let [hi, lo] = data else {
                    return Some(ParseStatus::ParserFailure);
                };
                let value = u16::from_be_bytes([*hi, *lo]) as u32;
                self.upper = if kind == record::EXTENDED_LINEAR_ADDRESS {
                    value << 16
                } else {
                    value << 4
                };
                None
            }
            record::BLOCK_START => {
                if let Blocks::Board { id, active } = &mut self.blocks {
                    let block_id = data.get(..2).map(|b| u16::from_be_bytes([b[0], b[1]]));
                    *active = block_id == Some(*id);
                    log::debug!(
                        "universal hex block {:04X?} {}",
                        block_id,
                        if *active { "selected" } else { "skipped" }
                    );
                }
                None
            }
            // Start addresses, block end, padding and foreign data
            _ => None,
        }
    }

    fn data(
        &mut self,
        offset: u16,
        data: &[u8],
        out: &mut [u8],
        emitted: &mut Emitted,
    ) -> Option<ParseStatus> {
        if matches!(self.blocks, Blocks::Board { active: false, .. }) || data.is_empty() {
            return None;
        }

        let addr = self.upper.wrapping_add(offset as u32);
        if emitted.len == 0 {
            if data.len() > out.len() {
                return Some(ParseStatus::ParserFailure);
            }
            emitted.address = addr;
        }

        let contiguous = emitted.address.wrapping_add(emitted.len as u32) == addr;
        if !contiguous || emitted.len + data.len() > out.len() {
            self.pending.clear();
            // `data` holds at most 255 bytes
            let _ = self.pending.extend_from_slice(data);
            self.pending_addr = addr;
            return Some(ParseStatus::Unaligned);
        }

        out[emitted.len..emitted.len + data.len()].copy_from_slice(data);
        emitted.len += data.len();
        None
    }
}

fn output(status: ParseStatus, consumed: usize, emitted: &Emitted) -> ParseOutput {
    ParseOutput {
        status,
        consumed,
        address: emitted.address,
        len: emitted.len,
    }
}

pub(crate) fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}
