//! Per-format decode state

use crate::board::Board;
use crate::error::{Error, Result};
use crate::hex::{HexParser, ParseStatus};
use crate::image::FlashDecoder;

/// Size of the decoded-hex staging buffer
const HEX_OUTPUT_SIZE: usize = 256;

/// Outcome of a successful stream write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// More data is expected
    Continue,
    /// The file is complete
    Done,
    /// The file may be complete; the file size has to decide
    DoneOrContinue,
}

pub(super) struct HexState {
    parser: HexParser,
    out: [u8; HEX_OUTPUT_SIZE],
}

impl HexState {
    pub(super) fn new(parser: HexParser) -> Self {
        Self {
            parser,
            out: [0; HEX_OUTPUT_SIZE],
        }
    }

    fn write<B: Board + ?Sized>(
        &mut self,
        decoder: &mut FlashDecoder,
        board: &mut B,
        data: &[u8],
    ) -> Result<WriteStatus> {
        let mut input = data;
        loop {
            let parsed = self.parser.parse(input, &mut self.out);
            if parsed.len > 0 {
                decoder.write(board, &self.out[..parsed.len], Some(parsed.address))?;
            }
            match parsed.status {
                ParseStatus::Ok => return Ok(WriteStatus::Continue),
                ParseStatus::Unaligned => input = &input[parsed.consumed..],
                ParseStatus::Eof => return Ok(WriteStatus::Done),
                ParseStatus::ChecksumFail => return Err(Error::HexChecksum),
                ParseStatus::ParserFailure => return Err(Error::HexParser),
            }
        }
    }
}

pub(super) enum Format {
    Binary,
    Hex(HexState),
    UniversalHex(HexState),
}

impl Format {
    pub(super) fn write<B: Board + ?Sized>(
        &mut self,
        decoder: &mut FlashDecoder,
        board: &mut B,
        data: &[u8],
    ) -> Result<WriteStatus> {
        match self {
            // No end marker: every chunk could be the last
            Format::Binary => decoder
                .write(board, data, None)
                .map(|()| WriteStatus::DoneOrContinue),
            Format::Hex(hex) => hex.write(decoder, board, data),
            // One finished block says nothing about blocks still to come
            Format::UniversalHex(hex) => hex
                .write(decoder, board, data)
                .map(|_| WriteStatus::DoneOrContinue),
        }
    }
}
