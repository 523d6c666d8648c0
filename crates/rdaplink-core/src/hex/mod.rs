//! Intel-Hex and Universal Hex support
//!
//! Detection works on the raw text of the first disk sector; decoding is
//! done by the incremental [`HexParser`].

mod parser;

pub use parser::{HexParser, ParseOutput, ParseStatus};

/// Intel-Hex record types, including the Universal Hex extensions
pub mod record {
    /// Data
    pub const DATA: u8 = 0x00;
    /// End of file
    pub const EOF: u8 = 0x01;
    /// Extended segment address
    pub const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
    /// Start segment address
    pub const START_SEGMENT_ADDRESS: u8 = 0x03;
    /// Extended linear address
    pub const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
    /// Start linear address
    pub const START_LINEAR_ADDRESS: u8 = 0x05;
    /// Universal Hex block start, carries the board id
    pub const BLOCK_START: u8 = 0x0A;
    /// Universal Hex block end
    pub const BLOCK_END: u8 = 0x0B;
    /// Universal Hex padding
    pub const PADDED_DATA: u8 = 0x0C;
    /// Universal Hex data for the selected board
    pub const CUSTOM_DATA: u8 = 0x0D;
    /// Universal Hex data for other tools
    pub const OTHER_DATA: u8 = 0x0E;
}

/// Check whether `buf` starts like an Intel-Hex file
///
/// The first record must be one of the types a hex file can begin with.
pub fn validate_hexfile(buf: &[u8]) -> bool {
    buf.len() > 8 && buf[0] == b':' && matches!(buf[8], b'0' | b'2' | b'3' | b'4' | b'5')
}

/// Check whether `buf` starts like a Universal Hex file
///
/// A Universal Hex opens with an extended linear address record followed
/// by a block start record.
pub fn is_universal_hex(buf: &[u8]) -> bool {
    let mut lines = buf
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line));
    let first = lines.next().and_then(record_type);
    let second = lines.next().and_then(record_type);
    first == Some(record::EXTENDED_LINEAR_ADDRESS) && second == Some(record::BLOCK_START)
}

fn record_type(line: &[u8]) -> Option<u8> {
    match line {
        [b':', _, _, _, _, _, _, hi, lo, ..] => {
            Some(parser::hex_value(*hi)? << 4 | parser::hex_value(*lo)?)
        }
        _ => None,
    }
}
