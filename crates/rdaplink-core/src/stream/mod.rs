//! File stream dispatcher
//!
//! Recognizes the format of an incoming file from its first sector and
//! decodes it into the flash image decoder. One stream is open at a time.

mod format;

pub use format::WriteStatus;

use format::{Format, HexState};

use crate::board::Board;
use crate::error::{Error, Result};
use crate::hex::{self, HexParser};
use crate::image::{self, FlashDecoder, FlashTarget, ImageType, PREFIX_SIZE};

/// Format of a file being streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Raw binary image
    Binary,
    /// Intel-Hex
    Hex,
    /// Universal Hex, decoded block by block
    UniversalHex,
}

impl StreamKind {
    /// Kind implied by an 8.3 file extension
    pub fn from_extension(ext: &[u8]) -> Option<Self> {
        if ext.eq_ignore_ascii_case(b"BIN") {
            Some(Self::Binary)
        } else if ext.eq_ignore_ascii_case(b"HEX") {
            Some(Self::Hex)
        } else {
            None
        }
    }
}

/// Detect the stream kind from the start of a file
///
/// Formats are tried in a fixed order and the first match wins. Universal
/// Hex is checked before plain hex since it is valid Intel-Hex too.
pub fn identify<B: Board + ?Sized>(board: &B, prefix: &[u8]) -> Option<StreamKind> {
    if prefix.len() >= PREFIX_SIZE {
        let nvic_valid = board.validate_bin_nvic(prefix);
        if image::detect_type(board.config(), prefix, None, nvic_valid) != ImageType::Unknown {
            return Some(StreamKind::Binary);
        }
    }
    if hex::is_universal_hex(prefix) {
        return Some(StreamKind::UniversalHex);
    }
    if hex::validate_hexfile(prefix) {
        return Some(StreamKind::Hex);
    }
    None
}

/// Whether switching from `a` to `b` keeps the same decoder family
pub fn types_compatible(a: StreamKind, b: StreamKind) -> bool {
    use StreamKind::*;
    a == b || matches!((a, b), (Hex, UniversalHex) | (UniversalHex, Hex))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Error,
}

#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Owner(std::thread::ThreadId);

#[cfg(feature = "std")]
impl Owner {
    fn current() -> Self {
        Self(std::thread::current().id())
    }

    fn is_current(&self) -> bool {
        *self == Self::current()
    }
}

#[cfg(not(feature = "std"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Owner;

#[cfg(not(feature = "std"))]
impl Owner {
    fn current() -> Self {
        Self
    }

    fn is_current(&self) -> bool {
        true
    }
}

struct Stream {
    kind: StreamKind,
    state: Lifecycle,
    format: Format,
    decoder: FlashDecoder,
    owner: Owner,
}

/// Holds the single open stream
pub struct StreamDispatcher {
    stream: Option<Stream>,
}

impl Default for StreamDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDispatcher {
    /// Create a dispatcher with no open stream
    pub const fn new() -> Self {
        Self { stream: None }
    }

    /// Whether a stream is open
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Kind of the open stream
    pub fn kind(&self) -> Option<StreamKind> {
        self.stream.as_ref().map(|s| s.kind)
    }

    /// Destination of the open stream, once decided
    pub fn target(&self) -> Option<FlashTarget> {
        self.stream.as_ref().and_then(|s| s.decoder.target())
    }

    /// Open a stream of the given kind
    pub fn open<B: Board + ?Sized>(&mut self, board: &B, kind: StreamKind) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::AlreadyOpen);
        }

        let format = match kind {
            StreamKind::Binary => Format::Binary,
            StreamKind::Hex => Format::Hex(HexState::new(HexParser::new())),
            StreamKind::UniversalHex => {
                let Some(board_id) = board.config().board_id else {
                    log::debug!("no board id configured for universal hex");
                    return Err(Error::UnsupportedUpdate);
                };
                Format::UniversalHex(HexState::new(HexParser::universal(board_id)))
            }
        };

        let mut decoder = FlashDecoder::new();
        decoder.open()?;
        log::debug!("stream open: {:?}", kind);
        self.stream = Some(Stream {
            kind,
            state: Lifecycle::Open,
            format,
            decoder,
            owner: Owner::current(),
        });
        Ok(())
    }

    /// Decode the next piece of the file
    pub fn write<B: Board + ?Sized>(&mut self, board: &mut B, data: &[u8]) -> Result<WriteStatus> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::internal());
        };
        if !stream.owner.is_current() || stream.state != Lifecycle::Open {
            return Err(Error::internal());
        }

        let result = stream.format.write(&mut stream.decoder, board, data);
        if let Err(e) = result {
            log::debug!("stream write failed: {}", e);
            stream.state = Lifecycle::Error;
        }
        result
    }

    /// Close the stream, flushing buffered data to flash
    pub fn close<B: Board + ?Sized>(&mut self, board: &mut B) -> Result<()> {
        match self.stream.take() {
            None => Err(Error::internal()),
            Some(stream) if !stream.owner.is_current() => {
                self.stream = Some(stream);
                Err(Error::internal())
            }
            Some(mut stream) => {
                log::debug!("stream close: {:?}", stream.kind);
                stream.decoder.close(board)
            }
        }
    }
}
