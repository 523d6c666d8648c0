//! Routes decoded image data to the right flash region
//!
//! Data is held back until [`PREFIX_SIZE`] bytes are available (or the
//! addresses stop being contiguous), the image type is decided from that
//! prefix, and everything from then on streams into a [`FlashManager`].

use core::cmp::min;

use heapless::Vec;

use super::{detect_type, resolve, FlashTarget, ImageType, PREFIX_SIZE};
use crate::board::Board;
use crate::error::{Error, Result};
use crate::flash::FlashManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    /// Data without addresses (binary)
    Stream,
    /// Data with absolute addresses (hex)
    Addr,
    Error,
}

/// Flash image decoder
pub struct FlashDecoder {
    state: State,
    prefix: Vec<u8, PREFIX_SIZE>,
    initial_offset: u32,
    current_offset: u32,
    offset_to_absolute: u32,
    target: Option<FlashTarget>,
    manager: FlashManager,
}

impl Default for FlashDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashDecoder {
    /// Create a closed decoder
    pub const fn new() -> Self {
        Self {
            state: State::Closed,
            prefix: Vec::new(),
            initial_offset: 0,
            current_offset: 0,
            offset_to_absolute: 0,
            target: None,
            manager: FlashManager::new(),
        }
    }

    /// Where the image is being written, once known
    pub fn target(&self) -> Option<FlashTarget> {
        self.target
    }

    /// Start decoding a new image
    pub fn open(&mut self) -> Result<()> {
        if self.state != State::Closed {
            return Err(Error::internal());
        }
        self.prefix.clear();
        self.initial_offset = 0;
        self.current_offset = 0;
        self.offset_to_absolute = 0;
        self.target = None;
        self.state = State::Open;
        Ok(())
    }

    /// Feed image data
    ///
    /// `addr` is the absolute address of `data` for formats that carry one.
    /// The first call fixes whether the image is addressed; mixing is an
    /// internal error.
    pub fn write<B: Board + ?Sized>(
        &mut self,
        board: &mut B,
        data: &[u8],
        addr: Option<u32>,
    ) -> Result<()> {
        if self.state == State::Open {
            self.state = if addr.is_some() {
                State::Addr
            } else {
                State::Stream
            };
            self.initial_offset = addr.unwrap_or(0);
            self.current_offset = self.initial_offset;
            log::debug!(
                "decoder mode {:?}, initial offset 0x{:08X}",
                self.state,
                self.initial_offset
            );
        }

        let len = data.len() as u32;
        let result = match (self.state, addr) {
            (State::Stream, None) => {
                let at = self.current_offset;
                self.current_offset = at.wrapping_add(len);
                self.write_at(board, at, data, true)
            }
            (State::Addr, Some(at)) => {
                let sequential = at == self.current_offset;
                self.current_offset = at.wrapping_add(len);
                self.write_at(board, at, data, sequential)
            }
            _ => Err(Error::internal()),
        };

        if result.is_err() {
            self.state = State::Error;
        }
        result
    }

    /// Finish the image
    ///
    /// An image shorter than the detection prefix is classified from what
    /// was buffered and written out here.
    pub fn close<B: Board + ?Sized>(&mut self, board: &mut B) -> Result<()> {
        let prev = self.state;
        if prev == State::Closed {
            return Err(Error::internal());
        }
        self.state = State::Closed;

        let mut result = Ok(());
        if self.target.is_none()
            && matches!(prev, State::Stream | State::Addr)
            && !self.prefix.is_empty()
        {
            log::debug!("short image, deciding type from {} bytes", self.prefix.len());
            let image = self.detect(board);
            result = self.start(board, image);
        }

        if let Some(target) = self.target {
            let released = self.manager.uninit(board.flash(target.region));
            result = result.and(released);
        }
        self.prefix.clear();
        result
    }

    fn write_at<B: Board + ?Sized>(
        &mut self,
        board: &mut B,
        addr: u32,
        data: &[u8],
        sequential: bool,
    ) -> Result<()> {
        let mut addr = addr;
        let mut data = data;

        if self.target.is_none() {
            let image = if sequential {
                let count = min(data.len(), PREFIX_SIZE - self.prefix.len());
                self.prefix
                    .extend_from_slice(&data[..count])
                    .map_err(|_| Error::internal())?;
                data = &data[count..];
                addr = addr.wrapping_add(count as u32);
                self.prefix.is_full().then(|| self.detect(board))
            } else {
                log::debug!("non-sequential address 0x{:08X}, assuming target image", addr);
                Some(ImageType::Target)
            };

            match image {
                Some(image) => self.start(board, image)?,
                None => return Ok(()),
            }
        }

        if let (Some(target), false) = (self.target, data.is_empty()) {
            let absolute = addr.wrapping_add(self.offset_to_absolute);
            self.manager
                .data(board.flash(target.region), absolute, data)?;
        }
        Ok(())
    }

    fn detect<B: Board + ?Sized>(&self, board: &B) -> ImageType {
        let nvic_valid = board.validate_bin_nvic(&self.prefix);
        let image = detect_type(board.config(), &self.prefix, self.first_address(), nvic_valid);
        log::debug!("image type {:?}", image);
        image
    }

    fn first_address(&self) -> Option<u32> {
        match self.state {
            State::Addr => Some(self.initial_offset),
            _ => None,
        }
    }

    /// Resolve the destination, open flash and write out the prefix
    fn start<B: Board + ?Sized>(&mut self, board: &mut B, image: ImageType) -> Result<()> {
        let target = resolve(board.config(), image, self.first_address())?;
        self.offset_to_absolute = target.base.wrapping_sub(self.initial_offset);
        log::debug!(
            "writing {:?} image to {:?} flash at 0x{:08X}",
            target.image,
            target.region,
            target.base
        );

        let driver = board.flash(target.region);
        self.manager.init(driver)?;
        self.target = Some(target);

        if !self.prefix.is_empty() {
            let absolute = self.initial_offset.wrapping_add(self.offset_to_absolute);
            self.manager.data(driver, absolute, &self.prefix)?;
        }
        Ok(())
    }
}
