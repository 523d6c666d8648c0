use crate::stream::StreamKind;
use crate::transfer::drive::FileHandle;

/// Progress of the current transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPhase {
    /// Nothing recognized yet
    #[default]
    Idle,
    /// Data is flowing
    InProgress,
    /// Everything expected has arrived, more may still come
    CanBeFinished,
    /// Outcome recorded; further input is ignored until the next remount
    Finished,
}

/// Bookkeeping for one drag-and-drop transfer
///
/// Reset every time the drive is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferState {
    /// Directory entry being programmed
    pub file: Option<FileHandle>,
    /// First sector of the stream
    pub start_sector: Option<u32>,
    /// First sector according to the directory entry
    pub file_start_sector: Option<u32>,
    /// Sector expected next
    pub next_sector: u32,
    /// Bytes accepted into the stream, in whole sectors
    pub size_transferred: u64,
    /// File size from the directory entry
    pub file_size: u32,
    /// Stream kind, from the file name or the data
    pub stream: Option<StreamKind>,
    /// A stream is open
    pub stream_open: bool,
    /// A stream was opened at some point
    pub stream_started: bool,
    /// The stream reported the end of the image
    pub stream_finished: bool,
    /// The stream could end here
    pub stream_optional_finish: bool,
    /// The directory entry says all data has arrived
    pub file_info_optional_finish: bool,
    /// Finalized because the drive went away
    pub timeout: bool,
    /// Lowest sector seen behind the write position
    pub last_ooo_sector: Option<u32>,
    /// Overall progress
    pub phase: TransferPhase,
}

impl TransferState {
    /// A file or stream has been seen
    pub fn started(&self) -> bool {
        self.file.is_some() || self.stream.is_some()
    }

    /// An out-of-order sector fell inside the data already accepted
    pub fn out_of_order(&self, sector_size: u32) -> bool {
        match (self.last_ooo_sector, self.start_sector) {
            (Some(ooo), Some(start)) => {
                (ooo.saturating_sub(start) as u64) * (sector_size as u64) < self.size_transferred
            }
            _ => false,
        }
    }

    /// Recompute whether the directory entry's size has been reached
    pub(crate) fn update_file_info_finish(&mut self) {
        self.file_info_optional_finish = self.file.is_some()
            && self.size_transferred >= self.file_size as u64
            && self.file_size > 0
            && self.start_sector == self.file_start_sector;
    }

    /// Both the directory entry and the stream allow finishing here
    pub fn can_finish(&self) -> bool {
        self.file_info_optional_finish && self.stream_optional_finish
    }

    /// The stream has ended and the directory entry agrees
    pub fn must_finish(&self) -> bool {
        self.stream_finished && self.file_info_optional_finish
    }
}
