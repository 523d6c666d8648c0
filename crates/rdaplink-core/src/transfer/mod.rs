//! Drag-and-drop transfer state machine
//!
//! [`TransferManager`] sits between the emulated drive and the stream
//! dispatcher. It sees every sector the host writes and every directory
//! change, decides when a file starts, feeds the sectors that belong to it
//! in order, and judges when the transfer is over. The outcome is kept
//! until the next transfer and published through [`Diagnostics`].
//!
//! A transfer ends in one of three ways:
//! - the stream reports the end of the image and the directory entry agrees
//!   that the whole file has arrived,
//! - a stream or flash error,
//! - the drive going away (remount or USB disconnect) before that, which
//!   counts as success only when nothing had started or the data already
//!   looked complete.
//!
//! Every state update asks for a remount; host writes keep pushing the
//! remount back, so it happens once the host has been idle for the
//! disconnect delay.

mod command;
mod connection;
mod drive;
mod state;

pub use command::{DriveCommand, Settings, ASSERT_TXT, FAIL_TXT, MBED_HTM};
pub use connection::{ConnectionControl, ConnectionDelays, ConnectionState, Transition};
pub use drive::{Drive, FileChange, FileHandle, FileInfo, ShortName};
pub use state::{TransferPhase, TransferState};

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::board::{Board, ProbeMode};
use crate::diag::{AssertRecord, Diagnostics};
use crate::error::{Error, Result};
use crate::flash::{round_up, FlashRegion};
use crate::stream::{self, StreamDispatcher, StreamKind, WriteStatus};

/// Drives one drag-and-drop session after another
pub struct TransferManager<'c, M: RawMutex> {
    connection: &'c ConnectionControl<M>,
    media_ready: bool,
    state: TransferState,
    streams: StreamDispatcher,
    status: Result<()>,
    assertion: Option<AssertRecord>,
    settings: Settings,
}

impl<'c, M: RawMutex> TransferManager<'c, M> {
    /// Create a manager using the shared connection state
    pub fn new(connection: &'c ConnectionControl<M>, settings: Settings) -> Self {
        Self {
            connection,
            media_ready: false,
            state: TransferState::default(),
            streams: StreamDispatcher::new(),
            status: Ok(()),
            assertion: None,
            settings,
        }
    }

    /// Build the drive and connect or disconnect it without delay
    pub fn init<P: Board + Drive>(&mut self, probe: &mut P, enable: bool) {
        self.build_filesystem(probe);
        self.connection.init(enable);
        self.set_media_ready(probe, enable);
    }

    /// Request the drive to appear or disappear
    pub fn enable(&self, enable: bool) {
        self.connection.enable(enable);
    }

    /// Request a remount so the host sees fresh drive contents
    pub fn remount(&self) {
        self.connection.remount();
    }

    /// Result of the last finished transfer
    pub fn status(&self) -> Result<()> {
        self.status
    }

    /// Progress of the current transfer
    pub fn transfer(&self) -> &TransferState {
        &self.state
    }

    /// Whether the host may currently access the drive
    pub fn media_ready(&self) -> bool {
        self.media_ready
    }

    /// Stored assertion, if any
    pub fn assertion(&self) -> Option<&AssertRecord> {
        self.assertion.as_ref()
    }

    /// Store an assertion captured elsewhere; the first one is kept
    pub fn record_assertion(&mut self, record: AssertRecord) {
        if self.assertion.is_none() {
            self.assertion = Some(record);
        }
    }

    /// Current settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Mutable settings
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// What the drive should publish right now
    pub fn diagnostics<P: Board + ?Sized>(&self, probe: &P) -> Diagnostics<'_> {
        Diagnostics {
            status: self.status,
            assertion: self.assertion.as_ref(),
            settings: self.settings,
            mode: probe.config().mode,
        }
    }

    /// Advance the connection timers
    ///
    /// Leaving the connected state finalizes an unfinished transfer.
    pub fn periodic<P: Board + Drive>(&mut self, probe: &mut P, elapsed_ms: u32) {
        let Some(transition) = self.connection.tick(elapsed_ms) else {
            return;
        };
        log::debug!("drive {:?} -> {:?}", transition.from, transition.to);

        if transition.from == ConnectionState::Connected
            && self.state.phase != TransferPhase::Finished
        {
            self.state.timeout = true;
            self.update_state(probe, Ok(()));
        }

        match transition.to {
            ConnectionState::Disconnected => self.set_media_ready(probe, false),
            ConnectionState::Reconnecting => {
                self.set_media_ready(probe, false);
                probe.disconnecting(self.status, &self.settings);
            }
            ConnectionState::Connected => {
                self.build_filesystem(probe);
                self.set_media_ready(probe, true);
            }
        }
    }

    /// Handle sectors written by the host
    ///
    /// `data` holds one or more whole sectors starting at `sector`.
    pub fn sector_write<P: Board + Drive>(&mut self, probe: &mut P, sector: u32, data: &[u8]) {
        if !self.media_ready {
            return;
        }
        self.connection.restart_disconnect_delay();

        if self.state.phase == TransferPhase::Finished {
            log::trace!("sector {} after transfer finished", sector);
            return;
        }

        let sector_size = probe.config().drive.sector_size as usize;
        if sector_size == 0 || data.is_empty() || data.len() % sector_size != 0 {
            self.assert_failed(probe);
            return;
        }
        let count = (data.len() / sector_size) as u32;
        self.file_data(probe, sector, count, data);
    }

    /// Handle a directory entry change
    pub fn file_change<P: Board + Drive>(
        &mut self,
        probe: &mut P,
        name: &ShortName,
        change: FileChange,
        file: FileHandle,
        info: FileInfo,
    ) {
        log::debug!("file {:?} {:?} {:?}", name, change, info);
        self.handle_command(probe, name, change);

        if self.state.phase == TransferPhase::Finished {
            return;
        }

        let kind = StreamKind::from_extension(name.extension());
        match change {
            FileChange::Changed if self.state.file == Some(file) => {
                self.update_file_info(probe, file, info.start_sector, info.size, kind);
            }
            FileChange::Created if kind.is_some() && !info.hidden => {
                self.update_file_info(probe, file, info.start_sector, info.size, kind);
            }
            FileChange::Deleted if self.state.file == Some(file) => {
                self.reset_file_info(probe);
            }
            _ => {}
        }
    }

    fn set_media_ready<P: Drive>(&mut self, probe: &mut P, ready: bool) {
        self.media_ready = ready;
        probe.set_media_ready(ready);
    }

    fn build_filesystem<P: Board + Drive>(&mut self, probe: &mut P) {
        self.state = TransferState::default();
        let diagnostics = self.diagnostics(&*probe);
        probe.rebuild(&diagnostics);
    }

    fn file_data<P: Board + Drive>(&mut self, probe: &mut P, sector: u32, count: u32, data: &[u8]) {
        if !self.state.stream_started {
            if let Some(kind) = stream::identify(probe, data) {
                self.stream_open(probe, kind, sector);
            }
        }
        if !self.state.stream_started || self.state.phase == TransferPhase::Finished {
            return;
        }

        if self.state.start_sector.is_some_and(|start| sector < start) {
            return;
        }

        if sector != self.state.next_sector {
            if sector < self.state.next_sector {
                let lowest = self.state.last_ooo_sector.map_or(sector, |s| s.min(sector));
                self.state.last_ooo_sector = Some(lowest);
                log::debug!("sector {} out of order, lowest {}", sector, lowest);
            } else {
                log::debug!("sector {} not part of the transfer", sector);
            }
            return;
        }

        self.state.size_transferred += data.len() as u64;
        self.state.next_sector = sector.wrapping_add(count);

        if self.state.stream_finished {
            log::debug!(
                "stream already closed, discarding sector {} (0x{:X} transferred)",
                sector,
                self.state.size_transferred
            );
            self.update_state(probe, Ok(()));
            return;
        }
        self.stream_data(probe, data);
    }

    fn stream_open<P: Board + Drive>(&mut self, probe: &mut P, kind: StreamKind, start_sector: u32) {
        if self.state.stream_open {
            self.assert_failed(probe);
            return;
        }
        log::debug!("stream {:?} starts at sector {}", kind, start_sector);

        let start = *self.state.start_sector.get_or_insert(start_sector);
        let expected = *self.state.stream.get_or_insert(kind);

        if !stream::types_compatible(kind, expected) {
            log::debug!("stream {:?} does not match {:?}", kind, expected);
            self.update_state(probe, Err(Error::ErrorDuringTransfer));
            return;
        }
        if start != start_sector {
            log::debug!("start sector {} does not match {}", start_sector, start);
            self.update_state(probe, Err(Error::ErrorDuringTransfer));
            return;
        }

        let status = self.streams.open(probe, kind);
        if status.is_ok() {
            self.state.next_sector = start_sector;
            self.state.stream_open = true;
            self.state.stream_started = true;
        }
        self.update_state(probe, status);
    }

    fn stream_data<P: Board + Drive>(&mut self, probe: &mut P, data: &[u8]) {
        if !self.state.stream_open {
            self.assert_failed(probe);
            return;
        }

        let status = match self.streams.write(probe, data) {
            Ok(WriteStatus::Done) => {
                let closed = self.streams.close(probe);
                self.state.stream_open = false;
                self.state.stream_finished = true;
                self.state.stream_optional_finish = true;
                closed
            }
            Ok(WriteStatus::DoneOrContinue) => {
                self.state.stream_optional_finish = true;
                Ok(())
            }
            Ok(WriteStatus::Continue) => {
                self.state.stream_optional_finish = false;
                Ok(())
            }
            Err(e) => {
                self.state.stream_optional_finish = false;
                Err(e)
            }
        };
        self.update_state(probe, status);
    }

    fn update_file_info<P: Board + Drive>(
        &mut self,
        probe: &mut P,
        file: FileHandle,
        start_sector: Option<u32>,
        size: u32,
        kind: Option<StreamKind>,
    ) {
        let state = &mut self.state;
        state.file.get_or_insert(file);
        if state.file_start_sector.is_none() {
            state.file_start_sector = start_sector;
        }
        if state.stream.is_none() {
            state.stream = kind;
        }

        if size > 0 && size < state.file_size && (size as u64) < state.size_transferred {
            log::debug!("file size shrank from {} to {}", state.file_size, size);
            self.update_state(probe, Err(Error::ErrorDuringTransfer));
            return;
        }
        if start_sector.is_some() && start_sector != state.file_start_sector {
            log::debug!(
                "file start moved from {:?} to {:?}",
                state.file_start_sector,
                start_sector
            );
            self.update_state(probe, Err(Error::ErrorDuringTransfer));
            return;
        }
        if let (Some(kind), Some(current)) = (kind, state.stream) {
            if !stream::types_compatible(kind, current) {
                log::debug!("file type {:?} does not match stream {:?}", kind, current);
                self.update_state(probe, Err(Error::ErrorDuringTransfer));
                return;
            }
        }

        state.file_size = size;
        self.update_state(probe, Ok(()));
    }

    fn reset_file_info<P: Board + Drive>(&mut self, probe: &mut P) {
        if self.state.stream_open {
            self.update_state(probe, Err(Error::ErrorDuringTransfer));
        } else {
            log::debug!("file deleted before its data arrived");
            self.state = TransferState::default();
            self.connection.abort_remount();
        }
    }

    fn update_state<P: Board + Drive>(&mut self, probe: &mut P, status: Result<()>) {
        if self.state.phase == TransferPhase::Finished {
            self.assert_failed(probe);
            return;
        }

        let sector_size = probe.config().drive.sector_size;
        let state = &mut self.state;
        state.update_file_info_finish();
        let timeout = state.timeout;

        let mut status = status;
        state.phase = if !state.started() {
            if timeout {
                TransferPhase::Finished
            } else {
                TransferPhase::Idle
            }
        } else if status.is_err() {
            TransferPhase::Finished
        } else if timeout {
            if state.out_of_order(sector_size) {
                status = Err(Error::OutOfOrderSector);
            } else if !state.can_finish() {
                status = Err(Error::TransferTimeout);
            }
            TransferPhase::Finished
        } else if state.must_finish() {
            TransferPhase::Finished
        } else if state.can_finish() {
            TransferPhase::CanBeFinished
        } else {
            TransferPhase::InProgress
        };

        if self.state.phase == TransferPhase::Finished {
            self.finish(probe, status);
        }
        if !timeout {
            self.connection.remount();
        }
    }

    fn finish<P: Board + Drive>(&mut self, probe: &mut P, status: Result<()>) {
        let mut status = status;
        let state = &mut self.state;
        log::debug!(
            "finishing transfer: file={:?} start={:?} size={} stream={:?} transferred={} timeout={}",
            state.file,
            state.start_sector,
            state.file_size,
            state.stream,
            state.size_transferred,
            state.timeout
        );

        if state.stream_open {
            let closed = self.streams.close(probe);
            self.state.stream_open = false;
            if status.is_ok() {
                status = closed;
            }
        }

        let cluster_size = probe.config().drive.cluster_size;
        let allowed = round_up(self.state.file_size, cluster_size) as u64;
        if status.is_ok() && self.state.size_transferred > allowed {
            log::debug!(
                "received {} bytes for a {} byte file",
                self.state.size_transferred,
                self.state.file_size
            );
            status = Err(Error::FileBounds);
        }

        match status {
            Ok(()) => log::info!("transfer finished"),
            Err(e) => log::warn!("transfer failed: {}", e),
        }
        if let Err(Error::Internal(at)) = status {
            self.record_assertion(AssertRecord::new(at, probe.config().mode));
        }
        self.status = status;
    }

    fn handle_command<P: Board + Drive>(&mut self, probe: &mut P, name: &ShortName, change: FileChange) {
        match change {
            FileChange::Created => {
                if let Some(command) = DriveCommand::from_name(name, probe.config().mode) {
                    self.run_command(probe, command);
                }
            }
            FileChange::Deleted if *name == ASSERT_TXT => {
                log::info!("assertion cleared");
                self.assertion = None;
            }
            _ => {}
        }
    }

    fn run_command<P: Board + Drive>(&mut self, probe: &mut P, command: DriveCommand) {
        if command.is_gated() && !self.settings.automation_allowed && !probe.reset_button_pressed()
        {
            log::warn!("{:?} ignored: automation not allowed", command);
            return;
        }
        log::info!("drive command {:?}", command);

        match command {
            DriveCommand::SwitchMode => {
                if probe.config().mode == ProbeMode::Interface {
                    self.settings.hold_in_bootloader = true;
                }
            }
            DriveCommand::AutoReset => self.settings.auto_reset = true,
            DriveCommand::HardReset => self.settings.auto_reset = false,
            DriveCommand::AutomationOn => {
                if !probe.reset_button_pressed() {
                    log::warn!("automation can only be enabled with the reset button held");
                    return;
                }
                self.settings.automation_allowed = true;
            }
            DriveCommand::AutomationOff => self.settings.automation_allowed = false,
            DriveCommand::Assert => {
                self.assert_failed(probe);
                return;
            }
            DriveCommand::Refresh => {}
            DriveCommand::EraseTarget => {
                if let Err(e) = self.erase_target(probe) {
                    log::warn!("target erase failed: {}", e);
                    self.status = Err(e);
                }
            }
        }
        self.connection.remount();
    }

    fn erase_target<P: Board + Drive>(&mut self, probe: &mut P) -> Result<()> {
        if probe.config().target.is_none() {
            return Err(Error::UnsupportedUpdate);
        }
        if self.streams.is_open() {
            log::warn!("target erase refused while a transfer is running");
            return Err(Error::ErrorDuringTransfer);
        }
        let driver = probe.flash(FlashRegion::Target);
        driver.init()?;
        let erased = driver.erase_chip();
        let released = driver.uninit();
        erased.and(released)
    }

    #[track_caller]
    fn assert_failed<P: Board + ?Sized>(&mut self, probe: &P) {
        if let Error::Internal(at) = Error::internal() {
            self.record_assertion(AssertRecord::new(at, probe.config().mode));
        }
    }
}
