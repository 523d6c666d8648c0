//! Host side of a drag-and-drop copy
//!
//! [`copy_file`] behaves like an operating system copying one file onto
//! the drive: it creates the directory entry, writes the data sectors in
//! order, records the final size and then leaves the drive alone until
//! the probe has remounted it.

use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::RawMutex;
use rdaplink_core::board::Board;
use rdaplink_core::error::{Error, Result};
use rdaplink_core::transfer::{Drive, FileChange, FileHandle, FileInfo, ShortName, TransferManager};

/// How the host lays the file out and paces the copy
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Directory entry name
    pub name: ShortName,
    /// Directory entry handle
    pub handle: FileHandle,
    /// First data sector of the file
    pub start_sector: u32,
    /// Sectors per write request
    pub sectors_per_write: u32,
    /// Abort the copy after this many sectors
    pub stop_after: Option<u32>,
    /// Simulated time per timer tick
    pub tick_ms: u32,
    /// Longest wait for the drive to appear or remount
    pub settle_ms: u32,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            name: ShortName::new(b"FIRMWAREBIN"),
            handle: FileHandle(1),
            start_sector: 64,
            sectors_per_write: 8,
            stop_after: None,
            tick_ms: 10,
            settle_ms: 10_000,
        }
    }
}

/// Outcome of [`copy_file`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    /// Final transfer status
    pub status: Result<()>,
    /// Sectors the host wrote
    pub sectors_written: u32,
    /// Whether the drive went away and came back after the copy
    pub remounted: bool,
    /// Simulated time spent
    pub elapsed_ms: u32,
}

/// Tick the timers until the drive is present
///
/// Returns the simulated time spent, or `None` if the drive did not
/// appear within `limit_ms`.
pub fn wait_for_media<M: RawMutex, P: Board + Drive>(
    manager: &mut TransferManager<'_, M>,
    probe: &mut P,
    tick_ms: u32,
    limit_ms: u32,
) -> Option<u32> {
    let mut elapsed = 0;
    while !manager.media_ready() {
        if elapsed >= limit_ms {
            return None;
        }
        manager.periodic(probe, tick_ms);
        elapsed += tick_ms;
    }
    Some(elapsed)
}

/// Copy `file` onto the drive and wait for the remount
///
/// `progress` is called with the number of file bytes written so far.
pub fn copy_file<M: RawMutex, P: Board + Drive>(
    manager: &mut TransferManager<'_, M>,
    probe: &mut P,
    file: &[u8],
    options: &CopyOptions,
    mut progress: impl FnMut(u64),
) -> CopyReport {
    let tick = options.tick_ms.max(1);
    let Some(mut elapsed) = wait_for_media(manager, probe, tick, options.settle_ms) else {
        log::warn!("drive never appeared");
        return CopyReport {
            status: Err(Error::Failure),
            sectors_written: 0,
            remounted: false,
            elapsed_ms: options.settle_ms,
        };
    };

    let sector_size = probe.config().drive.sector_size.max(1) as usize;
    let total = file.len().div_ceil(sector_size) as u32;
    let limit = options.stop_after.map_or(total, |stop| stop.min(total));
    let per_write = options.sectors_per_write.max(1);
    let size = u32::try_from(file.len()).unwrap_or(u32::MAX);

    manager.file_change(
        probe,
        &options.name,
        FileChange::Created,
        options.handle,
        FileInfo::default(),
    );

    let mut buf = Vec::new();
    let mut written = 0;
    while written < limit {
        let count = per_write.min(limit - written);
        let offset = written as usize * sector_size;
        let end = (offset + count as usize * sector_size).min(file.len());

        buf.clear();
        buf.extend_from_slice(&file[offset..end]);
        buf.resize(count as usize * sector_size, 0);

        manager.sector_write(probe, options.start_sector + written, &buf);
        written += count;
        progress(end as u64);

        manager.periodic(probe, 1);
        elapsed += 1;
    }

    if options.stop_after.is_some_and(|stop| stop < total) {
        log::info!("copy aborted after {} of {} sectors", written, total);
    } else {
        let info = FileInfo {
            start_sector: Some(options.start_sector),
            size,
            hidden: false,
        };
        manager.file_change(probe, &options.name, FileChange::Changed, options.handle, info);
    }

    let mut gone = false;
    let mut remounted = false;
    let mut idle = 0;
    while idle < options.settle_ms {
        manager.periodic(probe, tick);
        idle += tick;
        if !manager.media_ready() {
            gone = true;
        } else if gone {
            remounted = true;
            break;
        }
    }

    CopyReport {
        status: manager.status(),
        sectors_written: written,
        remounted,
        elapsed_ms: elapsed + idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DummyConfig, DummyProbe, Fault, FlashOp};
    use alloc::string::String;
    use alloc::vec;
    use core::fmt::Write;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use rdaplink_core::board::{DriveGeometry, MemoryRange, ProbeConfig, ProbeMode, TargetConfig};
    use rdaplink_core::error::Firmware;
    use rdaplink_core::image::{BUILD_INFO_OFFSET, BUILD_KEY_BOOTLOADER};
    use rdaplink_core::transfer::{ConnectionControl, ConnectionDelays, Settings};

    const HDK: u32 = 0x0240;

    fn config(mode: ProbeMode) -> ProbeConfig {
        ProbeConfig {
            mode,
            hdk_id: HDK,
            bootloader: MemoryRange::new(0, 0x8000),
            interface: MemoryRange::new(0x8000, 0x18000),
            target: Some(TargetConfig {
                flash: MemoryRange::new(0, 0x10000),
                ram: MemoryRange::new(0x2000_0000, 0x4000),
            }),
            board_id: Some(0x9903),
            drive: DriveGeometry::default(),
            delays: ConnectionDelays::default(),
        }
    }

    fn probe(mode: ProbeMode, page_size: u32) -> DummyProbe<'static> {
        let config = config(mode);
        let target = DummyConfig::for_range(MemoryRange::new(0, 0x10000), page_size, 4096);
        let iap = DummyConfig::for_range(DummyProbe::update_region(&config), 256, 1024);
        DummyProbe::new(config, target, iap)
    }

    fn target_image(len: usize) -> Vec<u8> {
        let mut image: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        let words = [0x2000_2000u32, 0x101, 0x201, 0x301];
        for (i, word) in words.iter().enumerate() {
            image[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        image
    }

    fn bootloader_image(len: usize) -> Vec<u8> {
        let mut image: Vec<u8> = (0..len).map(|i| (i * 5 + 1) as u8).collect();
        for (i, word) in [BUILD_KEY_BOOTLOADER, HDK, 1].iter().enumerate() {
            let at = BUILD_INFO_OFFSET + i * 4;
            image[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
        image
    }

    fn hex_record(out: &mut String, kind: u8, offset: u16, data: &[u8]) {
        let [hi, lo] = offset.to_be_bytes();
        let mut sum = (data.len() as u8).wrapping_add(hi).wrapping_add(lo).wrapping_add(kind);
        write!(out, ":{:02X}{:04X}{:02X}", data.len(), offset, kind).unwrap();
        for b in data {
            write!(out, "{:02X}", b).unwrap();
            sum = sum.wrapping_add(*b);
        }
        write!(out, "{:02X}\r\n", sum.wrapping_neg()).unwrap();
    }

    /// Hex file for `data` at `base`; `base` must leave `data` in one 64 KiB bank
    fn hex_file(base: u32, data: &[u8]) -> Vec<u8> {
        let mut out = String::new();
        hex_record(&mut out, 0x04, 0, &((base >> 16) as u16).to_be_bytes());
        for (i, chunk) in data.chunks(16).enumerate() {
            hex_record(&mut out, 0x00, (base as u16).wrapping_add(i as u16 * 16), chunk);
        }
        hex_record(&mut out, 0x01, 0, &[]);
        out.into_bytes()
    }

    fn hex_options() -> CopyOptions {
        CopyOptions {
            name: ShortName::new(b"FIRMWAREHEX"),
            sectors_per_write: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_page_binary() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let mut manager = TransferManager::new(&connection, Settings::default());
        let mut probe = probe(ProbeMode::Interface, 1024);
        manager.init(&mut probe, true);

        let image = target_image(1024);
        let options = CopyOptions {
            sectors_per_write: 1,
            ..Default::default()
        };
        let mut last = 0;
        let report = copy_file(&mut manager, &mut probe, &image, &options, |n| last = n);

        assert_eq!(report.status, Ok(()));
        assert_eq!(report.sectors_written, 2);
        assert!(report.remounted);
        assert_eq!(last, 1024);

        let programs: Vec<_> = probe.target().programs().collect();
        assert_eq!(programs, vec![(0, 1024)]);
        assert_eq!(probe.target().read(0, 1024), Some(&image[..]));
        assert_eq!(probe.drive().file("FAIL.TXT"), None);
        assert!(probe.drive().file("MBED.HTM").is_some());
        assert_eq!(probe.drive().disconnects(), &[Ok(())]);
    }

    #[test]
    fn test_hex_copy() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let mut manager = TransferManager::new(&connection, Settings::default());
        let mut probe = probe(ProbeMode::Interface, 256);
        manager.init(&mut probe, true);

        let image = target_image(2048);
        let file = hex_file(0, &image);
        let report = copy_file(&mut manager, &mut probe, &file, &hex_options(), |_| {});

        assert_eq!(report.status, Ok(()));
        assert_eq!(probe.target().read(0, 2048), Some(&image[..]));
        assert_eq!(probe.target().ops().first(), Some(&FlashOp::Init));
        assert_eq!(probe.target().ops().last(), Some(&FlashOp::Uninit));
    }

    #[test]
    fn test_partial_hex_times_out() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let mut manager = TransferManager::new(&connection, Settings::default());
        let mut probe = probe(ProbeMode::Interface, 256);
        manager.init(&mut probe, true);

        let file = hex_file(0, &target_image(2048));
        let total = file.len().div_ceil(512) as u32;
        assert!(total > 10);

        let options = CopyOptions {
            stop_after: Some(10),
            ..hex_options()
        };
        let report = copy_file(&mut manager, &mut probe, &file, &options, |_| {});

        assert_eq!(report.sectors_written, 10);
        assert_eq!(report.status, Err(Error::TransferTimeout));
        assert!(report.remounted);
        let fail = probe.drive().file("FAIL.TXT").unwrap();
        assert!(fail.starts_with("error: The transfer timed out."));
    }

    #[test]
    fn test_bootloader_update() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let mut manager = TransferManager::new(&connection, Settings::default());
        let mut probe = probe(ProbeMode::Interface, 256);
        manager.init(&mut probe, true);

        let image = bootloader_image(4096);
        let report = copy_file(&mut manager, &mut probe, &hex_file(0, &image), &hex_options(), |_| {});

        assert_eq!(report.status, Ok(()));
        assert_eq!(probe.iap().read(0, 4096), Some(&image[..]));
        assert_eq!(probe.target().programs().count(), 0);
    }

    #[test]
    fn test_bootloader_update_at_wrong_address() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let mut manager = TransferManager::new(&connection, Settings::default());
        let mut probe = probe(ProbeMode::Interface, 256);
        manager.init(&mut probe, true);

        let file = hex_file(0x1000, &bootloader_image(1024));
        let report = copy_file(&mut manager, &mut probe, &file, &hex_options(), |_| {});

        assert_eq!(
            report.status,
            Err(Error::WrongUpdateAddress(Firmware::Bootloader))
        );
        assert_eq!(probe.iap().programs().count(), 0);
        assert!(probe.drive().file("FAIL.TXT").is_some());
    }

    #[test]
    fn test_interface_update_reboots() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let mut manager = TransferManager::new(&connection, Settings::default());
        let mut probe = probe(ProbeMode::Bootloader, 256);
        manager.init(&mut probe, true);

        let mut image = bootloader_image(2048);
        image[BUILD_INFO_OFFSET..BUILD_INFO_OFFSET + 4]
            .copy_from_slice(&rdaplink_core::image::BUILD_KEY_INTERFACE.to_le_bytes());
        let report = copy_file(&mut manager, &mut probe, &image, &CopyOptions::default(), |_| {});

        assert_eq!(report.status, Ok(()));
        assert_eq!(probe.iap().read(0x8000, 2048), Some(&image[..]));
        assert_eq!(probe.drive().resets(), 1);
    }

    #[test]
    fn test_program_failure_is_reported() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let mut manager = TransferManager::new(&connection, Settings::default());
        let mut probe = probe(ProbeMode::Interface, 256);
        probe.target_mut().inject(Some(Fault::ProgramAfter(2)));
        manager.init(&mut probe, true);

        let report = copy_file(&mut manager, &mut probe, &target_image(4096), &CopyOptions::default(), |_| {});

        assert_eq!(report.status, Err(Error::Write));
        let fail = probe.drive().file("FAIL.TXT").unwrap();
        assert!(fail.contains("type: target"));
    }

    #[test]
    fn test_bootloader_program_failure_is_reported() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let mut manager = TransferManager::new(&connection, Settings::default());
        let mut probe = probe(ProbeMode::Interface, 256);
        probe.iap_mut().inject(Some(Fault::ProgramAfter(1)));
        manager.init(&mut probe, true);

        let image = bootloader_image(4096);
        let report = copy_file(&mut manager, &mut probe, &image, &CopyOptions::default(), |_| {});

        assert_eq!(report.status, Err(Error::IapWrite));
        assert_eq!(probe.iap().programs().count(), 1);
        assert_eq!(probe.target().programs().count(), 0);
        let fail = probe.drive().file("FAIL.TXT").unwrap();
        assert!(fail.starts_with("error: In application programming write failed."));
        assert!(fail.contains("type: interface"));
        assert!(!fail.contains("type: target"));
    }

    #[test]
    fn test_erase_command() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let settings = Settings {
            automation_allowed: true,
            ..Default::default()
        };
        let mut manager = TransferManager::new(&connection, settings);
        let mut probe = probe(ProbeMode::Interface, 256);
        manager.init(&mut probe, true);

        manager.file_change(
            &mut probe,
            &ShortName::new(b"ERASE   ACT"),
            FileChange::Created,
            FileHandle(7),
            FileInfo::default(),
        );
        assert_eq!(
            probe.target().ops(),
            &[FlashOp::Init, FlashOp::EraseChip, FlashOp::Uninit]
        );
        assert_eq!(manager.status(), Ok(()));
    }

    #[test]
    fn test_drive_never_appears() {
        let connection = ConnectionControl::<NoopRawMutex>::new(ConnectionDelays::DEFAULT);
        let mut manager = TransferManager::new(&connection, Settings::default());
        let mut probe = probe(ProbeMode::Interface, 256);
        manager.init(&mut probe, false);

        let options = CopyOptions {
            settle_ms: 100,
            ..Default::default()
        };
        let report = copy_file(&mut manager, &mut probe, &target_image(512), &options, |_| {});
        assert_eq!(report.status, Err(Error::Failure));
        assert_eq!(report.sectors_written, 0);
    }
}
