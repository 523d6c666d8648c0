//! Emulated probe: flash regions plus a drive that records what it was told

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use rdaplink_core::board::{Board, MemoryRange, ProbeConfig, ProbeMode};
use rdaplink_core::diag::{self, Diagnostics, ProbeInfo, FILE_CAPACITY, MBED_HTM_TEMPLATE};
use rdaplink_core::error::Result;
use rdaplink_core::flash::{FlashDriver, FlashRegion};
use rdaplink_core::transfer::{Drive, Settings, ShortName, ASSERT_TXT, FAIL_TXT, MBED_HTM};

use crate::{DummyConfig, DummyFlash};

const DETAILS_TXT: ShortName = ShortName::new(b"DETAILS TXT");

/// Drive contents and the calls the pipeline made on it
#[derive(Debug, Default)]
pub struct DummyDrive {
    media_ready: bool,
    files: BTreeMap<String, String>,
    rebuilds: usize,
    disconnects: Vec<Result<()>>,
    resets: usize,
    button: bool,
}

impl DummyDrive {
    /// Whether the host can see the drive
    pub fn media_ready(&self) -> bool {
        self.media_ready
    }

    /// Generated files by `NAME.EXT`
    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    /// Contents of one generated file
    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// How often the drive was rebuilt
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    /// Transfer status reported at each disconnect
    pub fn disconnects(&self) -> &[Result<()>] {
        &self.disconnects
    }

    /// How often the probe would have rebooted
    pub fn resets(&self) -> usize {
        self.resets
    }

    /// Hold or release the reset button
    pub fn set_button(&mut self, pressed: bool) {
        self.button = pressed;
    }
}

/// Dummy probe
///
/// Owns one [`DummyFlash`] for the target and one for the probe's own
/// update region, and a [`DummyDrive`].
pub struct DummyProbe<'a> {
    config: ProbeConfig,
    info: ProbeInfo<'a>,
    target: DummyFlash,
    iap: DummyFlash,
    drive: DummyDrive,
}

impl<'a> DummyProbe<'a> {
    /// Create a probe with erased flash
    ///
    /// The region of each configuration is overridden to match its role.
    pub fn new(config: ProbeConfig, target: DummyConfig, iap: DummyConfig) -> Self {
        Self {
            config,
            info: ProbeInfo::default(),
            target: DummyFlash::new(DummyConfig {
                region: FlashRegion::Target,
                ..target
            }),
            iap: DummyFlash::new(DummyConfig {
                region: FlashRegion::Iap,
                ..iap
            }),
            drive: DummyDrive::default(),
        }
    }

    /// Use `info` for generated files
    pub fn with_info(mut self, info: ProbeInfo<'a>) -> Self {
        self.info = info;
        self
    }

    /// The region the running firmware may rewrite
    pub fn update_region(config: &ProbeConfig) -> MemoryRange {
        match config.mode {
            ProbeMode::Interface => config.bootloader,
            ProbeMode::Bootloader => config.interface,
        }
    }

    /// Target flash
    pub fn target(&self) -> &DummyFlash {
        &self.target
    }

    /// Mutable target flash
    pub fn target_mut(&mut self) -> &mut DummyFlash {
        &mut self.target
    }

    /// Probe flash
    pub fn iap(&self) -> &DummyFlash {
        &self.iap
    }

    /// Mutable probe flash
    pub fn iap_mut(&mut self) -> &mut DummyFlash {
        &mut self.iap
    }

    /// The emulated drive
    pub fn drive(&self) -> &DummyDrive {
        &self.drive
    }

    /// Mutable emulated drive
    pub fn drive_mut(&mut self) -> &mut DummyDrive {
        &mut self.drive
    }
}

impl Board for DummyProbe<'_> {
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

impl Drive for DummyProbe<'_> {
    fn set_media_ready(&mut self, ready: bool) {
        log::trace!("media ready: {}", ready);
        self.drive.media_ready = ready;
    }

    fn rebuild(&mut self, diagnostics: &Diagnostics<'_>) {
        let drive = &mut self.drive;
        drive.rebuilds += 1;
        drive.files.clear();

        match diag::expand::<FILE_CAPACITY>(MBED_HTM_TEMPLATE, &self.info) {
            Ok(text) => {
                drive.files.insert(MBED_HTM.to_string(), text.as_str().into());
            }
            Err(e) => log::warn!("{}: {}", MBED_HTM, e),
        }
        match diagnostics.details_txt(&self.info) {
            Ok(text) => {
                drive.files.insert(DETAILS_TXT.to_string(), text.as_str().into());
            }
            Err(e) => log::warn!("{}: {}", DETAILS_TXT, e),
        }
        if let Some(text) = diagnostics.fail_txt() {
            drive.files.insert(FAIL_TXT.to_string(), text.as_str().into());
        }
        if let Some(text) = diagnostics.assert_txt() {
            drive.files.insert(ASSERT_TXT.to_string(), text.as_str().into());
        }
    }

    fn disconnecting(&mut self, status: Result<()>, settings: &Settings) {
        self.drive.disconnects.push(status);

        let reboot = match self.config.mode {
            ProbeMode::Bootloader => status.is_ok(),
            ProbeMode::Interface => settings.hold_in_bootloader,
        };
        if reboot {
            log::info!("probe reset requested");
            self.drive.resets += 1;
        }
    }

    fn reset_button_pressed(&self) -> bool {
        self.drive.button
    }
}
