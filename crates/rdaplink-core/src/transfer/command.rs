//! Command files
//!
//! Creating a file with a well-known name on the drive changes a setting or
//! triggers an action instead of starting a transfer.

use crate::board::ProbeMode;
use crate::transfer::drive::ShortName;

/// Persistent probe settings the command files act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Reset and run the target automatically after programming
    pub auto_reset: bool,
    /// Accept command files without the reset button held
    pub automation_allowed: bool,
    /// Stay in the bootloader on the next reset
    pub hold_in_bootloader: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_reset: true,
            automation_allowed: false,
            hold_in_bootloader: false,
        }
    }
}

/// Action requested through a command file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveCommand {
    /// Switch to the other firmware (`START_BL.ACT` / `START_IF.ACT`)
    SwitchMode,
    /// Enable automatic target reset (`AUTO_RST.CFG`)
    AutoReset,
    /// Disable automatic target reset (`HARD_RST.CFG`)
    HardReset,
    /// Enable automation (`AUTO_ON.CFG`), needs the reset button
    AutomationOn,
    /// Disable automation (`AUTO_OFF.CFG`)
    AutomationOff,
    /// Record a test assertion (`ASSERT.ACT`)
    Assert,
    /// Remount the drive (`REFRESH.ACT`)
    Refresh,
    /// Chip-erase the target (`ERASE.ACT`)
    EraseTarget,
}

/// `ASSERT.TXT`; deleting it clears the stored assertion
pub const ASSERT_TXT: ShortName = ShortName::new(b"ASSERT  TXT");

/// `FAIL.TXT`
pub const FAIL_TXT: ShortName = ShortName::new(b"FAIL    TXT");

/// `MBED.HTM`
pub const MBED_HTM: ShortName = ShortName::new(b"MBED    HTM");

impl DriveCommand {
    /// Recognize a command file name
    ///
    /// The mode switch file depends on the firmware running.
    pub fn from_name(name: &ShortName, mode: ProbeMode) -> Option<Self> {
        let mode_file = match mode {
            ProbeMode::Interface => b"START_BLACT",
            ProbeMode::Bootloader => b"START_IFACT",
        };
        let cmd = match &name.0 {
            raw if raw == mode_file => Self::SwitchMode,
            b"AUTO_RSTCFG" => Self::AutoReset,
            b"HARD_RSTCFG" => Self::HardReset,
            b"AUTO_ON CFG" => Self::AutomationOn,
            b"AUTO_OFFCFG" => Self::AutomationOff,
            b"ASSERT  ACT" => Self::Assert,
            b"REFRESH ACT" => Self::Refresh,
            b"ERASE   ACT" => Self::EraseTarget,
            _ => return None,
        };
        Some(cmd)
    }

    /// Whether the command needs automation or the reset button
    pub fn is_gated(&self) -> bool {
        matches!(
            self,
            Self::SwitchMode | Self::AutoReset | Self::HardReset | Self::EraseTarget
        )
    }
}
