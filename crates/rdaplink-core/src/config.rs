//! TOML board description
//!
//! Describes a probe, its target and its drive in one file:
//!
//! ```toml
//! [probe]
//! mode = "interface"
//! hdk_id = 0x0240
//! board_id = 0x9903
//! unique_id = "0240000032044e4500257009997b00386781000097969900"
//! version = "0254"
//! url = "https://mbed.org/device/?code=@U"
//!
//! [bootloader]
//! start = 0x00000000
//! size = "32 KiB"
//!
//! [interface]
//! start = 0x00008000
//! size = "96 KiB"
//!
//! [target]
//! flash_start = 0x00000000
//! flash_size = "512 KiB"
//! ram_start = 0x20000000
//! ram_size = "128 KiB"
//! page_size = 256
//! sector_size = "4 KiB"
//!
//! [drive]
//! sector_size = 512
//! cluster_size = "4 KiB"
//! ```

use std::format;
use std::fs;
use std::path::{Path, PathBuf};
use std::string::{String, ToString};

use serde::Deserialize;
use thiserror::Error;

use crate::board::{DriveGeometry, MemoryRange, ProbeConfig, ProbeMode, TargetConfig};
use crate::diag::ProbeInfo;
use crate::flash::BUFFER_SIZE;
use crate::transfer::{ConnectionDelays, Settings};

/// Errors loading a board description
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unexpected fields
    #[error("invalid board description: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is inconsistent with the rest of the description
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Program/erase granularity of a flash region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    /// Program page size
    pub page_size: u32,
    /// Erase sector size
    pub sector_size: u32,
}

impl Default for FlashGeometry {
    fn default() -> Self {
        Self {
            page_size: 256,
            sector_size: 4096,
        }
    }
}

/// Owned identity strings, see [`ProbeInfo`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeDetails {
    /// Unique id of the probe
    pub unique_id: String,
    /// Board id as shown on the drive
    pub board_id: String,
    /// HDK id as shown on the drive
    pub hdk_id: String,
    /// Firmware version
    pub version: String,
    /// Board web page
    pub url: String,
}

/// A parsed board description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardFile {
    /// Pipeline configuration
    pub config: ProbeConfig,
    /// Identity strings for generated files
    pub details: ProbeDetails,
    /// Initial settings
    pub settings: Settings,
    /// Target flash geometry
    pub target_flash: FlashGeometry,
    /// Probe flash geometry
    pub iap_flash: FlashGeometry,
}

impl BoardFile {
    /// Load a board description from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a board description from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: TomlBoardFile = toml::from_str(content)?;

        let target = file.target.map(|t| {
            (
                TargetConfig {
                    flash: MemoryRange::new(t.flash_start, t.flash_size.0),
                    ram: MemoryRange::new(t.ram_start, t.ram_size.0),
                },
                FlashGeometry {
                    page_size: t.page_size.0,
                    sector_size: t.sector_size.0,
                },
            )
        });
        let drive = file.drive.unwrap_or_default();
        let delays = file.delays.unwrap_or_default();
        let settings = file.settings.unwrap_or_default();
        let iap = file.iap.unwrap_or_default();

        let probe = file.probe;
        let details = ProbeDetails {
            unique_id: probe.unique_id.unwrap_or_default(),
            board_id: probe
                .board_id
                .map(|id| format!("{:04X}", id))
                .unwrap_or_default(),
            hdk_id: format!("{:04X}", probe.hdk_id),
            version: probe.version.unwrap_or_default(),
            url: probe.url.unwrap_or_default(),
        };

        let board_id = probe
            .board_id
            .map(|id| {
                u16::try_from(id).map_err(|_| ConfigError::Invalid {
                    field: "probe.board_id",
                    reason: format!("0x{:X} does not fit in 16 bits", id),
                })
            })
            .transpose()?;

        let board = BoardFile {
            config: ProbeConfig {
                mode: probe.mode,
                hdk_id: probe.hdk_id,
                interface: file.interface.range(),
                bootloader: file.bootloader.range(),
                target: target.map(|(t, _)| t),
                board_id,
                drive: DriveGeometry {
                    sector_size: drive.sector_size.0,
                    cluster_size: drive.cluster_size.0,
                },
                delays: ConnectionDelays {
                    connect_ms: delays.connect_ms,
                    disconnect_ms: delays.disconnect_ms,
                    reconnect_ms: delays.reconnect_ms,
                },
            },
            details,
            settings: Settings {
                auto_reset: settings.auto_reset,
                automation_allowed: settings.automation_allowed,
                hold_in_bootloader: false,
            },
            target_flash: target.map(|(_, g)| g).unwrap_or_default(),
            iap_flash: FlashGeometry {
                page_size: iap.page_size.0,
                sector_size: iap.sector_size.0,
            },
        };
        board.validate()?;
        Ok(board)
    }

    /// Identity strings borrowed for rendering
    pub fn info(&self) -> ProbeInfo<'_> {
        ProbeInfo {
            unique_id: &self.details.unique_id,
            board_id: &self.details.board_id,
            hdk_id: &self.details.hdk_id,
            version: &self.details.version,
            url: &self.details.url,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let drive = &self.config.drive;
        if drive.sector_size == 0 || drive.cluster_size % drive.sector_size != 0 {
            return Err(invalid(
                "drive",
                "cluster size must be a non-zero multiple of the sector size",
            ));
        }
        check_geometry("target", &self.target_flash)?;
        check_geometry("iap", &self.iap_flash)?;
        if self.config.target.is_some_and(|t| t.flash.size == 0) {
            return Err(invalid("target.flash_size", "must not be zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn check_geometry(field: &'static str, geometry: &FlashGeometry) -> Result<(), ConfigError> {
    let page = geometry.page_size;
    if page == 0 || BUFFER_SIZE as u32 % page != 0 {
        return Err(invalid(field, "page size must divide 1024"));
    }
    if geometry.sector_size % page != 0 {
        return Err(invalid(field, "sector size must be a multiple of the page size"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlBoardFile {
    probe: TomlProbe,
    bootloader: TomlRegion,
    interface: TomlRegion,
    target: Option<TomlTarget>,
    iap: Option<TomlGeometry>,
    drive: Option<TomlDrive>,
    delays: Option<TomlDelays>,
    settings: Option<TomlSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlProbe {
    mode: ProbeMode,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    hdk_id: u32,
    #[serde(default, deserialize_with = "deserialize_opt_hex_u32")]
    board_id: Option<u32>,
    unique_id: Option<String>,
    version: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlRegion {
    #[serde(deserialize_with = "deserialize_hex_u32")]
    start: u32,
    size: Size,
}

impl TomlRegion {
    fn range(&self) -> MemoryRange {
        MemoryRange::new(self.start, self.size.0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlTarget {
    #[serde(deserialize_with = "deserialize_hex_u32")]
    flash_start: u32,
    flash_size: Size,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    ram_start: u32,
    ram_size: Size,
    #[serde(default = "default_page")]
    page_size: Size,
    #[serde(default = "default_sector")]
    sector_size: Size,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlGeometry {
    #[serde(default = "default_page")]
    page_size: Size,
    #[serde(default = "default_sector")]
    sector_size: Size,
}

impl Default for TomlGeometry {
    fn default() -> Self {
        Self {
            page_size: default_page(),
            sector_size: default_sector(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlDrive {
    #[serde(default = "default_disk_sector")]
    sector_size: Size,
    #[serde(default = "default_cluster")]
    cluster_size: Size,
}

impl Default for TomlDrive {
    fn default() -> Self {
        Self {
            sector_size: default_disk_sector(),
            cluster_size: default_cluster(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TomlDelays {
    connect_ms: u32,
    disconnect_ms: u32,
    reconnect_ms: u32,
}

impl Default for TomlDelays {
    fn default() -> Self {
        let d = ConnectionDelays::default();
        Self {
            connect_ms: d.connect_ms,
            disconnect_ms: d.disconnect_ms,
            reconnect_ms: d.reconnect_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TomlSettings {
    auto_reset: bool,
    automation_allowed: bool,
}

impl Default for TomlSettings {
    fn default() -> Self {
        let s = Settings::default();
        Self {
            auto_reset: s.auto_reset,
            automation_allowed: s.automation_allowed,
        }
    }
}

fn default_page() -> Size {
    Size(256)
}

fn default_sector() -> Size {
    Size(4096)
}

fn default_disk_sector() -> Size {
    Size(512)
}

fn default_cluster() -> Size {
    Size(4096)
}

/// A byte count written as a number or a string like "32 KiB"
#[derive(Debug, Clone, Copy)]
struct Size(u32);

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match HexOrInt::deserialize(deserializer)? {
            HexOrInt::Int(n) => Ok(Size(n)),
            HexOrInt::Str(s) => parse_size(&s).map(Size).map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_opt_hex_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_hex_u32(deserializer).map(Some)
}

/// Parse a number that can be hex (0x...) or decimal
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size string like "32 KiB" or "4096"
fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let lower = s.to_lowercase();
    let (num, multiplier) = if let Some(n) = lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let num: u32 = num.parse().map_err(|_| format!("invalid size: {}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {}", s))
}
