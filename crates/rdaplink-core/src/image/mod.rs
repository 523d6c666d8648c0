//! Flash image type detection and routing
//!
//! The first bytes of an image decide where it goes: the probe's own
//! firmware images carry a build record at a fixed offset, target images
//! are recognized by their vector table or by carrying explicit addresses.

mod decoder;

pub use decoder::FlashDecoder;

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::board::{ProbeConfig, ProbeMode, TargetConfig};
use crate::error::{Error, Firmware, Result};
use crate::flash::FlashRegion;

/// Bytes buffered before an image type is decided
pub const PREFIX_SIZE: usize = 48;

/// Offset of the [`BuildInfo`] record inside the probe's own images
pub const BUILD_INFO_OFFSET: usize = 0x20;

/// Build key of interface firmware images
pub const BUILD_KEY_INTERFACE: u32 = 0x9B93_9E8F;

/// Build key of bootloader images
pub const BUILD_KEY_BOOTLOADER: u32 = 0x9B93_9D93;

/// Identification record embedded in the probe's own firmware images
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BuildInfo {
    /// Firmware kind key
    pub build_key: U32,
    /// Hardware kit the image was built for
    pub hdk_id: U32,
    /// Firmware version
    pub version: U32,
}

impl BuildInfo {
    /// Read the record out of an image prefix
    pub fn from_prefix(prefix: &[u8]) -> Option<Self> {
        let record = prefix.get(BUILD_INFO_OFFSET..)?;
        BuildInfo::read_from_prefix(record)
            .ok()
            .map(|(info, _)| info)
    }
}

/// Kind of image being received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    /// Probe interface firmware update
    Interface,
    /// Probe bootloader update
    Bootloader,
    /// Application for the target device
    Target,
    /// Not recognized
    Unknown,
}

/// Where a detected image is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashTarget {
    /// Detected image kind
    pub image: ImageType,
    /// Address the first image byte lands at
    pub base: u32,
    /// Flash driver to use
    pub region: FlashRegion,
}

/// Check whether `prefix` starts with a vector table for `target`
///
/// The initial stack pointer must point into (or just past) target RAM,
/// and the reset, NMI and HardFault vectors into target flash.
pub fn validate_bin_nvic(target: &TargetConfig, prefix: &[u8]) -> bool {
    let word = |index: usize| -> Option<u32> {
        let bytes = prefix.get(index * 4..index * 4 + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    };

    let Some(sp) = word(0) else {
        return false;
    };
    if !(target.ram.start as u64..=target.ram.end()).contains(&(sp as u64)) {
        return false;
    }

    (1..=3).all(|index| word(index).is_some_and(|vector| target.flash.contains(vector)))
}

/// Classify an image from its first bytes
///
/// `addr` is the address of the first byte when the format carries
/// addresses. `nvic_valid` tells whether the prefix holds a vector table
/// for the attached target.
pub fn detect_type(
    config: &ProbeConfig,
    prefix: &[u8],
    addr: Option<u32>,
    nvic_valid: bool,
) -> ImageType {
    if let Some(info) = BuildInfo::from_prefix(prefix) {
        if info.hdk_id.get() == config.hdk_id {
            return match info.build_key.get() {
                BUILD_KEY_INTERFACE => ImageType::Interface,
                BUILD_KEY_BOOTLOADER => ImageType::Bootloader,
                key => {
                    log::debug!("unknown build key 0x{:08X}", key);
                    ImageType::Unknown
                }
            };
        }
    }

    if nvic_valid || addr.is_some() {
        return ImageType::Target;
    }

    ImageType::Unknown
}

/// Map an image type to the flash region and base address it belongs to
pub fn resolve(config: &ProbeConfig, image: ImageType, addr: Option<u32>) -> Result<FlashTarget> {
    match image {
        ImageType::Target => {
            let target = config.target.as_ref().ok_or(Error::UnsupportedUpdate)?;
            let base = match addr {
                Some(addr) if !target.flash.contains(addr) => {
                    log::debug!("image address 0x{:08X} outside target flash", addr);
                    return Err(Error::HexInvalidAddress);
                }
                Some(addr) => addr,
                None => target.flash.start,
            };
            Ok(FlashTarget {
                image,
                base,
                region: FlashRegion::Target,
            })
        }
        ImageType::Bootloader if config.mode != ProbeMode::Bootloader => {
            self_update(image, config.bootloader.start, addr, Firmware::Bootloader)
        }
        ImageType::Interface if config.mode != ProbeMode::Interface => {
            self_update(image, config.interface.start, addr, Firmware::Interface)
        }
        _ => Err(Error::UnsupportedUpdate),
    }
}

fn self_update(
    image: ImageType,
    start: u32,
    addr: Option<u32>,
    firmware: Firmware,
) -> Result<FlashTarget> {
    if addr.is_some_and(|addr| addr != start) {
        return Err(Error::WrongUpdateAddress(firmware));
    }
    Ok(FlashTarget {
        image,
        base: start,
        region: FlashRegion::Iap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_image, nvic_image, test_config};

    #[test]
    fn test_build_info_read() {
        let image = build_image(BUILD_KEY_BOOTLOADER, 0x1234_5678, 64);
        let info = BuildInfo::from_prefix(&image).unwrap();
        assert_eq!(info.build_key.get(), BUILD_KEY_BOOTLOADER);
        assert_eq!(info.hdk_id.get(), 0x1234_5678);
        assert!(BuildInfo::from_prefix(&image[..40]).is_none());
    }

    #[test]
    fn test_validate_bin_nvic() {
        let config = test_config();
        let target = config.target.unwrap();
        let image = nvic_image(&target, 64);
        assert!(validate_bin_nvic(&target, &image));

        // Stack pointer just past the end of RAM is the usual reset value
        let mut top = image.clone();
        top[..4].copy_from_slice(&(target.ram.end() as u32).to_le_bytes());
        assert!(validate_bin_nvic(&target, &top));

        let mut bad_sp = image.clone();
        bad_sp[..4].copy_from_slice(&0x1000u32.to_le_bytes());
        assert!(!validate_bin_nvic(&target, &bad_sp));

        let mut bad_reset = image.clone();
        bad_reset[4..8].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        assert!(!validate_bin_nvic(&target, &bad_reset));

        assert!(!validate_bin_nvic(&target, &image[..12]));
    }

    #[test]
    fn test_detect_type() {
        let config = test_config();
        let intf = build_image(BUILD_KEY_INTERFACE, config.hdk_id, 48);
        let bl = build_image(BUILD_KEY_BOOTLOADER, config.hdk_id, 48);
        let other = build_image(0x1111_1111, config.hdk_id, 48);
        let foreign = build_image(BUILD_KEY_INTERFACE, config.hdk_id ^ 1, 48);

        assert_eq!(detect_type(&config, &intf, None, false), ImageType::Interface);
        assert_eq!(detect_type(&config, &bl, Some(0), false), ImageType::Bootloader);
        assert_eq!(detect_type(&config, &other, Some(0), true), ImageType::Unknown);
        assert_eq!(detect_type(&config, &foreign, None, false), ImageType::Unknown);
        assert_eq!(detect_type(&config, &foreign, None, true), ImageType::Target);
        assert_eq!(detect_type(&config, &foreign, Some(0x100), false), ImageType::Target);
    }

    #[test]
    fn test_resolve_self_update() {
        let config = test_config();
        let bl_start = config.bootloader.start;

        let ok = resolve(&config, ImageType::Bootloader, Some(bl_start)).unwrap();
        assert_eq!(ok.base, bl_start);
        assert_eq!(ok.region, FlashRegion::Iap);
        assert_eq!(
            resolve(&config, ImageType::Bootloader, None).unwrap().base,
            bl_start
        );
        assert_eq!(
            resolve(&config, ImageType::Bootloader, Some(bl_start + 0x100)),
            Err(Error::WrongUpdateAddress(Firmware::Bootloader))
        );
        // Interface firmware cannot rewrite itself
        assert_eq!(
            resolve(&config, ImageType::Interface, Some(config.interface.start)),
            Err(Error::UnsupportedUpdate)
        );
        assert_eq!(
            resolve(&config, ImageType::Unknown, None),
            Err(Error::UnsupportedUpdate)
        );
    }

    #[test]
    fn test_resolve_from_bootloader() {
        let mut config = test_config();
        config.mode = ProbeMode::Bootloader;
        let start = config.interface.start;
        assert_eq!(
            resolve(&config, ImageType::Interface, Some(start + 4)),
            Err(Error::WrongUpdateAddress(Firmware::Interface))
        );
        assert_eq!(
            resolve(&config, ImageType::Interface, None).unwrap().base,
            start
        );
        assert_eq!(
            resolve(&config, ImageType::Bootloader, None),
            Err(Error::UnsupportedUpdate)
        );
    }

    #[test]
    fn test_resolve_target() {
        let mut config = test_config();
        let flash = config.target.unwrap().flash;
        let bin = resolve(&config, ImageType::Target, None).unwrap();
        assert_eq!(bin.base, flash.start);
        assert_eq!(bin.region, FlashRegion::Target);

        let hex = resolve(&config, ImageType::Target, Some(flash.start + 0x8000)).unwrap();
        assert_eq!(hex.base, flash.start + 0x8000);
        assert_eq!(
            resolve(&config, ImageType::Target, Some(flash.end() as u32)),
            Err(Error::HexInvalidAddress)
        );

        config.target = None;
        assert_eq!(
            resolve(&config, ImageType::Target, None),
            Err(Error::UnsupportedUpdate)
        );
    }
}
