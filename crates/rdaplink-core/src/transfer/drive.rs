//! Types shared with the emulated FAT drive
//!
//! The drive itself (USB mass storage, FAT bookkeeping) lives outside this
//! crate. It reports sector writes and directory changes to the
//! [`TransferManager`](super::TransferManager) and is driven back through
//! the [`Drive`] trait.

use core::fmt;

use crate::diag::Diagnostics;
use crate::error::Result;
use crate::transfer::Settings;

/// An 8.3 directory entry name, space padded (`b"FIRMWAREBIN"`)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName(pub [u8; 11]);

impl ShortName {
    /// Wrap a raw directory entry name
    pub const fn new(raw: &[u8; 11]) -> Self {
        Self(*raw)
    }

    /// Convert a `NAME.EXT` file name, upper-casing it
    ///
    /// Returns `None` if either part is too long or empty.
    pub fn from_8_3(name: &str) -> Option<Self> {
        let (base, ext) = match name.rsplit_once('.') {
            Some((base, ext)) => (base, ext),
            None => (name, ""),
        };
        if base.is_empty() || base.len() > 8 || ext.len() > 3 {
            return None;
        }
        if !name.is_ascii() || name.contains(' ') {
            return None;
        }

        let mut raw = [b' '; 11];
        for (dst, src) in raw.iter_mut().zip(base.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        for (dst, src) in raw[8..].iter_mut().zip(ext.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        Some(Self(raw))
    }

    /// Base name without padding
    pub fn base(&self) -> &[u8] {
        trim_padding(&self.0[..8])
    }

    /// Extension without padding
    pub fn extension(&self) -> &[u8] {
        trim_padding(&self.0[8..])
    }
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let len = field.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &field[..len]
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.base() {
            write!(f, "{}", b as char)?;
        }
        if !self.extension().is_empty() {
            f.write_str(".")?;
            for &b in self.extension() {
                write!(f, "{}", b as char)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({})", self)
    }
}

/// Identifies a directory entry for as long as it exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u32);

/// Directory entry contents after a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileInfo {
    /// First data sector, if a cluster has been allocated
    pub start_sector: Option<u32>,
    /// File size in bytes
    pub size: u32,
    /// Hidden attribute set
    pub hidden: bool,
}

/// Kind of directory entry change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChange {
    /// A new entry appeared
    Created,
    /// Size or start sector of an entry changed
    Changed,
    /// An entry was removed
    Deleted,
}

/// Hooks into the emulated drive
pub trait Drive {
    /// Make the medium present or absent for the host
    fn set_media_ready(&mut self, ready: bool);

    /// Recreate the drive contents
    ///
    /// Called every time the drive (re)appears; `diagnostics` tells which
    /// status files to publish.
    fn rebuild(&mut self, diagnostics: &Diagnostics<'_>);

    /// The drive is about to disappear for a remount
    ///
    /// Boards reset the target or switch firmware here, depending on the
    /// outcome of the last transfer.
    fn disconnecting(&mut self, _status: Result<()>, _settings: &Settings) {}

    /// Whether the board's reset button is held down
    fn reset_button_pressed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_short_name() {
        let name = ShortName::from_8_3("firmware.bin").unwrap();
        assert_eq!(&name.0, b"FIRMWAREBIN");
        assert_eq!(name.extension(), b"BIN");
        assert_eq!(name.to_string(), "FIRMWARE.BIN");

        let name = ShortName::from_8_3("AUTO_ON.CFG").unwrap();
        assert_eq!(name, ShortName::new(b"AUTO_ON CFG"));
        assert_eq!(name.base(), b"AUTO_ON");

        let bare = ShortName::from_8_3("README").unwrap();
        assert_eq!(bare.extension(), b"");
        assert_eq!(bare.to_string(), "README");

        assert_eq!(ShortName::from_8_3("TOOLONGNAME.BIN"), None);
        assert_eq!(ShortName::from_8_3("A.TEXT"), None);
        assert_eq!(ShortName::from_8_3(".HEX"), None);
        assert_eq!(ShortName::from_8_3("MY FILE.HEX"), None);
    }

    #[derive(Default)]
    struct MediaOnly {
        ready: bool,
        rebuilds: usize,
    }

    impl Drive for MediaOnly {
        fn set_media_ready(&mut self, ready: bool) {
            self.ready = ready;
        }

        fn rebuild(&mut self, _diagnostics: &Diagnostics<'_>) {
            self.rebuilds += 1;
        }
    }

    #[test]
    fn test_default_hooks_do_nothing() {
        let mut drive = MediaOnly::default();
        drive.set_media_ready(true);
        drive.disconnecting(Err(crate::error::Error::TransferTimeout), &Settings::default());
        drive.disconnecting(Ok(()), &Settings::default());
        assert!(drive.ready);
        assert_eq!(drive.rebuilds, 0);
        assert!(!drive.reset_button_pressed());
    }
}
