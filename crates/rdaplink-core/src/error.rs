//! Error types for rdaplink-core
//!
//! Every failure a drag-and-drop transfer can end with is a variant of
//! [`Error`]. The `Display` text is the message shown to the user in
//! `FAIL.TXT`, and [`Error::kind`] yields the categories listed next to it.

use core::fmt;
use core::panic::Location;

use bitflags::bitflags;

bitflags! {
    /// Categories an error belongs to (combinable)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ErrorKind: u8 {
        /// Logic bug inside the probe firmware
        const INTERNAL = 1 << 0;
        /// Retrying may succeed
        const TRANSIENT = 1 << 1;
        /// Caused by what the user did or sent
        const USER = 1 << 2;
        /// Fault reported by the target device
        const TARGET = 1 << 3;
        /// Fault inside the probe's own flash
        const INTERFACE = 1 << 4;
    }
}

impl ErrorKind {
    /// Category names in a fixed order
    pub const NAMES: [(ErrorKind, &'static str); 5] = [
        (ErrorKind::INTERNAL, "internal"),
        (ErrorKind::TRANSIENT, "transient"),
        (ErrorKind::USER, "user"),
        (ErrorKind::TARGET, "target"),
        (ErrorKind::INTERFACE, "interface"),
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Source location of a violated internal invariant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assertion {
    /// Source file
    pub file: &'static str,
    /// Source line
    pub line: u32,
}

impl Assertion {
    /// Capture the caller's location
    #[track_caller]
    pub fn here() -> Self {
        let loc = Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }
}

/// Which of the probe's own firmware images an update was aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Firmware {
    /// Interface firmware (the application running on the probe)
    Interface,
    /// Bootloader that updates the interface firmware
    Bootloader,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Shared
    /// Unspecified failure
    Failure,
    /// An internal invariant was violated
    Internal(Assertion),

    // Drag-and-drop transfer
    /// Generic transfer failure
    ErrorDuringTransfer,
    /// Host disconnected before the image was complete
    TransferTimeout,
    /// More data arrived than the file size allows
    FileBounds,
    /// A sector inside the file arrived out of order
    OutOfOrderSector,

    // Target flash
    /// Target flash init failed
    TargetInit,
    /// Sector erase failed
    EraseSector,
    /// Chip erase failed
    EraseAll,
    /// Page program failed
    Write,
    /// Verify after program failed
    WriteVerify,

    // File stream
    /// A stream is already open
    AlreadyOpen,
    /// Hex record checksum mismatch
    HexChecksum,
    /// Malformed hex file
    HexParser,
    /// Hex record addresses memory outside the target flash
    HexInvalidAddress,

    // Flash image decoder
    /// A probe firmware update was sent to the wrong address
    WrongUpdateAddress(Firmware),
    /// The image kind cannot be programmed by this probe
    UnsupportedUpdate,

    // Interface flash (in-application programming)
    /// Interface flash init failed
    IapInit,
    /// Interface flash uninit failed
    IapUninit,
    /// Interface flash program failed
    IapWrite,
    /// Interface flash sector erase failed
    IapEraseSector,
    /// Interface flash chip erase failed
    IapEraseAll,
    /// Write outside the interface flash region
    IapOutOfBounds,
}

impl Error {
    /// Build an internal error at the caller's location and log it
    #[track_caller]
    pub fn internal() -> Self {
        let at = Assertion::here();
        log::error!("assertion failed at {}:{}", at.file, at.line);
        Error::Internal(at)
    }

    /// Message shown to the user
    pub fn message(&self) -> &'static str {
        match self {
            Self::Failure => "An error has occurred",
            Self::Internal(_) => "An internal error has occurred",
            Self::ErrorDuringTransfer => "An error occurred during the transfer",
            Self::TransferTimeout => "The transfer timed out.",
            Self::FileBounds => "Possible mismatch between file size and size programmed",
            Self::OutOfOrderSector => {
                "File sent out of order by PC. Target might not be programmed correctly."
            }
            Self::TargetInit => "The interface firmware FAILED to initialize the target MCU",
            Self::EraseSector => "Flash algorithm erase sector command FAILURE",
            Self::EraseAll => "Flash algorithm erase all command FAILURE",
            Self::Write => "Flash algorithm write command FAILURE",
            Self::WriteVerify => "Flash algorithm write verify command FAILURE",
            Self::AlreadyOpen => "A file stream is already open",
            Self::HexChecksum => "The hex file cannot be decoded. Checksum calculation failure occurred.",
            Self::HexParser => "The hex file cannot be decoded. Parser logic failure occurred.",
            Self::HexInvalidAddress => "The hex file you dropped isn't compatible with this mode or device. Are you in MAINTENANCE mode? See HELP FAQ.HTM",
            Self::WrongUpdateAddress(Firmware::Bootloader) => {
                "The starting address for the bootloader update is wrong."
            }
            Self::WrongUpdateAddress(Firmware::Interface) => {
                "The starting address for the interface update is wrong."
            }
            Self::UnsupportedUpdate => "The application file format is unknown and cannot be parsed and/or processed.",
            Self::IapInit => "In application programming initialization failed.",
            Self::IapUninit => "In application programming uninit failed.",
            Self::IapWrite => "In application programming write failed.",
            Self::IapEraseSector => "In application programming sector erase failed.",
            Self::IapEraseAll => "In application programming mass erase failed.",
            Self::IapOutOfBounds => "In application programming aborted due to an out of bounds address.",
        }
    }

    /// Categories of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Failure | Self::Internal(_) | Self::AlreadyOpen => ErrorKind::INTERNAL,
            Self::ErrorDuringTransfer | Self::TransferTimeout | Self::OutOfOrderSector => {
                ErrorKind::USER | ErrorKind::TRANSIENT
            }
            Self::FileBounds => ErrorKind::TRANSIENT,
            Self::TargetInit
            | Self::EraseSector
            | Self::EraseAll
            | Self::Write
            | Self::WriteVerify => ErrorKind::TARGET,
            Self::HexChecksum | Self::HexParser => ErrorKind::USER | ErrorKind::TRANSIENT,
            Self::HexInvalidAddress => ErrorKind::USER,
            Self::WrongUpdateAddress(_) | Self::UnsupportedUpdate => ErrorKind::USER,
            Self::IapInit
            | Self::IapUninit
            | Self::IapWrite
            | Self::IapEraseSector
            | Self::IapEraseAll
            | Self::IapOutOfBounds => ErrorKind::INTERFACE,
        }
    }

    /// Whether this is a violated internal invariant
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_kind_display_lists_categories_in_order() {
        let kind = ErrorKind::TARGET | ErrorKind::USER;
        assert_eq!(kind.to_string(), "user, target");
        assert_eq!(ErrorKind::empty().to_string(), "");
    }

    #[test]
    fn test_internal_captures_caller() {
        let err = Error::internal();
        match err {
            Error::Internal(at) => {
                assert!(at.file.ends_with("error.rs"));
                assert!(at.line > 0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.is_internal());
        assert_eq!(err.kind(), ErrorKind::INTERNAL);
    }

    #[test]
    fn test_wrong_update_address_names_region() {
        let bl = Error::WrongUpdateAddress(Firmware::Bootloader).to_string();
        let intf = Error::WrongUpdateAddress(Firmware::Interface).to_string();
        assert!(bl.contains("bootloader"));
        assert!(intf.contains("interface"));
    }
}
