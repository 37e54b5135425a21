//! Error taxonomy shared by every core component (spec §7).
//!
//! The core never panics on a recoverable condition; every fallible
//! operation returns `Result<T, Error>`. `Error::Bug` is the exception:
//! it marks an invariant violation and the caller should treat the
//! device as needing an unmount/mount cycle before continuing.

use core::fmt::{self, Display};

/// Everything that can go wrong in the core, independent of the driver
/// backing it. Higher layers (not part of this crate, per spec §1) map
/// these onto user-visible status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No object exists for the given key/path/inode number.
    NotFound,
    /// An insert collided with an existing key (e.g. duplicate `InodeNo`).
    AlreadyExists,
    /// Caller lacks the permission bits required for the operation.
    PermissionDenied,
    /// A directory remove was attempted on a non-empty directory.
    DirectoryNotEmpty,
    /// Malformed arguments (out-of-range offset, zero-length name, ...).
    InvalidInput,
    /// Reached but intentionally unimplemented in this core.
    NotImplemented,
    /// Device exhausted even after garbage collection was attempted.
    NoSpace,
    /// A bounded cache (tree cache, summary cache, PAC) has no room and
    /// none of its entries were evictable.
    OutOfCacheMemory,
    /// An internal invariant was violated. The in-memory state is not
    /// guaranteed consistent until the next mount (spec §4.11).
    Bug,
    /// Persistent hardware failure on an area; it has been retired.
    BadFlash,
    /// A read succeeded after ECC correction. Soft warning, not fatal.
    BitErrorCorrected,
    /// A read's bit errors could not be corrected; the page is lost.
    BitErrorNotCorrected,
    /// Operation requires a mounted device.
    NotMounted,
    /// `mount` was called on an already-mounted device.
    AlreadyMounted,
    /// A name exceeded `maxDirEntryLength` (255 bytes).
    NameTooLong,
    /// Device is mounted read-only.
    ReadOnly,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotFound => "object not found",
            Error::AlreadyExists => "object already exists",
            Error::PermissionDenied => "permission denied",
            Error::DirectoryNotEmpty => "directory not empty",
            Error::InvalidInput => "invalid input",
            Error::NotImplemented => "operation not implemented",
            Error::NoSpace => "no space left on device",
            Error::OutOfCacheMemory => "out of cache memory",
            Error::Bug => "internal invariant violated",
            Error::BadFlash => "persistent flash failure",
            Error::BitErrorCorrected => "bit error corrected",
            Error::BitErrorNotCorrected => "bit error not corrected",
            Error::NotMounted => "device not mounted",
            Error::AlreadyMounted => "device already mounted",
            Error::NameTooLong => "name too long",
            Error::ReadOnly => "read-only filesystem",
        };
        f.write_str(msg)
    }
}

impl Error {
    /// Soft errors are logged but do not abort the calling operation.
    pub fn is_soft(&self) -> bool {
        matches!(self, Error::BitErrorCorrected)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result tag returned from the driver facade (spec §4.1): a read can
/// report a corrected-but-ok state distinct from a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverResult {
    Ok,
    BitErrorCorrected,
    BitErrorNotCorrected,
    Fail,
}

impl DriverResult {
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            DriverResult::Ok => Ok(()),
            DriverResult::BitErrorCorrected => Err(Error::BitErrorCorrected),
            DriverResult::BitErrorNotCorrected => Err(Error::BitErrorNotCorrected),
            DriverResult::Fail => Err(Error::BadFlash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_errors() {
        assert!(Error::BitErrorCorrected.is_soft());
        assert!(!Error::BadFlash.is_soft());
    }

    #[test]
    fn driver_result_conversion() {
        assert_eq!(DriverResult::Ok.into_result(), Ok(()));
        assert_eq!(
            DriverResult::BitErrorCorrected.into_result(),
            Err(Error::BitErrorCorrected)
        );
        assert_eq!(DriverResult::Fail.into_result(), Err(Error::BadFlash));
    }
}
