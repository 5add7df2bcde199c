//! Kernel error types and the stable numeric error space shared with the
//! driver-command and system-call ABI.

use core::fmt;

/// Result alias used throughout the kernel.
pub type Result<T> = core::result::Result<T, KernelError>;

/// Kernel-wide error type.
///
/// Every variant has a stable `u32` wire code so driver command returns and
/// syscall results can carry it across the ABI boundary unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Requested operation exists but is not implemented
    NotImplemented,
    /// A parameter failed validation
    BadParameter,
    /// Physical or linear memory exhausted
    NoMemory,
    /// Internal inconsistency (corrupted object, impossible state)
    Unexpected,
    /// Generic input/output failure
    Io,
    /// Caller privilege insufficient for the operation
    NoPermission,
    /// Operation timed out
    Timeout,
    /// No such device
    NoDevice,
    /// Device reported a hardware fault
    Hardware,
    /// Unclassified failure
    Generic,

    // Filesystem-specific codes
    /// Sector is unreadable and unwritable
    BadSector,
    /// Volume has no free space left
    NoSpace,
    /// Sector read failed
    CantReadSector,
    /// Sector write failed
    CantWriteSector,
}

/// Wire code meaning "no error".
pub const ERROR_SUCCESS: u32 = 0;

impl KernelError {
    /// Stable numeric code for the ABI boundary.
    pub const fn code(self) -> u32 {
        match self {
            KernelError::NotImplemented => 1,
            KernelError::BadParameter => 2,
            KernelError::NoMemory => 3,
            KernelError::Unexpected => 4,
            KernelError::Io => 5,
            KernelError::NoPermission => 6,
            KernelError::Timeout => 7,
            KernelError::NoDevice => 8,
            KernelError::Hardware => 9,
            KernelError::Generic => 10,
            KernelError::BadSector => 16,
            KernelError::NoSpace => 17,
            KernelError::CantReadSector => 18,
            KernelError::CantWriteSector => 19,
        }
    }

    /// Decode a wire code. Unknown non-zero codes collapse to `Generic`;
    /// `ERROR_SUCCESS` has no error representation.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(KernelError::NotImplemented),
            2 => Some(KernelError::BadParameter),
            3 => Some(KernelError::NoMemory),
            4 => Some(KernelError::Unexpected),
            5 => Some(KernelError::Io),
            6 => Some(KernelError::NoPermission),
            7 => Some(KernelError::Timeout),
            8 => Some(KernelError::NoDevice),
            9 => Some(KernelError::Hardware),
            16 => Some(KernelError::BadSector),
            17 => Some(KernelError::NoSpace),
            18 => Some(KernelError::CantReadSector),
            19 => Some(KernelError::CantWriteSector),
            _ => Some(KernelError::Generic),
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            KernelError::NotImplemented => "not implemented",
            KernelError::BadParameter => "bad parameter",
            KernelError::NoMemory => "out of memory",
            KernelError::Unexpected => "unexpected kernel state",
            KernelError::Io => "i/o error",
            KernelError::NoPermission => "permission denied",
            KernelError::Timeout => "timed out",
            KernelError::NoDevice => "no such device",
            KernelError::Hardware => "hardware fault",
            KernelError::Generic => "error",
            KernelError::BadSector => "bad sector",
            KernelError::NoSpace => "no space on volume",
            KernelError::CantReadSector => "cannot read sector",
            KernelError::CantWriteSector => "cannot write sector",
        };
        f.write_str(text)
    }
}

/// Convert a kernel result into the `u32` returned to ABI callers.
pub fn code_of<T>(result: &Result<T>) -> u32 {
    match result {
        Ok(_) => ERROR_SUCCESS,
        Err(e) => e.code(),
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        let all = [
            KernelError::NotImplemented,
            KernelError::BadParameter,
            KernelError::NoMemory,
            KernelError::Unexpected,
            KernelError::Io,
            KernelError::NoPermission,
            KernelError::Timeout,
            KernelError::NoDevice,
            KernelError::Hardware,
            KernelError::Generic,
            KernelError::BadSector,
            KernelError::NoSpace,
            KernelError::CantReadSector,
            KernelError::CantWriteSector,
        ];
        for e in all {
            assert_eq!(
                KernelError::from_code(e.code()),
                Some(e),
                "code {} must decode to the same error",
                e.code()
            );
        }
    }

    #[test]
    fn success_is_zero_and_decodes_to_none() {
        assert_eq!(ERROR_SUCCESS, 0);
        assert_eq!(KernelError::from_code(0), None);
    }

    #[test]
    fn unknown_codes_collapse_to_generic() {
        assert_eq!(KernelError::from_code(0xDEAD), Some(KernelError::Generic));
    }
}
