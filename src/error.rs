//! Portable status codes and the abort path for misuse.
//!
//! Every fallible operation in this crate returns [`Result`]. The variants
//! cover what a POSIX threading layer reports (`EBUSY`, `ETIMEDOUT`,
//! `EOWNERDEAD`, ...) without tying callers to a platform's numbering.
//! Native codes are folded in through [`Error::from_errno`] on Linux and
//! [`Error::from_win32`] on Windows.

use core::fmt;
use core::panic::Location;
use thiserror::Error;

/// Status reported by a synchronization primitive.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// The primitive is held by someone else and the call would not block.
    #[error("resource busy")]
    Busy,

    /// The deadline passed before the operation could complete.
    #[error("operation timed out")]
    TimedOut,

    /// An argument or attribute combination is not valid here.
    #[error("invalid argument")]
    InvalidArgument,

    /// A looked-up entity does not exist.
    #[error("not found")]
    NotFound,

    /// The caller is not the owner the operation requires.
    #[error("caller does not own the lock")]
    InvalidOwner,

    /// The lock was acquired, but its previous owner exited while holding
    /// it. The protected state may be inconsistent.
    ///
    /// The caller holds the lock when this is returned.
    #[error("previous owner died while holding the lock")]
    OwnerDied,

    /// A robust lock was released without being marked consistent and can
    /// never be acquired again.
    #[error("lock is not recoverable")]
    NotRecoverable,

    /// Blocking here would deadlock the calling thread against itself.
    #[error("resource deadlock would occur")]
    Deadlock,

    /// A transient condition; the operation may succeed when retried.
    #[error("operation would block")]
    WouldBlock,

    /// The platform lacks a facility the operation needs.
    #[error("operation not supported")]
    Unsupported,

    /// A fixed-capacity table is full.
    #[error("resource exhausted")]
    Exhausted,

    /// The calling thread observed a cancellation request.
    #[error("cancelled")]
    Cancelled,

    /// A native error code with no portable counterpart.
    #[error("os error {0}")]
    Os(i32),
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(target_os = "linux")]
impl Error {
    /// Maps a Linux `errno` value onto the portable status.
    pub fn from_errno(errno: i32) -> Error {
        match errno {
            nc::EBUSY => Error::Busy,
            nc::ETIMEDOUT => Error::TimedOut,
            nc::EINVAL => Error::InvalidArgument,
            nc::ENOENT | nc::ESRCH => Error::NotFound,
            nc::EPERM => Error::InvalidOwner,
            nc::EOWNERDEAD => Error::OwnerDied,
            nc::ENOTRECOVERABLE => Error::NotRecoverable,
            nc::EDEADLK => Error::Deadlock,
            nc::EAGAIN | nc::EINTR => Error::WouldBlock,
            nc::ENOSYS | nc::EOPNOTSUPP => Error::Unsupported,
            nc::ENOMEM => Error::Exhausted,
            nc::ECANCELED => Error::Cancelled,
            other => Error::Os(other),
        }
    }
}

#[cfg(target_os = "linux")]
impl From<syscalls::Errno> for Error {
    fn from(errno: syscalls::Errno) -> Error {
        Error::from_errno(errno.into_raw())
    }
}

#[cfg(windows)]
impl Error {
    /// Maps a Win32 `GetLastError` value onto the portable status.
    pub fn from_win32(code: u32) -> Error {
        use windows_sys::Win32::Foundation::*;

        match code {
            ERROR_BUSY | ERROR_LOCK_VIOLATION => Error::Busy,
            ERROR_TIMEOUT | WAIT_TIMEOUT => Error::TimedOut,
            ERROR_INVALID_PARAMETER | ERROR_INVALID_HANDLE => Error::InvalidArgument,
            ERROR_NOT_FOUND | ERROR_FILE_NOT_FOUND => Error::NotFound,
            ERROR_NOT_OWNER | ERROR_ACCESS_DENIED => Error::InvalidOwner,
            ERROR_POSSIBLE_DEADLOCK => Error::Deadlock,
            ERROR_NOT_SUPPORTED | ERROR_CALL_NOT_IMPLEMENTED => Error::Unsupported,
            ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY => Error::Exhausted,
            ERROR_CANCELLED | ERROR_OPERATION_ABORTED => Error::Cancelled,
            other => Error::Os(other as i32),
        }
    }

    /// Translates the calling thread's last Win32 error.
    pub(crate) fn last_os_error() -> Error {
        let code = unsafe { windows_sys::Win32::Foundation::GetLastError() };
        Error::from_win32(code)
    }
}

/// Terminates the process because a primitive was misused.
///
/// A misused lock has broken invariants that nobody can repair, so there is
/// nothing to unwind to. The diagnostic goes to the `log` facade and to
/// stderr, since a logger may not be installed.
#[cold]
#[inline(never)]
pub(crate) fn fatal_at(primitive: &str, message: fmt::Arguments<'_>, location: &Location<'_>) -> ! {
    log::error!("{primitive}: {message} (at {location})");
    std::eprintln!("fatal: {primitive}: {message} (at {location})");
    std::process::abort()
}

/// Aborts with the caller's location. Use inside `#[track_caller]` methods.
macro_rules! fatal {
    ($primitive:expr, $($arg:tt)+) => {
        $crate::error::fatal_at($primitive, format_args!($($arg)+), ::core::panic::Location::caller())
    };
}

pub(crate) use fatal;
