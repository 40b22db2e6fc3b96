pub mod caps;
pub mod thread;
pub mod timespec;

#[cfg(target_os = "linux")]
pub mod futex;
#[cfg(target_os = "linux")]
pub(crate) use futex::{futex_wait, futex_wake, futex_wake_all};

#[cfg(windows)]
mod wait_on_address;
#[cfg(windows)]
pub(crate) use wait_on_address::{futex_wait, futex_wake, futex_wake_all};
