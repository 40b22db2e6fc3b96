/*!
Portable synchronization primitives built directly on the kernel's
wait/wake mechanism: `futex` on Linux and
`WaitOnAddress`/`WakeByAddress*` on Windows. Nothing here delegates to the
host's native mutex, condition variable or read-write lock.

Two layers are exposed:

* [`raw`] holds the word-level primitives: a two-bit [`raw::FastMutex`], an
  owner-tracked [`raw::RecursiveMutex`] (priority inheritance on Linux,
  robust owner-death recovery everywhere), [`raw::WaitableWord`],
  [`raw::Condvar`], [`raw::RwLock`], [`raw::Barrier`] and [`raw::SpinLock`].
  They use explicit `lock`/`unlock` calls and report through [`Error`].
* [`sync`] wraps them into data-owning RAII types shaped like
  [`std::sync`](https://doc.rust-lang.org/std/sync/index.html).

Misuse (unlocking a lock you do not hold, dropping a locked primitive)
aborts the process with a diagnostic. Timeouts, busy locks and owner death
are ordinary return values.

Only process-private use is supported.
*/

#![cfg(any(target_os = "linux", windows))]
#![warn(missing_docs, missing_debug_implementations)]

pub mod blocking;
pub mod config;
pub mod error;
pub mod raw;
pub mod registry;
pub mod sync;
pub mod time;
mod sys;
mod tests;

pub use error::{Error, Result};
pub use sys::caps;
pub use sys::thread::current_id;
