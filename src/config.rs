//! Construction-time attributes.
//!
//! The primitives recognize few options: robustness and priority
//! inheritance for mutexes, the clock for condition variable timeouts, and
//! spin tuning. Sharing across processes is rejected.

use core::time::Duration;
use crate::error::{Error, Result};
use crate::time::ClockId;

/// Who may use a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Threads of this process only.
    #[default]
    Private,
    /// Threads of several processes mapping the same memory. Not supported.
    Shared,
}

impl Scope {
    pub(crate) fn check(self) -> Result<()> {
        match self {
            Scope::Private => Ok(()),
            Scope::Shared => Err(Error::Unsupported),
        }
    }
}

/// What happens when a mutex owner exits while holding the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Robustness {
    /// Waiters block forever.
    #[default]
    Stalled,
    /// The next acquirer is told through [`Error::OwnerDied`].
    Robust,
}

/// Scheduling protocol of a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// No priority adjustments.
    #[default]
    None,
    /// The owner runs at the priority of its highest-priority waiter, where
    /// the kernel supports it. Falls back to [`Protocol::None`] otherwise.
    Inherit,
}

/// Attributes of a [`RecursiveMutex`](crate::raw::RecursiveMutex).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexAttr {
    /// Owner-death behavior.
    pub robustness: Robustness,
    /// Priority protocol.
    pub protocol: Protocol,
    /// Sharing scope.
    pub scope: Scope,
    /// How often a blocked robust locker re-checks whether the owner is
    /// still alive.
    pub robust_poll: Duration,
}

impl MutexAttr {
    /// Stalled, no priority inheritance, process-private.
    pub const fn new() -> MutexAttr {
        MutexAttr {
            robustness: Robustness::Stalled,
            protocol: Protocol::None,
            scope: Scope::Private,
            robust_poll: Duration::from_millis(10),
        }
    }

    /// Sets the owner-death behavior.
    pub const fn robustness(mut self, robustness: Robustness) -> MutexAttr {
        self.robustness = robustness;
        self
    }

    /// Sets the priority protocol.
    pub const fn protocol(mut self, protocol: Protocol) -> MutexAttr {
        self.protocol = protocol;
        self
    }

    /// Sets the sharing scope.
    pub const fn scope(mut self, scope: Scope) -> MutexAttr {
        self.scope = scope;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.scope.check()?;
        if self.robustness == Robustness::Robust && self.protocol == Protocol::Inherit {
            // The kernel's PI owner field holds TIDs; robust owners are
            // registry handles.
            return Err(Error::InvalidArgument);
        }
        if self.robust_poll.is_zero() {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for MutexAttr {
    fn default() -> MutexAttr {
        MutexAttr::new()
    }
}

/// Attributes of a [`Condvar`](crate::raw::Condvar).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CondvarAttr {
    /// Clock that absolute and relative timeouts are measured on.
    pub clock: ClockId,
    /// Sharing scope.
    pub scope: Scope,
}

impl CondvarAttr {
    /// Monotonic clock, process-private.
    pub const fn new() -> CondvarAttr {
        CondvarAttr { clock: ClockId::Monotonic, scope: Scope::Private }
    }

    /// Sets the timeout clock.
    pub const fn clock(mut self, clock: ClockId) -> CondvarAttr {
        self.clock = clock;
        self
    }

    /// Sets the sharing scope.
    pub const fn scope(mut self, scope: Scope) -> CondvarAttr {
        self.scope = scope;
        self
    }
}

/// Backoff schedule of [`SpinLock::lock`](crate::raw::SpinLock::lock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinConfig {
    /// Rounds of busy spinning; round `n` issues `2^n` pause hints.
    pub spin_rounds: u32,
    /// Rounds that yield the time slice after spinning is exhausted.
    pub yield_rounds: u32,
    /// Sleep used once yielding is exhausted.
    pub sleep: Duration,
}

impl SpinConfig {
    /// Six spin rounds, then ten yields, then 1 ms sleeps.
    pub const fn new() -> SpinConfig {
        SpinConfig { spin_rounds: 6, yield_rounds: 10, sleep: Duration::from_millis(1) }
    }
}

impl Default for SpinConfig {
    fn default() -> SpinConfig {
        SpinConfig::new()
    }
}
