//! Clocks and deadlines for timed waits.

use core::time::Duration;

pub use crate::sys::timespec::Timespec;

/// Clock a timed wait is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClockId {
    /// Wall-clock time. Jumps when the system time is set.
    Realtime,
    /// Time since an unspecified point; never jumps.
    #[default]
    Monotonic,
    /// Cheaper, tick-granular realtime clock.
    RealtimeCoarse,
    /// Cheaper, tick-granular monotonic clock.
    MonotonicCoarse,
}

impl ClockId {
    /// The precise clock sharing this clock's epoch.
    pub fn base(self) -> ClockId {
        match self {
            ClockId::Realtime | ClockId::RealtimeCoarse => ClockId::Realtime,
            ClockId::Monotonic | ClockId::MonotonicCoarse => ClockId::Monotonic,
        }
    }

    /// This clock if the platform can read it, otherwise its precise base.
    pub(crate) fn resolve(self) -> ClockId {
        if self.base() == self || crate::caps::try_use::<crate::caps::CoarseClock>().is_some() {
            self
        } else {
            self.base()
        }
    }

    pub(crate) fn is_realtime(self) -> bool {
        self.base() == ClockId::Realtime
    }
}

/// An absolute point in time on a particular clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    clock: ClockId,
    at: Timespec,
}

impl Deadline {
    /// A deadline `timeout` from now on the monotonic clock.
    ///
    /// Returns `None` when the deadline is unrepresentable, which callers
    /// treat as "wait forever".
    pub fn after(timeout: Duration) -> Option<Deadline> {
        Deadline::after_on(ClockId::Monotonic, timeout)
    }

    /// A deadline `timeout` from now on `clock`.
    pub fn after_on(clock: ClockId, timeout: Duration) -> Option<Deadline> {
        let clock = clock.resolve();
        let at = Timespec::now(clock).checked_add_duration(&timeout)?;
        Some(Deadline { clock, at })
    }

    /// A deadline at the absolute time `at` on `clock`.
    pub fn at(clock: ClockId, at: Timespec) -> Deadline {
        Deadline { clock: clock.resolve(), at }
    }

    /// The clock this deadline is measured on.
    pub fn clock(&self) -> ClockId {
        self.clock
    }

    /// The absolute expiry time.
    pub fn instant(&self) -> Timespec {
        self.at
    }

    /// Time left, re-read from the clock. `None` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        match self.at.checked_sub_timespec(&Timespec::now(self.clock)) {
            Some(d) if !d.is_zero() => Some(d),
            _ => None,
        }
    }

    /// Whether the deadline has passed.
    pub fn has_expired(&self) -> bool {
        self.remaining().is_none()
    }

    /// The same deadline on the precise clock a kernel wait can use.
    ///
    /// Coarse clocks lag their base by up to a tick, so the conversion
    /// is redone before every wait. `None` once expired.
    #[cfg(target_os = "linux")]
    pub(crate) fn on_base_clock(&self) -> Option<Deadline> {
        let base = self.clock.base();
        if base == self.clock {
            return Some(*self);
        }
        let remaining = self.remaining()?;
        Some(Deadline::after_on(base, remaining).unwrap_or(*self))
    }

    /// Whether a kernel timeout on the base clock also means this deadline
    /// passed on its own clock.
    #[cfg(target_os = "linux")]
    pub(crate) fn confirms_timeout(&self) -> bool {
        self.clock.base() == self.clock || self.has_expired()
    }

    /// The earlier of `self` and `other`, converted to `self`'s clock.
    pub(crate) fn min_after(&self, other: Duration) -> Deadline {
        match Deadline::after_on(self.clock, other) {
            Some(d) if d.at < self.at => d,
            _ => *self,
        }
    }
}
