use core::time::Duration;
use crate::time::ClockId;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// A point in time on some clock, as seconds plus nanoseconds.
///
/// Which clock the value belongs to is tracked by the caller (see
/// [`Deadline`](crate::time::Deadline)).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    tv_sec: i64,
    tv_nsec: u32,
}

impl Timespec {
    /// The clock's epoch.
    pub const ZERO: Timespec = Timespec { tv_sec: 0, tv_nsec: 0 };

    /// Builds a timestamp, or `None` if `tv_nsec` is not below one second.
    pub const fn new(tv_sec: i64, tv_nsec: i64) -> Option<Timespec> {
        if tv_nsec >= 0 && tv_nsec < NSEC_PER_SEC as i64 {
            Some(Timespec { tv_sec, tv_nsec: tv_nsec as u32 })
        } else {
            None
        }
    }

    /// Reads `clock`. Coarse clocks the platform lacks read their precise
    /// base instead.
    pub fn now(clock: ClockId) -> Timespec {
        now(clock.resolve())
    }

    /// Whole seconds.
    pub fn secs(&self) -> i64 {
        self.tv_sec
    }

    /// Nanoseconds past [`secs`](Self::secs).
    pub fn subsec_nanos(&self) -> u32 {
        self.tv_nsec
    }

    /// Adds `other`, or `None` on overflow.
    pub fn checked_add_duration(&self, other: &Duration) -> Option<Timespec> {
        let mut secs = self.tv_sec.checked_add_unsigned(other.as_secs())?;

        // Nano calculations can't overflow because nanos are <1B which fit
        // in a u32.
        let mut nsec = other.subsec_nanos() + self.tv_nsec;
        if nsec >= NSEC_PER_SEC as u32 {
            nsec -= NSEC_PER_SEC as u32;
            secs = secs.checked_add(1)?;
        }
        Some(Timespec { tv_sec: secs, tv_nsec: nsec })
    }

    /// Time from `earlier` to `self`, or `None` if `earlier` is later.
    pub fn checked_sub_timespec(&self, earlier: &Timespec) -> Option<Duration> {
        if self < earlier {
            return None;
        }
        let (secs, nsec) = if self.tv_nsec >= earlier.tv_nsec {
            (self.tv_sec - earlier.tv_sec, self.tv_nsec - earlier.tv_nsec)
        } else {
            (
                self.tv_sec - earlier.tv_sec - 1,
                self.tv_nsec + NSEC_PER_SEC as u32 - earlier.tv_nsec,
            )
        };
        Some(Duration::new(secs as u64, nsec))
    }

    #[cfg(target_os = "linux")]
    pub(crate) fn to_timespec(&self) -> Option<nc::timespec_t> {
        Some(nc::timespec_t {
            tv_sec: self.tv_sec.try_into().ok()?,
            tv_nsec: self.tv_nsec.try_into().ok()?,
        })
    }
}

#[cfg(target_os = "linux")]
fn now(clock: ClockId) -> Timespec {
    use core::mem::MaybeUninit;

    let id = match clock {
        ClockId::Realtime => nc::CLOCK_REALTIME,
        ClockId::Monotonic => nc::CLOCK_MONOTONIC,
        ClockId::RealtimeCoarse => nc::CLOCK_REALTIME_COARSE,
        ClockId::MonotonicCoarse => nc::CLOCK_MONOTONIC_COARSE,
    };

    let mut t: MaybeUninit<nc::timespec_t> = MaybeUninit::uninit();
    if let Err(errno) = unsafe { nc::clock_gettime(id, &mut *t.as_mut_ptr()) } {
        crate::error::fatal!("clock", "clock_gettime({clock:?}) failed with errno {errno}");
    }
    let t = unsafe { t.assume_init() };
    Timespec { tv_sec: t.tv_sec as i64, tv_nsec: t.tv_nsec as u32 }
}

#[cfg(windows)]
fn now(clock: ClockId) -> Timespec {
    use std::sync::OnceLock;
    use std::time::{Instant, SystemTime, UNIX_EPOCH};

    let elapsed = match clock {
        ClockId::Realtime | ClockId::RealtimeCoarse => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO),
        ClockId::Monotonic | ClockId::MonotonicCoarse => {
            static BASE: OnceLock<Instant> = OnceLock::new();
            BASE.get_or_init(Instant::now).elapsed()
        }
    };
    Timespec { tv_sec: elapsed.as_secs() as i64, tv_nsec: elapsed.subsec_nanos() }
}
