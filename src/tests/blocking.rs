use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::blocking::{self, WaitOutcome};
use crate::caps::{self, CoarseClock, PriorityInheritance};
use crate::time::{ClockId, Deadline, Timespec};
use super::init_logging;

#[test]
fn value_changed_returns_immediately() {
    let word = AtomicU32::new(1);
    assert_eq!(blocking::wait(&word, 0, None), WaitOutcome::ValueChanged);
}

#[test]
fn times_out() {
    let word = AtomicU32::new(0);
    let start = Instant::now();
    let outcome = blocking::wait(&word, 0, Some(Duration::from_millis(20)));
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn realtime_deadline() {
    let word = AtomicU32::new(0);
    let deadline = Deadline::after_on(ClockId::Realtime, Duration::from_millis(5)).unwrap();
    assert_eq!(deadline.clock(), ClockId::Realtime);
    let outcome = blocking::wait_until(&word, 0, Some(&deadline));
    assert!(outcome.timed_out());
    assert!(deadline.has_expired());
}

#[test]
fn wake_one_wakes_a_sleeper() {
    let word = Arc::new(AtomicU32::new(0));
    let word2 = word.clone();
    let t = thread::spawn(move || {
        while word2.load(Ordering::Acquire) == 0 {
            blocking::wait(&word2, 0, None);
        }
    });
    thread::sleep(Duration::from_millis(10));
    word.store(1, Ordering::Release);
    blocking::wake_one(&word);
    t.join().unwrap();
}

#[test]
fn wake_all_wakes_everyone() {
    let word = Arc::new(AtomicU32::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let word = word.clone();
            thread::spawn(move || {
                while word.load(Ordering::Acquire) == 0 {
                    blocking::wait(&word, 0, None);
                }
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(10));
    word.store(1, Ordering::Release);
    blocking::wake_all(&word);
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn wake_without_sleepers() {
    let word = AtomicU32::new(0);
    let woken = blocking::wake_one(&word);
    // WakeByAddressSingle cannot tell.
    #[cfg(target_os = "linux")]
    assert!(!woken);
    let _ = woken;
    blocking::wake_all(&word);
}

#[test]
fn deadline_arithmetic() {
    let d = Deadline::after(Duration::from_secs(60)).unwrap();
    let left = d.remaining().unwrap();
    assert!(left <= Duration::from_secs(60) && left > Duration::from_secs(59));
    assert!(Deadline::after(Duration::MAX).is_none());

    let sooner = d.min_after(Duration::from_millis(1));
    assert!(sooner.instant() < d.instant());
    let later = d.min_after(Duration::from_secs(600));
    assert_eq!(later, d);
}

#[test]
fn timespec_bounds() {
    assert!(Timespec::new(0, 1_000_000_000).is_none());
    let t = Timespec::new(1, 500_000_000).unwrap();
    let u = t.checked_add_duration(&Duration::from_millis(600)).unwrap();
    assert_eq!((u.secs(), u.subsec_nanos()), (2, 100_000_000));
    assert_eq!(u.checked_sub_timespec(&t), Some(Duration::from_millis(600)));
    assert_eq!(t.checked_sub_timespec(&u), None);
}

#[test]
fn coarse_clocks_fall_back() {
    init_logging();
    let now = Timespec::now(ClockId::MonotonicCoarse);
    assert!(now > Timespec::ZERO);
    let expected = if caps::try_use::<CoarseClock>().is_some() {
        ClockId::MonotonicCoarse
    } else {
        ClockId::Monotonic
    };
    let d = Deadline::after_on(ClockId::MonotonicCoarse, Duration::from_secs(1)).unwrap();
    assert_eq!(d.clock(), expected);
}

#[test]
fn probes_are_cached() {
    init_logging();
    caps::init();
    let first = caps::try_use::<PriorityInheritance>().is_some();
    let second = caps::try_use::<PriorityInheritance>().is_some();
    assert_eq!(first, second);
    #[cfg(windows)]
    assert!(!first);
}

#[test]
fn coarse_deadline_never_times_out_early() {
    for clock in [ClockId::MonotonicCoarse, ClockId::RealtimeCoarse] {
        let word = AtomicU32::new(0);
        for _ in 0..20 {
            let d = Deadline::after_on(clock, Duration::from_millis(2)).unwrap();
            assert_eq!(blocking::wait_until(&word, 0, Some(&d)), WaitOutcome::TimedOut);
            // Measured on the deadline's own clock.
            assert!(d.has_expired(), "{clock:?} deadline reported early");
        }
    }
}

#[test]
#[cfg(target_os = "linux")]
fn coarse_clock_resolution_is_detected() {
    let res = caps::try_use::<CoarseClock>().expect("coarse clocks exist since Linux 2.6.32");
    assert!(!res.is_zero());
    assert!(res <= Duration::from_millis(100));
}
