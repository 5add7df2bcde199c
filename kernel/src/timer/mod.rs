//! System time base.
//!
//! The PIT fires once per millisecond; the tick handler advances the
//! monotonic millisecond counter, ages sleeping tasks, and charges the
//! running task's quantum. Wall-clock time comes from the CMOS RTC.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::i386::rtc;

/// Milliseconds since boot.
static SYSTEM_TIME_MS: AtomicU64 = AtomicU64::new(0);

/// Monotonic milliseconds since boot.
///
/// The host test build has no timer interrupt; there every read advances
/// the clock by one millisecond so timeout paths terminate.
pub fn system_time() -> u64 {
    #[cfg(target_os = "none")]
    {
        SYSTEM_TIME_MS.load(Ordering::Acquire)
    }
    #[cfg(not(target_os = "none"))]
    {
        SYSTEM_TIME_MS.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Overwrite the system time; `SetSystemTime` only.
pub fn set_system_time(milliseconds: u64) {
    SYSTEM_TIME_MS.store(milliseconds, Ordering::Release);
}

/// One timer interrupt: advance the clock and drive the scheduler's
/// bookkeeping. Runs in interrupt context.
#[cfg(target_os = "none")]
pub fn tick() {
    SYSTEM_TIME_MS.fetch_add(1, Ordering::AcqRel);
    crate::sched::scheduler::on_tick();
}

/// Wall-clock time from the RTC.
pub fn local_time() -> rtc::DateTime {
    rtc::read()
}

/// Program the RTC.
pub fn set_local_time(time: &rtc::DateTime) {
    rtc::write(time);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn host_clock_is_strictly_monotonic() {
        let a = system_time();
        let b = system_time();
        assert!(b > a);
    }
}
