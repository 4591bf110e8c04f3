//! Tick sampling and wall-clock correlation.
//!
//! Producers stamp events with raw ticks from the cheapest monotonic-ish
//! counter the architecture offers; a [`ClockSync`] entry emitted at stream
//! start carries everything a reader needs to turn those ticks back into
//! wall time.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::entries::ClockSync;

/// Returns the current tick count with the highest precision available for
/// the architecture.
#[inline(always)]
pub fn ticks_now() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_rdtsc()
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
        let mut value: u64;
        std::arch::asm!("mrs {}, cntvct_el0", out(reg) value);
        value
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64
    }
}

/// Ticks per second of the counter behind [`ticks_now`].
///
/// Measured once and cached. On aarch64 the hardware reports it directly;
/// on x86_64 the TSC is calibrated against the wall clock over a short
/// window, which is plenty for log timestamps.
pub fn tick_frequency() -> u64 {
    static FREQUENCY: OnceLock<u64> = OnceLock::new();
    *FREQUENCY.get_or_init(measure_frequency)
}

#[cfg(target_arch = "aarch64")]
fn measure_frequency() -> u64 {
    unsafe {
        let mut value: u64;
        std::arch::asm!("mrs {}, cntfrq_el0", out(reg) value);
        value
    }
}

#[cfg(target_arch = "x86_64")]
fn measure_frequency() -> u64 {
    let wall_start = std::time::Instant::now();
    let ticks_start = ticks_now();
    std::thread::sleep(std::time::Duration::from_millis(10));
    let ticks = ticks_now().wrapping_sub(ticks_start);
    let nanos = wall_start.elapsed().as_nanos() as u64;
    (ticks as u128 * 1_000_000_000 / nanos.max(1) as u128) as u64
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn measure_frequency() -> u64 {
    1_000_000_000 // ticks are SystemTime nanoseconds
}

/// Samples the tick and wall clocks in close succession and fills the
/// timezone fields from the platform.
pub fn clock_sync() -> ClockSync {
    let clock_value = ticks_now();
    let ns_since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    ClockSync {
        clock_value,
        clock_frequency: tick_frequency(),
        ns_since_epoch,
        tz_offset: chrono::Local::now().offset().local_minus_utc(),
        tz_name: std::env::var("TZ").unwrap_or_default(),
    }
}

impl ClockSync {
    /// Translates a tick value stamped by the writer of this sync into
    /// nanoseconds since the epoch. Saturates at 0 for ticks predating the
    /// sync point and when the sync carries no frequency.
    pub fn ticks_to_ns_since_epoch(&self, ticks: u64) -> u64 {
        if self.clock_frequency == 0 {
            return self.ns_since_epoch;
        }
        let delta = i128::from(ticks) - i128::from(self.clock_value);
        let delta_ns = delta * 1_000_000_000 / i128::from(self.clock_frequency);
        (i128::from(self.ns_since_epoch) + delta_ns).max(0) as u64
    }
}
