//! High-resolution timing core.
//!
//! Exposes a raw, cheap, monotonic cycle counter ([`now`]), a calibrated
//! ticks-to-nanoseconds conversion ([`ns`]), the calibration routine that
//! establishes it ([`calibrate`]), and a hybrid busy-spin/OS-sleep pacing
//! primitive ([`sleep`]). The ring protocol's writer-timeout detection and
//! stall recovery are both built on top of [`now`]/[`ns`].
//!
//! Calibration state is two process-global floats, per the original
//! implementation this module is ported from. They are stored as
//! [`AtomicU64`] bit patterns rather than `static mut` so the first caller
//! initialises them without undefined behavior; a benign race between
//! concurrent first callers just calibrates twice; the later store wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Default calibration budget used by the lazy trigger on first [`ns`] call.
const DEFAULT_CALIBRATION_NS: f64 = 1e6; // 1 millisecond

/// Heuristic overflow threshold: if the unsigned tick difference exceeds
/// this, the caller almost certainly swapped `stop`/`start`.
const OVERFLOW_THRESHOLD_TICKS: u64 = 1_000_000_000_000_000; // 1e15

/// Below this, `sleep` only busy-spins; at or above it, part of the wait is
/// handed to the OS scheduler.
const SLEEP_OS_THRESHOLD_NS: f64 = 100_000.0; // 100 microseconds

/// Width of the final busy-spin window (in nanoseconds of ticks) within
/// which `sleep` spins tightly instead of cooperatively yielding.
const NEAR_END_WINDOW_NS: f64 = 16.0 * 1024.0;

static NS_PER_TICK_BITS: AtomicU64 = AtomicU64::new(0);
static TICK_PER_NS_BITS: AtomicU64 = AtomicU64::new(0);

fn ns_per_tick() -> f64 {
    f64::from_bits(NS_PER_TICK_BITS.load(Ordering::Relaxed))
}

fn tick_per_ns() -> f64 {
    f64::from_bits(TICK_PER_NS_BITS.load(Ordering::Relaxed))
}

fn store_calibration(ns_per_tick: f64, tick_per_ns: f64) {
    NS_PER_TICK_BITS.store(ns_per_tick.to_bits(), Ordering::Relaxed);
    TICK_PER_NS_BITS.store(tick_per_ns.to_bits(), Ordering::Relaxed);
}

fn ensure_calibrated() {
    if ns_per_tick() <= 0.0 {
        calibrate(DEFAULT_CALIBRATION_NS);
    }
}

/// Returns a raw hardware-monotonic cycle counter, non-decreasing on the
/// calling thread and cheap enough to call on every write/read.
///
/// Uses `RDTSC` on `x86_64`. On other architectures there is no universally
/// cheap raw counter exposed by `core`, so this falls back to a
/// nanosecond-resolution [`Instant`]-derived counter; calibration then
/// converges `NS_PER_TICK` to approximately `1.0` on that path.
#[inline]
#[must_use]
pub fn now() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: RDTSC has no preconditions on x86_64; it is always a
        // defined instruction to execute, including outside ring 0.
        unsafe { std::arch::x86_64::_rdtsc() }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        portable_tick()
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn portable_tick() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

fn os_monotonic_ns() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as f64
}

/// Converts a pair of raw ticks into a signed nanosecond duration.
///
/// `ns(stop, start)` is the elapsed time from `start` to `stop`. If the
/// unsigned tick difference implies an implausibly large interval (more
/// than `1e15` ticks), the arguments are assumed swapped: they are
/// exchanged and the result negated, making the function signed and
/// antisymmetric (`ns(a, b) == -ns(b, a)`, `ns(a, a) == 0`).
#[must_use]
pub fn ns(stop_tick: u64, start_tick: u64) -> f64 {
    ensure_calibrated();

    let (mut hi, mut lo, mut dir) = (stop_tick, start_tick, 1.0_f64);
    if hi.wrapping_sub(lo) > OVERFLOW_THRESHOLD_TICKS {
        std::mem::swap(&mut hi, &mut lo);
        dir = -1.0;
    }
    (hi.wrapping_sub(lo) as f64) * ns_per_tick() * dir
}

/// Establishes `NS_PER_TICK`/`TICK_PER_NS` by sleeping for approximately
/// `nanoseconds` and comparing elapsed ticks against the OS monotonic
/// clock. Triggered lazily on the first [`ns`] call with a 1 ms budget; can
/// be re-invoked with a larger budget for better precision.
pub fn calibrate(nanoseconds: f64) {
    let start_tick = now();
    let start_os = os_monotonic_ns();

    os_sleep_ns(nanoseconds);

    // Busy-poll until the desired time has actually elapsed, exercising the
    // cycle counter on every iteration so it stays warm for the timing.
    loop {
        let elapsed = os_monotonic_ns() - start_os;
        now();
        if elapsed >= nanoseconds {
            break;
        }
    }

    let end_os = os_monotonic_ns();
    let end_tick = now();
    let end_os_2 = os_monotonic_ns();

    // Estimate the overhead of the measurement call itself and subtract
    // half of it from the elapsed time, matching the reference calibration.
    let measurement_ns = end_os_2 - end_os;
    let elapsed_ticks = end_tick.wrapping_sub(start_tick);
    let elapsed_ns = (end_os - start_os) - measurement_ns / 2.0;

    if elapsed_ticks == 0 {
        return;
    }

    let ns_per_tick = elapsed_ns / (elapsed_ticks as f64);
    store_calibration(ns_per_tick, 1.0 / ns_per_tick);
}

fn os_sleep_ns(nanoseconds: f64) {
    if nanoseconds <= 0.0 {
        return;
    }
    std::thread::sleep(Duration::from_nanos(nanoseconds as u64));
}

/// Hybrid sleep: busy-spins for sub-100-microsecond durations, otherwise
/// hands most of the wait to the OS and busy-spins the last stretch for
/// jitter control, cooperatively yielding until the final ~16 microseconds
/// of ticks remain.
pub fn sleep(nanoseconds: f64) {
    if nanoseconds < 0.0 {
        return;
    }
    ensure_calibrated();

    let tick_per_ns = tick_per_ns();
    let start = now();
    let end = start.wrapping_add((tick_per_ns * nanoseconds) as u64);
    let near_end = end.wrapping_sub((tick_per_ns * NEAR_END_WINDOW_NS) as u64);

    if nanoseconds >= SLEEP_OS_THRESHOLD_NS {
        let sleep_ns = nanoseconds - NEAR_END_WINDOW_NS;
        if sleep_ns > 0.0 {
            os_sleep_ns(sleep_ns);
        }
    }

    while now() < end {
        if now() < near_end {
            std::thread::yield_now();
        }
    }
}
