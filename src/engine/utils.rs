//! # Utilities
//!
//! Time sources and a cache-line wrapper used by the hot-path structures.
//!
//! ## Time
//!
//! Every timestamp in the engine is a `u64` count of nanoseconds on a
//! *monotonic* scale whose zero is the moment the clock was created. Wall-clock
//! adjustments (NTP steps, manual changes) can never move a window backwards.
//!
//! ```text
//!     MonotonicClock:  Instant::now() - origin   (production)
//!     ManualClock:     value you set / advance   (tests, simulations)
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic time for the admission path.
///
/// Implementations must never return a value smaller than one previously
/// returned from the same instance.
pub trait Clock: Send + Sync {
    /// Nanoseconds elapsed since this clock's origin.
    fn now_ns(&self) -> u64;
}

/// [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// [`Clock`] that only moves when told to.
///
/// ```rust
/// use metricstream::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(1100));
/// assert_eq!(clock.now_ns(), 1_100_000_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        // fetch_update never fails with a closure that always returns Some
        let _ = self
            .now_ns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
                Some(now.saturating_add(by))
            });
    }

    /// Jumps to `now_ns` if it is ahead of the current reading.
    pub fn set(&self, now_ns: u64) {
        self.now_ns.fetch_max(now_ns, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }
}

/// Cache line size for x86_64 processors.
#[cfg(target_arch = "x86_64")]
pub const CACHE_LINE_SIZE: usize = 64;

/// Cache line size for ARM64 processors.
#[cfg(target_arch = "aarch64")]
pub const CACHE_LINE_SIZE: usize = 128;

/// Assumed cache line size everywhere else.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const CACHE_LINE_SIZE: usize = 64;

/// Pads a value to its own cache line.
///
/// The telemetry ring's write and read cursors are touched by different
/// threads (admission vs. flush); keeping them on separate lines stops each
/// side from invalidating the other's cache.
///
/// ```text
///     ┌──────── 64B ────────┐┌──────── 64B ────────┐
///     │ published cursor    ││ read cursor         │
///     └─────────────────────┘└─────────────────────┘
/// ```
#[cfg_attr(target_arch = "aarch64", repr(C, align(128)))]
#[cfg_attr(not(target_arch = "aarch64"), repr(C, align(64)))]
pub(crate) struct CacheAligned<T> {
    pub(crate) value: T,
}

impl<T> CacheAligned<T> {
    #[inline(always)]
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Default> Default for CacheAligned<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheAligned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_line_size() {
        assert!(CACHE_LINE_SIZE >= 32);
        assert!(CACHE_LINE_SIZE.is_power_of_two());
        assert!(std::mem::align_of::<CacheAligned<AtomicU64>>() >= 64);
    }

    #[test]
    fn test_monotonic_clock() {
        let clock = MonotonicClock::new();
        let mut last = clock.now_ns();

        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(1));
            let now = clock.now_ns();
            assert!(now >= last);
            last = now;
        }

        assert!(last >= 10_000_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ns(), 0);

        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now_ns(), 5_000_000);

        // Never goes backwards
        clock.set(1_000);
        assert_eq!(clock.now_ns(), 5_000_000);

        clock.set(9_000_000);
        assert_eq!(clock.now_ns(), 9_000_000);

        clock.advance(Duration::MAX);
        assert_eq!(clock.now_ns(), u64::MAX);
    }

    #[test]
    fn test_cache_aligned_debug() {
        let aligned = CacheAligned::new(42u64);
        assert_eq!(format!("{:?}", aligned), "42");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
