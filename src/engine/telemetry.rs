//! # Decision Telemetry Ring
//!
//! A fixed-capacity circular buffer of admission decisions, one per client.
//! The admission path writes into it and a periodic flush harvests it. The two
//! sides never share a lock, so a slow flush cannot stall admission.
//!
//! ## Layout
//!
//! ```text
//!     capacity C = 8
//!
//!     index:   0  1  2  3  4  5  6  7  8  9  10 11
//!     slot:    0  1  2  3  4  5  6  7  0  1  2  3      (index mod C)
//!                          ▲                    ▲
//!                        read               published
//!
//!     unread = published - read = 8  (≤ C: nothing lost yet)
//! ```
//!
//! ## Protocol
//!
//! Every event packs into a single `AtomicU64`, so a reader never sees half
//! of an event. Three cursors only ever move forward:
//!
//! ```text
//!     record (writer lock held):          drain (drain lock held):
//!       w = reserved                        p = published          (Acquire)
//!       reserved  = w + 1                   copy slots [max(read, p-C), p)
//!       slot[w%C] = event     (Release)     r = reserved           (Acquire)
//!       published = w + 1     (Release)     keep index i iff i + C >= r
//!                                           read = p
//! ```
//!
//! A slot copied while a writer was lapping the ring shows up as an index
//! with `i + C < reserved`; it is discarded and counted as dropped. Losing
//! the oldest decisions is acceptable. Blocking admission to keep them is not.

use super::utils::CacheAligned;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest timestamp that survives packing (one bit is used for `allowed`).
pub const MAX_TIMESTAMP_NS: u64 = u64::MAX >> 1;

/// One admission outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecisionEvent {
    /// Monotonic nanoseconds when the decision was made.
    pub timestamp_ns: u64,
    /// Whether the request was admitted.
    pub allowed: bool,
}

impl DecisionEvent {
    /// Creates an event. Timestamps beyond [`MAX_TIMESTAMP_NS`] are clamped.
    #[inline]
    pub fn new(timestamp_ns: u64, allowed: bool) -> Self {
        Self {
            timestamp_ns: timestamp_ns.min(MAX_TIMESTAMP_NS),
            allowed,
        }
    }

    #[inline(always)]
    fn pack(self) -> u64 {
        (self.timestamp_ns << 1) | u64::from(self.allowed)
    }

    #[inline(always)]
    fn unpack(word: u64) -> Self {
        Self {
            timestamp_ns: word >> 1,
            allowed: word & 1 == 1,
        }
    }
}

/// Result of one [`TelemetryRing::drain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drained {
    /// Harvested events, oldest first.
    pub events: Vec<DecisionEvent>,
    /// Events overwritten before this drain could see them.
    pub dropped: u64,
}

impl Drained {
    /// `true` when nothing was harvested and nothing was lost.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.dropped == 0
    }
}

/// Fixed-capacity ring of [`DecisionEvent`]s with independent writer and
/// drain critical sections.
pub struct TelemetryRing {
    slots: Box<[AtomicU64]>,
    capacity: u64,

    /// Next index a writer will claim. Touched only under `writer`.
    reserved: AtomicU64,

    /// One past the last fully written index.
    published: CacheAligned<AtomicU64>,

    /// First index not yet harvested. Touched only under `drain`.
    read: CacheAligned<AtomicU64>,

    /// Serializes writers for this ring.
    writer: Mutex<()>,

    /// Serializes drains for this ring.
    drain: Mutex<()>,

    /// Lifetime count of events lost to overwrite.
    dropped: AtomicU64,
}

impl TelemetryRing {
    /// Creates a ring with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. [`AdmissionConfig::validate`]
    /// (crate::AdmissionConfig::validate) rejects that before a ring is built.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "telemetry ring capacity must be > 0");

        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            capacity: capacity as u64,
            reserved: AtomicU64::new(0),
            published: CacheAligned::new(AtomicU64::new(0)),
            read: CacheAligned::new(AtomicU64::new(0)),
            writer: Mutex::new(()),
            drain: Mutex::new(()),
            dropped: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    fn slot(&self, index: u64) -> &AtomicU64 {
        &self.slots[(index % self.capacity) as usize]
    }

    /// Appends an event, overwriting the oldest unread one if the ring is full.
    ///
    /// Holds this ring's writer lock for three stores. Never waits on a drain.
    #[inline]
    pub fn record(&self, event: DecisionEvent) {
        let _writer = self.writer.lock();

        let index = self.reserved.load(Ordering::Relaxed);
        // Made visible to readers by the Release store of the slot below
        self.reserved.store(index + 1, Ordering::Relaxed);
        self.slot(index).store(event.pack(), Ordering::Release);
        self.published.value.store(index + 1, Ordering::Release);
    }

    /// Harvests everything recorded since the previous drain.
    ///
    /// Concurrent drains of the same ring run one after another; a drain never
    /// blocks [`record`](Self::record).
    pub fn drain(&self) -> Drained {
        let _drain = self.drain.lock();

        let read = self.read.value.load(Ordering::Relaxed);
        let published = self.published.value.load(Ordering::Acquire);
        if published == read {
            return Drained::default();
        }

        // Anything older than one lap behind `published` is already gone
        let start = read.max(published.saturating_sub(self.capacity));
        let raw: Vec<u64> = (start..published)
            .map(|index| self.slot(index).load(Ordering::Acquire))
            .collect();

        // Writers that started after we loaded `published` may have lapped the
        // oldest slots we just copied
        let reserved = self.reserved.load(Ordering::Acquire);
        let first_intact = reserved
            .saturating_sub(self.capacity)
            .clamp(start, published);
        let skipped = (first_intact - start) as usize;

        let events = raw[skipped..]
            .iter()
            .map(|&word| DecisionEvent::unpack(word))
            .collect();

        let dropped = (start - read) + skipped as u64;
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
        }

        self.read.value.store(published, Ordering::Release);

        Drained { events, dropped }
    }

    /// Events recorded but not yet harvested, capped at capacity.
    #[inline]
    pub fn pending(&self) -> usize {
        let published = self.published.value.load(Ordering::Acquire);
        let read = self.read.value.load(Ordering::Acquire);
        published.saturating_sub(read).min(self.capacity) as usize
    }

    /// Total events ever recorded.
    #[inline]
    pub fn recorded(&self) -> u64 {
        self.published.value.load(Ordering::Acquire)
    }

    /// Total events lost to overwrite, as observed by drains so far.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

impl std::fmt::Debug for TelemetryRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRing")
            .field("capacity", &self.capacity)
            .field("recorded", &self.recorded())
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}
