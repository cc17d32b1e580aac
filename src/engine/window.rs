//! # Sliding Window
//!
//! Per-client record of recently *accepted* requests. Each admission check
//! prunes expired timestamps from the front, then either appends `now` at the
//! back (allow) or leaves the window untouched (deny).
//!
//! ```text
//!     max = 3, window = 1s
//!
//!     now = 1.40s   [0.30, 0.90, 1.20]        0.30 expired → pop
//!                   [0.90, 1.20]              2 < 3 → push 1.40, allow
//!                   [0.90, 1.20, 1.40]
//!
//!     now = 1.45s   [0.90, 1.20, 1.40]        nothing expired
//!                                             3 = 3 → deny
//! ```
//!
//! Pruning is lazy: nothing sweeps idle windows in the background. The cost
//! of one check is O(k) where k is the number of entries that expired since
//! the previous check, and k never exceeds `max_requests_per_second`.

use std::collections::VecDeque;

/// Pre-allocation cap so a huge `max_requests_per_second` doesn't reserve
/// megabytes for every client up front.
const MAX_PREALLOCATED_SLOTS: usize = 1024;

/// Timestamps (monotonic ns) of accepted requests in the trailing window.
///
/// Not synchronized on its own; the controller guards each client's window
/// with its own lock.
#[derive(Debug, Clone, Default)]
pub struct RequestWindow {
    accepted: VecDeque<u64>,
}

impl RequestWindow {
    /// Creates an empty window sized for `max_requests` entries.
    pub fn with_capacity(max_requests: usize) -> Self {
        Self {
            accepted: VecDeque::with_capacity(max_requests.min(MAX_PREALLOCATED_SLOTS)),
        }
    }

    /// Decides whether a request at `now_ns` is admitted.
    ///
    /// Entries at least `window_ns` old are discarded first. On allow, `now_ns`
    /// is appended. Callers must pass non-decreasing `now_ns` values.
    #[inline]
    pub fn admit(&mut self, now_ns: u64, max_requests: usize, window_ns: u64) -> bool {
        self.prune(now_ns, window_ns);

        if self.accepted.len() < max_requests {
            self.accepted.push_back(now_ns);
            true
        } else {
            false
        }
    }

    /// Drops every timestamp at least `window_ns` older than `now_ns`.
    ///
    /// Returns how many were removed.
    #[inline]
    pub fn prune(&mut self, now_ns: u64, window_ns: u64) -> usize {
        let mut removed = 0;
        while let Some(&oldest) = self.accepted.front() {
            if now_ns.saturating_sub(oldest) >= window_ns {
                self.accepted.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    /// Accepted requests currently counted against the limit.
    #[inline]
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    /// `true` if no accepted request is in the window.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Timestamp of the oldest accepted request still counted.
    ///
    /// A denied caller can be retried once this falls out of the window.
    #[inline]
    pub fn oldest(&self) -> Option<u64> {
        self.accepted.front().copied()
    }
}
