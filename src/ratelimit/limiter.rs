//! Core sliding window limiter.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, MonotonicClock};
use super::window::EventRecord;
use crate::config::LimiterConfig;
use crate::error::{Result, SlidegateError};

/// Upper bound on the capacity preallocated for a new key.
const INITIAL_RECORD_CAPACITY: usize = 16;

/// Outcome of [`SlidingWindowLimiter::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The event was admitted and recorded.
    Admitted,
    /// The event was rejected and nothing was recorded.
    Rejected {
        /// Time until the oldest event in the window expires.
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the event was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    /// Suggested wait before the next attempt. Zero when admitted.
    pub fn retry_after(&self) -> Duration {
        match self {
            Admission::Admitted => Duration::ZERO,
            Admission::Rejected { retry_after } => *retry_after,
        }
    }
}

/// Per-key sliding window rate limiter.
///
/// Every key may have at most `max_requests` admitted events within any
/// span of `window_size`. Each key holds the timestamps of its admitted
/// events; timestamps strictly older than the window are dropped before
/// every decision, and a key whose record empties is removed from the map.
///
/// The limiter is safe to share across threads. Operations on one key are
/// serialized by the map's shard lock, so [`record`](Self::record) cannot
/// over-admit under contention.
pub struct SlidingWindowLimiter<K = String> {
    /// Event records indexed by key
    records: DashMap<K, EventRecord>,
    /// Length of the sliding window
    window_size: Duration,
    /// Events allowed per key within one window
    max_requests: usize,
    /// Source of timestamps
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter<String> {
    /// Create a limiter using the process monotonic clock.
    pub fn new(window_size: Duration, max_requests: usize) -> Result<Self> {
        Self::with_clock(window_size, max_requests, Arc::new(MonotonicClock::new()))
    }

    /// Create a limiter from its configuration section.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        let (window_size, max_requests) = config.validate()?;
        Self::new(window_size, max_requests)
    }
}

impl<K> SlidingWindowLimiter<K>
where
    K: Eq + Hash + Debug,
{
    /// Create a limiter that reads time from `clock`.
    pub fn with_clock(
        window_size: Duration,
        max_requests: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if window_size.is_zero() {
            return Err(SlidegateError::InvalidWindowSize(
                "window size must be greater than zero".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(SlidegateError::InvalidMaxRequests(max_requests));
        }

        debug!(
            window_size = ?window_size,
            max_requests = max_requests,
            "Creating sliding window limiter"
        );

        Ok(Self {
            records: DashMap::new(),
            window_size,
            max_requests,
            clock,
        })
    }

    /// Length of the sliding window.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Events allowed per key within one window.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Check whether an event for `key` would be admitted right now.
    ///
    /// Does not record anything beyond dropping expired timestamps.
    pub fn is_admissible<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.with_compacted(key, now, |record| {
            record.map_or(true, |r| r.len() < self.max_requests)
        })
    }

    /// Record an event for `key` if it is admissible.
    ///
    /// Returns `true` if the event was admitted. A rejected event leaves the
    /// key's record untouched.
    pub fn record<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        self.acquire(key).is_admitted()
    }

    /// Record an event for `key` if admissible, reporting the wait on rejection.
    ///
    /// Equivalent to [`record`](Self::record) followed by
    /// [`time_until_next_allowed`](Self::time_until_next_allowed), in a
    /// single critical section.
    pub fn acquire<Q>(&self, key: &Q) -> Admission
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let now = self.clock.now();

        if let Some(mut record) = self.records.get_mut(key) {
            let (key, record) = record.pair_mut();
            return self.admit(key, record, now);
        }

        match self.records.entry(key.to_owned()) {
            Entry::Occupied(entry) => {
                let mut record = entry.into_ref();
                let (key, record) = record.pair_mut();
                self.admit(key, record, now)
            }
            Entry::Vacant(entry) => {
                trace!(key = ?entry.key(), "Creating event record");
                let mut record =
                    EventRecord::with_capacity(self.max_requests.min(INITIAL_RECORD_CAPACITY));
                record.push(now, self.max_requests);
                entry.insert(record);
                Admission::Admitted
            }
        }
    }

    /// Time until an event for `key` would next be admitted.
    ///
    /// Zero if the key is admissible now; otherwise the time until its oldest
    /// timestamp leaves the window.
    ///
    /// A timestamp exactly `window_size` old still counts, so a retry at
    /// exactly the reported instant can be rejected once (with a zero wait)
    /// and admitted immediately after.
    pub fn time_until_next_allowed<Q>(&self, key: &Q) -> Duration
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.with_compacted(key, now, |record| match record {
            Some(r) if r.len() >= self.max_requests => {
                r.time_until_oldest_expires(now, self.window_size)
            }
            _ => Duration::ZERO,
        })
    }

    /// Events `key` may still record within the current window.
    pub fn remaining<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.with_compacted(key, now, |record| {
            self.max_requests
                .saturating_sub(record.map_or(0, EventRecord::len))
        })
    }

    /// Drop expired timestamps for every key and remove keys left empty.
    ///
    /// Returns the number of keys removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        self.records.retain(|_, record| {
            record.compact(now, self.window_size);
            if record.is_empty() {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            debug!(removed = removed, "Purged expired keys");
        }
        removed
    }

    /// Number of keys currently holding state.
    pub fn active_keys(&self) -> usize {
        self.records.len()
    }

    /// Drop all state.
    pub fn clear(&self) {
        self.records.clear();
    }

    /// Compact `record` and append `now` if there is room.
    fn admit(&self, key: &K, record: &mut EventRecord, now: Duration) -> Admission {
        let removed = record.compact(now, self.window_size);
        if removed > 0 {
            trace!(key = ?key, removed = removed, "Compacted event record");
        }

        if record.len() < self.max_requests {
            record.push(now, self.max_requests);
            trace!(key = ?key, count = record.len(), "Event admitted");
            Admission::Admitted
        } else {
            let retry_after = record.time_until_oldest_expires(now, self.window_size);
            debug!(
                key = ?key,
                retry_after = ?retry_after,
                "Rate limit exceeded"
            );
            Admission::Rejected { retry_after }
        }
    }

    /// Compact the record for `key` and hand it to `f`.
    ///
    /// `f` sees `None` if the key is absent or its record emptied; an emptied
    /// record is removed from the map before returning.
    fn with_compacted<Q, R>(
        &self,
        key: &Q,
        now: Duration,
        f: impl FnOnce(Option<&EventRecord>) -> R,
    ) -> R
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (result, emptied) = match self.records.get_mut(key) {
            Some(mut record) => {
                let removed = record.compact(now, self.window_size);
                if removed > 0 {
                    trace!(key = ?record.key(), removed = removed, "Compacted event record");
                }
                if record.is_empty() {
                    (f(None), true)
                } else {
                    (f(Some(&*record)), false)
                }
            }
            None => (f(None), false),
        };

        if emptied {
            self.records.remove_if(key, |_, record| record.is_empty());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn limiter(window_secs: u64, max_requests: usize) -> (SlidingWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = SlidingWindowLimiter::with_clock(
            Duration::from_secs(window_secs),
            max_requests,
            clock.clone(),
        )
        .unwrap();
        (limiter, clock)
    }

    fn at(clock: &ManualClock, secs: f64) {
        clock.set(Duration::from_secs_f64(secs));
    }

    #[test]
    fn test_rejects_zero_window() {
        let result = SlidingWindowLimiter::new(Duration::ZERO, 1);
        assert!(matches!(result, Err(SlidegateError::InvalidWindowSize(_))));
    }

    #[test]
    fn test_rejects_zero_max_requests() {
        let result = SlidingWindowLimiter::new(Duration::from_secs(10), 0);
        assert!(matches!(result, Err(SlidegateError::InvalidMaxRequests(0))));
    }

    #[test]
    fn test_unknown_key_is_admissible() {
        let (limiter, _clock) = limiter(10, 1);

        assert!(limiter.is_admissible("missing"));
        assert_eq!(limiter.time_until_next_allowed("missing"), Duration::ZERO);
        assert_eq!(limiter.remaining("missing"), 1);
        assert_eq!(limiter.active_keys(), 0);
    }

    #[test]
    fn test_single_slot_blocks_until_window_passes() {
        let (limiter, clock) = limiter(10, 1);

        assert!(limiter.record("u1"));

        at(&clock, 5.0);
        assert!(!limiter.is_admissible("u1"));
        assert_eq!(limiter.time_until_next_allowed("u1"), Duration::from_secs(5));

        at(&clock, 10.1);
        assert!(limiter.is_admissible("u1"));
        assert!(limiter.record("u1"));
    }

    #[test]
    fn test_fourth_request_waits_for_oldest() {
        let (limiter, clock) = limiter(10, 3);

        assert!(limiter.record("u2"));
        at(&clock, 1.0);
        assert!(limiter.record("u2"));
        at(&clock, 2.0);
        assert!(limiter.record("u2"));

        at(&clock, 3.0);
        assert!(!limiter.record("u2"));
        assert_eq!(limiter.time_until_next_allowed("u2"), Duration::from_secs(7));
        assert_eq!(limiter.remaining("u2"), 0);
    }

    #[test]
    fn test_boundary_timestamp_still_counts() {
        let (limiter, clock) = limiter(10, 1);

        assert!(limiter.record("u3"));

        at(&clock, 10.0);
        assert!(!limiter.is_admissible("u3"));
        assert_eq!(limiter.time_until_next_allowed("u3"), Duration::ZERO);

        at(&clock, 10.0001);
        assert!(limiter.is_admissible("u3"));
    }

    #[test]
    fn test_rejected_record_does_not_mutate() {
        let (limiter, clock) = limiter(10, 2);

        assert!(limiter.record("k"));
        at(&clock, 4.0);
        assert!(limiter.record("k"));
        at(&clock, 6.0);
        assert!(!limiter.record("k"));

        // Only the first timestamp has expired, so exactly one slot frees.
        at(&clock, 10.5);
        assert_eq!(limiter.remaining("k"), 1);
        assert!(limiter.record("k"));
        assert!(!limiter.record("k"));
    }

    #[test]
    fn test_recovers_after_reported_wait() {
        let (limiter, clock) = limiter(10, 2);

        assert!(limiter.record("k"));
        at(&clock, 3.0);
        assert!(limiter.record("k"));
        at(&clock, 4.0);
        assert!(!limiter.record("k"));

        let wait = limiter.time_until_next_allowed("k");
        assert_eq!(wait, Duration::from_secs(6));

        clock.advance(wait + Duration::from_millis(1));
        assert!(limiter.record("k"));
    }

    #[test]
    fn test_retry_at_exact_reported_wait_lands_on_boundary() {
        let (limiter, clock) = limiter(10, 1);

        assert!(limiter.record("k"));
        at(&clock, 5.0);
        assert!(!limiter.record("k"));

        let wait = limiter.time_until_next_allowed("k");
        assert_eq!(wait, Duration::from_secs(5));

        clock.advance(wait);
        assert!(!limiter.record("k"));
        assert_eq!(limiter.time_until_next_allowed("k"), Duration::ZERO);

        clock.advance(Duration::from_nanos(1));
        assert!(limiter.record("k"));
    }

    #[test]
    fn test_acquire_reports_retry_after() {
        let (limiter, clock) = limiter(10, 1);

        assert_eq!(limiter.acquire("k"), Admission::Admitted);

        at(&clock, 2.5);
        let admission = limiter.acquire("k");
        assert!(!admission.is_admitted());
        assert_eq!(admission.retry_after(), Duration::from_millis(7500));
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, clock) = limiter(10, 1);

        assert!(limiter.record("a"));
        at(&clock, 1.0);

        assert!(!limiter.is_admissible("a"));
        assert!(limiter.is_admissible("b"));
        assert_eq!(limiter.time_until_next_allowed("b"), Duration::ZERO);
        assert!(limiter.record("b"));
        assert_eq!(limiter.time_until_next_allowed("a"), Duration::from_secs(9));
    }

    #[test]
    fn test_repeated_queries_do_not_change_result() {
        let (limiter, clock) = limiter(10, 2);

        assert!(limiter.record("k"));
        at(&clock, 1.0);

        for _ in 0..5 {
            assert!(limiter.is_admissible("k"));
            assert_eq!(limiter.remaining("k"), 1);
        }
        assert!(limiter.record("k"));
        assert!(!limiter.is_admissible("k"));
    }

    #[test]
    fn test_expired_key_is_removed_on_access() {
        let (limiter, clock) = limiter(10, 1);

        assert!(limiter.record("k"));
        assert_eq!(limiter.active_keys(), 1);

        at(&clock, 11.0);
        assert!(limiter.is_admissible("k"));
        assert_eq!(limiter.active_keys(), 0);
    }

    #[test]
    fn test_purge_expired_removes_idle_keys() {
        let (limiter, clock) = limiter(10, 1);

        assert!(limiter.record("old"));
        at(&clock, 8.0);
        assert!(limiter.record("recent"));

        at(&clock, 12.0);
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.active_keys(), 1);
        assert!(!limiter.is_admissible("recent"));
    }

    #[test]
    fn test_clear() {
        let (limiter, _clock) = limiter(10, 1);

        limiter.record("a");
        limiter.record("b");
        assert_eq!(limiter.active_keys(), 2);

        limiter.clear();
        assert_eq!(limiter.active_keys(), 0);
        assert!(limiter.is_admissible("a"));
    }

    #[test]
    fn test_non_string_keys() {
        let clock = Arc::new(ManualClock::new());
        let limiter: SlidingWindowLimiter<u64> =
            SlidingWindowLimiter::with_clock(Duration::from_secs(1), 1, clock.clone()).unwrap();

        assert!(limiter.record(&7u64));
        assert!(!limiter.record(&7u64));
        assert!(limiter.record(&8u64));

        clock.advance(Duration::from_millis(1001));
        assert!(limiter.record(&7u64));
    }

    #[test]
    fn test_quota_holds_under_contention() {
        let (limiter, _clock) = limiter(10, 5);
        let admitted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        if limiter.record("hot") {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.into_inner(), 5);
        assert_eq!(limiter.remaining("hot"), 0);
    }

    #[test]
    fn test_quota_holds_over_sliding_timeline() {
        let (limiter, clock) = limiter(10, 3);
        let mut admitted = Vec::new();

        // One attempt every 1.5 seconds for two minutes.
        for step in 0..80u64 {
            let now = Duration::from_millis(step * 1500);
            clock.set(now);
            if limiter.record("k") {
                admitted.push(now);
            }
        }

        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|t| **t - *start <= Duration::from_secs(10))
                .count();
            assert!(in_window <= 3, "window starting at {:?} holds {}", start, in_window);
        }
    }
}
