//! Per-key event records and window compaction.

use std::collections::VecDeque;
use std::time::Duration;

/// Timestamps of the admitted events for one key, oldest first.
#[derive(Debug, Clone, Default)]
pub struct EventRecord {
    timestamps: VecDeque<Duration>,
}

impl EventRecord {
    /// Create an empty record with room for `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(capacity),
        }
    }

    /// Drop every timestamp strictly older than `window` at time `now`.
    ///
    /// A timestamp exactly `window` old is kept. Returns the number of
    /// timestamps removed.
    pub fn compact(&mut self, now: Duration, window: Duration) -> usize {
        let mut removed = 0;
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_sub(oldest) <= window {
                break;
            }
            self.timestamps.pop_front();
            removed += 1;
        }
        removed
    }

    /// Append `now`, keeping at most `max_len` timestamps.
    pub fn push(&mut self, now: Duration, max_len: usize) {
        self.timestamps.push_back(now);
        while self.timestamps.len() > max_len {
            self.timestamps.pop_front();
        }
    }

    /// Oldest timestamp still held.
    pub fn oldest(&self) -> Option<Duration> {
        self.timestamps.front().copied()
    }

    /// Number of timestamps held.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the record holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Time until the oldest timestamp leaves the window, zero if it already has.
    pub fn time_until_oldest_expires(&self, now: Duration, window: Duration) -> Duration {
        match self.oldest() {
            Some(oldest) => window.saturating_sub(now.saturating_sub(oldest)),
            None => Duration::ZERO,
        }
    }
}
