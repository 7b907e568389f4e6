//! Sliding window over an ordered log of request timestamps.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// Timestamps of admitted requests within one trailing window.
///
/// Entries are appended in chronological order, so the front is always the oldest.
#[derive(Debug, Clone)]
pub(crate) struct SlidingWindow {
    span: Duration,
    limit: u32,
    hits: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    pub(crate) fn new(span: Duration, limit: u32) -> Self {
        Self {
            span,
            limit,
            hits: VecDeque::new(),
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.span
    }

    /// Index of the first entry still inside the window.
    fn first_live(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        self.hits.partition_point(|t| *t < cutoff)
    }

    fn live_count(&self, now: DateTime<Utc>) -> usize {
        self.hits.len() - self.first_live(now)
    }

    /// Drop entries older than the window.
    pub(crate) fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = self.cutoff(now);
        while self.hits.front().is_some_and(|t| *t < cutoff) {
            self.hits.pop_front();
        }
    }

    pub(crate) fn is_full(&self, now: DateTime<Utc>) -> bool {
        self.live_count(now) >= self.limit as usize
    }

    pub(crate) fn record(&mut self, now: DateTime<Utc>) {
        // clock may step backwards; keep the log ordered
        let at = match self.hits.back() {
            Some(last) if *last > now => *last,
            _ => now,
        };
        self.hits.push_back(at);
    }

    pub(crate) fn remaining(&self, now: DateTime<Utc>) -> u32 {
        let used = u32::try_from(self.live_count(now)).unwrap_or(u32::MAX);
        self.limit.saturating_sub(used)
    }

    /// Whole seconds until enough entries leave the window to admit one more request.
    ///
    /// An entry leaves once it is strictly older than the span, so the wait is
    /// the smallest whole number of seconds strictly greater than what remains.
    pub(crate) fn wait_secs(&self, now: DateTime<Utc>) -> u64 {
        let first = self.first_live(now);
        let live = self.hits.len() - first;
        let limit = self.limit as usize;
        if live < limit {
            return 0;
        }
        let Some(blocking) = self.hits.get(first + (live - limit)) else {
            return 0;
        };
        let left = self.span - (now - *blocking);
        let left_secs = left.num_seconds().max(0) as u64;
        left_secs + 1
    }

    pub(crate) fn is_empty(&self, now: DateTime<Utc>) -> bool {
        self.live_count(now) == 0
    }
}
