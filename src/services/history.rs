//! Scan history cache
//!
//! Bounded, newest-first record of scan outcomes for the operator. When the
//! cache is full the oldest entry is evicted. Closing the cache clears it and
//! makes further `record` calls no-ops, which is how results of submissions
//! that outlive their session are discarded.

use std::collections::VecDeque;
use std::sync::RwLock;

use crate::models::ScanAttempt;

/// Default number of entries kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 30;

#[derive(Debug, Default)]
struct HistoryInner {
    entries: VecDeque<ScanAttempt>,
    closed: bool,
}

/// Ring buffer of recent scan attempts
#[derive(Debug)]
pub struct ScanHistory {
    inner: RwLock<HistoryInner>,
    capacity: usize,
}

impl ScanHistory {
    /// Create a history holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(HistoryInner {
                entries: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add an attempt, evicting the oldest when full.
    ///
    /// Returns `false` if the history has been closed and the attempt was dropped.
    pub fn record(&self, attempt: ScanAttempt) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return false;
        }
        if inner.entries.len() == self.capacity {
            inner.entries.pop_back();
        }
        inner.entries.push_front(attempt);
        true
    }

    /// Copy of the current entries, newest first
    pub fn snapshot(&self) -> Vec<ScanAttempt> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.iter().cloned().collect()
    }

    /// Most recent entry, if any
    pub fn latest(&self) -> Option<ScanAttempt> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries and refuse further records
    pub fn close(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
        inner.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).closed
    }
}

impl Default for ScanHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanOutcome;
    use chrono::Utc;

    fn attempt(subject: &str) -> ScanAttempt {
        ScanAttempt::resolved(
            subject,
            subject,
            "G1",
            Utc::now(),
            ScanOutcome::Accepted,
            None,
            None,
        )
    }

    #[test]
    fn test_newest_first() {
        let history = ScanHistory::new(5);
        history.record(attempt("A"));
        history.record(attempt("B"));
        history.record(attempt("C"));

        let subjects: Vec<_> = history.snapshot().into_iter().map(|a| a.subject_id).collect();
        assert_eq!(subjects, vec!["C", "B", "A"]);
        assert_eq!(history.latest().unwrap().subject_id, "C");
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let history = ScanHistory::new(2);
        history.record(attempt("A"));
        history.record(attempt("B"));
        history.record(attempt("C"));

        let subjects: Vec<_> = history.snapshot().into_iter().map(|a| a.subject_id).collect();
        assert_eq!(subjects, vec!["C", "B"]);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let history = ScanHistory::new(0);
        assert_eq!(history.capacity(), 1);
        history.record(attempt("A"));
        history.record(attempt("B"));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_close_clears_and_refuses_records() {
        let history = ScanHistory::new(3);
        assert!(history.record(attempt("A")));

        history.close();
        assert!(history.is_closed());
        assert!(history.is_empty());
        assert!(!history.record(attempt("B")));
        assert!(history.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let history = ScanHistory::new(3);
        history.record(attempt("A"));
        let snapshot = history.snapshot();
        history.record(attempt("B"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(history.len(), 2);
    }
}
