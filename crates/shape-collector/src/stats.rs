//! Lock-free counters describing what the pipeline has done so far.
//!
//! The dispatcher and the workers update a shared [`PipelineStats`] with
//! relaxed atomics; callers read it through
//! [`CollectorHandle::stats`](crate::CollectorHandle::stats) or take a
//! consistent-enough [`StatsSnapshot`] for logging and export.

use portable_atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    duplicates: AtomicU64,
    admitted: AtomicU64,
    completed: AtomicU64,
    shapes_emitted: AtomicU64,
    fetch_failures: AtomicU64,
    in_flight: AtomicUsize,
    active_fetches: AtomicUsize,
    peak_active_fetches: AtomicUsize,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub duplicates: u64,
    pub admitted: u64,
    pub completed: u64,
    pub shapes_emitted: u64,
    pub fetch_failures: u64,
    pub in_flight: usize,
    pub active_fetches: usize,
    pub peak_active_fetches: usize,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_admitted(&self, in_flight: usize) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.in_flight.store(in_flight, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, in_flight: usize) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.in_flight.store(in_flight, Ordering::Relaxed);
    }

    pub(crate) fn record_shape_emitted(&self) {
        self.shapes_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetch_started(&self) {
        let active = self.active_fetches.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_active_fetches.fetch_max(active, Ordering::AcqRel);
    }

    pub(crate) fn fetch_finished(&self) {
        self.active_fetches.fetch_sub(1, Ordering::AcqRel);
    }

    /// Counts a fetch as active until the returned guard is dropped.
    pub(crate) fn track_fetch(&self) -> ActiveFetch<'_> {
        self.fetch_started();
        ActiveFetch { stats: self }
    }

    /// Locations read from the inbound channel, duplicates included.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Locations discarded because they were already in flight.
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Locations admitted to the in-flight set.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Completion signals processed by the dispatcher.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn shapes_emitted(&self) -> u64 {
        self.shapes_emitted.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    /// Size of the in-flight set as last seen by the dispatcher.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn active_fetches(&self) -> usize {
        self.active_fetches.load(Ordering::Acquire)
    }

    /// Highest number of fetches ever running at the same time.
    pub fn peak_active_fetches(&self) -> usize {
        self.peak_active_fetches.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received(),
            duplicates: self.duplicates(),
            admitted: self.admitted(),
            completed: self.completed(),
            shapes_emitted: self.shapes_emitted(),
            fetch_failures: self.fetch_failures(),
            in_flight: self.in_flight(),
            active_fetches: self.active_fetches(),
            peak_active_fetches: self.peak_active_fetches(),
        }
    }
}

/// Decrements the active fetch gauge on drop, including when the fetch is
/// cancelled or unwinds.
pub(crate) struct ActiveFetch<'a> {
    stats: &'a PipelineStats,
}

impl Drop for ActiveFetch<'_> {
    fn drop(&mut self) {
        self.stats.fetch_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_highest_concurrency() {
        let stats = PipelineStats::new();
        stats.fetch_started();
        stats.fetch_started();
        stats.fetch_finished();
        stats.fetch_started();
        stats.fetch_finished();
        stats.fetch_finished();

        assert_eq!(stats.active_fetches(), 0);
        assert_eq!(stats.peak_active_fetches(), 2);

        {
            let _a = stats.track_fetch();
            let _b = stats.track_fetch();
            let _c = stats.track_fetch();
            assert_eq!(stats.active_fetches(), 3);
        }
        assert_eq!(stats.active_fetches(), 0);
        assert_eq!(stats.peak_active_fetches(), 3);
    }

    #[test]
    fn snapshot_copies_counters() {
        let stats = PipelineStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_duplicate();
        stats.record_admitted(1);
        stats.record_shape_emitted();
        stats.record_completed(0);

        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.duplicates, 1);
        assert_eq!(snap.admitted, 1);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.shapes_emitted, 1);
        assert_eq!(snap.in_flight, 0);
    }
}
