//! In-process pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counters, incremented from every stage.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub updates_received: AtomicU64,
    pub events_decoded: AtomicU64,
    pub skipped_stale: AtomicU64,
    pub skipped_unrecognized: AtomicU64,
    pub decode_malformed: AtomicU64,
    pub source_errors: AtomicU64,
    pub batches_committed: AtomicU64,
    pub events_written: AtomicU64,
    pub batches_dead_lettered: AtomicU64,
}

/// Point-in-time copy for logging or exposure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub updates_received: u64,
    pub events_decoded: u64,
    pub skipped_stale: u64,
    pub skipped_unrecognized: u64,
    pub decode_malformed: u64,
    pub source_errors: u64,
    pub batches_committed: u64,
    pub events_written: u64,
    pub batches_dead_lettered: u64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            updates_received: self.updates_received.load(Ordering::Relaxed),
            events_decoded: self.events_decoded.load(Ordering::Relaxed),
            skipped_stale: self.skipped_stale.load(Ordering::Relaxed),
            skipped_unrecognized: self.skipped_unrecognized.load(Ordering::Relaxed),
            decode_malformed: self.decode_malformed.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            batches_dead_lettered: self.batches_dead_lettered.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let counters = PipelineCounters::new();
        PipelineCounters::bump(&counters.updates_received);
        PipelineCounters::bump(&counters.updates_received);
        PipelineCounters::add(&counters.events_written, 10);

        let snap = counters.snapshot();
        assert_eq!(snap.updates_received, 2);
        assert_eq!(snap.events_written, 10);
        assert_eq!(snap.skipped_stale, 0);
    }
}
