//! Event batching — flush on a count threshold or a deadline, whichever
//! triggers first.

use std::time::{Duration, Instant};

use dexstream_core::DecodedEvent;

/// Accumulates decoded events into sink batches.
///
/// The deadline arms when the first event of a batch arrives; the sink
/// loop sleeps until it and calls [`EventBatcher::flush`] when it fires.
pub struct EventBatcher {
    max_events: usize,
    max_wait: Duration,
    buffer: Vec<DecodedEvent>,
    deadline: Option<Instant>,
}

impl EventBatcher {
    pub fn new(max_events: usize, max_wait: Duration) -> Self {
        Self {
            max_events: max_events.max(1),
            max_wait,
            buffer: Vec::new(),
            deadline: None,
        }
    }

    /// Add an event; returns a full batch when the count threshold trips.
    pub fn push(&mut self, event: DecodedEvent) -> Option<Vec<DecodedEvent>> {
        if self.buffer.is_empty() {
            self.deadline = Some(Instant::now() + self.max_wait);
        }
        self.buffer.push(event);
        if self.buffer.len() >= self.max_events {
            self.flush()
        } else {
            None
        }
    }

    /// Take whatever is buffered, if anything. Disarms the deadline.
    pub fn flush(&mut self) -> Option<Vec<DecodedEvent>> {
        self.deadline = None;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Deadline of the currently open batch, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexstream_core::EventKind;

    fn event(slot: u64) -> DecodedEvent {
        DecodedEvent {
            protocol: "test".into(),
            kind: EventKind::Swap,
            entity: "pool".into(),
            base_amount: 0,
            quote_amount: 0,
            base_reserve: 0,
            quote_reserve: 0,
            slot,
            write_version: 0,
            signature: None,
            state: None,
        }
    }

    #[test]
    fn count_threshold_returns_a_full_batch() {
        let mut batcher = EventBatcher::new(3, Duration::from_secs(60));
        assert!(batcher.push(event(1)).is_none());
        assert!(batcher.push(event(2)).is_none());
        let batch = batcher.push(event(3)).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batcher.is_empty());
        assert!(batcher.deadline().is_none());
    }

    #[test]
    fn deadline_arms_on_first_event_only() {
        let mut batcher = EventBatcher::new(10, Duration::from_millis(50));
        assert!(batcher.deadline().is_none());
        batcher.push(event(1));
        let armed = batcher.deadline().unwrap();
        batcher.push(event(2));
        // Second push must not extend the deadline.
        assert_eq!(batcher.deadline().unwrap(), armed);
    }

    #[test]
    fn flush_drains_a_partial_batch() {
        let mut batcher = EventBatcher::new(10, Duration::from_secs(60));
        assert!(batcher.flush().is_none());
        batcher.push(event(1));
        batcher.push(event(2));
        assert_eq!(batcher.flush().unwrap().len(), 2);
        assert!(batcher.flush().is_none());
    }
}
