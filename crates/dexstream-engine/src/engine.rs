//! `PipelineEngine` — spawns the source pump and lane workers, and drives
//! the sink loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use dexstream_core::{lane_for, DecoderRegistry, DecodedEvent, PipelineConfig, RawUpdate, StaleGate};
use dexstream_sink::{CommitOutcome, EventBatcher, SinkWriter};
use dexstream_source::{UpdateSource, UpdateStream};

use crate::counters::PipelineCounters;
use crate::error::PipelineError;

pub struct PipelineEngine {
    config: PipelineConfig,
    source: Arc<dyn UpdateSource>,
    registry: Arc<DecoderRegistry>,
    counters: Arc<PipelineCounters>,
}

impl PipelineEngine {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn UpdateSource>,
        registry: Arc<DecoderRegistry>,
    ) -> Self {
        Self {
            config,
            source,
            registry,
            counters: Arc::new(PipelineCounters::new()),
        }
    }

    /// Shared counters handle; survives `run` for final reporting.
    pub fn counters(&self) -> Arc<PipelineCounters> {
        Arc::clone(&self.counters)
    }

    /// Run the pipeline until the source ends or `shutdown` flips to true.
    ///
    /// On shutdown the pump stops first; queued updates drain through the
    /// lanes, and the sink flushes its open partial batch before this
    /// returns. Only startup problems produce an `Err`.
    pub async fn run(
        self,
        mut writer: SinkWriter,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        self.config.validate()?;

        let resume = writer.load_checkpoint().await?;
        if let Some(cp) = &resume {
            info!(slot = cp.slot, write_version = cp.write_version, "resuming from checkpoint");
        }

        let stream = self.source.open(&self.config.filter, resume).await?;
        info!(
            source = self.source.name(),
            lanes = self.config.lanes,
            programs = self.config.filter.programs.len(),
            "pipeline started"
        );

        // Lane workers: per-entity order inside a lane, parallel across.
        let (event_tx, event_rx) = mpsc::channel::<DecodedEvent>(self.config.queue_capacity);
        let mut lane_txs = Vec::with_capacity(self.config.lanes);
        let mut handles = Vec::with_capacity(self.config.lanes + 1);
        for lane in 0..self.config.lanes {
            let (tx, rx) = mpsc::channel::<RawUpdate>(self.config.queue_capacity);
            lane_txs.push(tx);
            handles.push(tokio::spawn(lane_worker(
                lane,
                rx,
                Arc::clone(&self.registry),
                event_tx.clone(),
                Arc::clone(&self.counters),
            )));
        }
        // The sink sees channel closure once the pump and lanes are done.
        drop(event_tx);

        handles.push(tokio::spawn(pump(
            stream,
            lane_txs,
            shutdown,
            Arc::clone(&self.counters),
        )));

        self.sink_loop(event_rx, &mut writer).await;

        for handle in handles {
            let _ = handle.await;
        }

        let snapshot = self.counters.snapshot();
        info!(
            updates = snapshot.updates_received,
            decoded = snapshot.events_decoded,
            written = snapshot.events_written,
            batches = snapshot.batches_committed,
            dead_lettered = snapshot.batches_dead_lettered,
            stalled = writer.is_stalled(),
            "pipeline stopped"
        );
        Ok(())
    }

    async fn sink_loop(&self, mut event_rx: mpsc::Receiver<DecodedEvent>, writer: &mut SinkWriter) {
        let mut batcher = EventBatcher::new(
            self.config.batch_max_events,
            Duration::from_millis(self.config.batch_max_wait_ms),
        );

        loop {
            let deadline = batcher.deadline();
            tokio::select! {
                maybe = event_rx.recv() => match maybe {
                    Some(event) => {
                        if let Some(batch) = batcher.push(event) {
                            self.commit(writer, batch).await;
                        }
                    }
                    None => {
                        // Upstream drained; flush the open partial batch.
                        if let Some(batch) = batcher.flush() {
                            self.commit(writer, batch).await;
                        }
                        return;
                    }
                },
                _ = batch_deadline(deadline) => {
                    if let Some(batch) = batcher.flush() {
                        self.commit(writer, batch).await;
                    }
                }
            }
        }
    }

    async fn commit(&self, writer: &mut SinkWriter, batch: Vec<DecodedEvent>) {
        match writer.commit_batch(batch).await {
            CommitOutcome::Committed { events, .. } => {
                PipelineCounters::bump(&self.counters.batches_committed);
                PipelineCounters::add(&self.counters.events_written, events as u64);
            }
            CommitOutcome::DeadLettered { .. } => {
                PipelineCounters::bump(&self.counters.batches_dead_lettered);
            }
        }
    }
}

/// Waits for the open batch's deadline, or forever when no batch is open.
async fn batch_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

/// Reads the source stream and fans updates out to their lanes.
async fn pump(
    mut stream: UpdateStream,
    lane_txs: Vec<mpsc::Sender<RawUpdate>>,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<PipelineCounters>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("shutdown signal, stopping source pump");
                    break;
                }
            }
            item = stream.next() => match item {
                None => {
                    info!("source stream ended");
                    break;
                }
                Some(Err(e)) => {
                    // The source reconnects itself; this is bookkeeping.
                    PipelineCounters::bump(&counters.source_errors);
                    warn!(error = %e, "source error");
                }
                Some(Ok(update)) => {
                    let lane = lane_for(update.partition_key(), lane_txs.len());
                    // Bounded send: blocks when the lane is busy, pausing
                    // the stream read — backpressure, not drops.
                    if lane_txs[lane].send(update).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
    // Dropping the lane senders lets the lanes drain and close.
}

/// One dispatch lane: ordering gate, then decode, then hand to the sink.
async fn lane_worker(
    lane: usize,
    mut rx: mpsc::Receiver<RawUpdate>,
    registry: Arc<DecoderRegistry>,
    event_tx: mpsc::Sender<DecodedEvent>,
    counters: Arc<PipelineCounters>,
) {
    let mut gate = StaleGate::new();

    while let Some(update) = rx.recv().await {
        PipelineCounters::bump(&counters.updates_received);

        // Late or duplicate account writes are no-ops: no decode, no event.
        if let RawUpdate::Account(account) = &update {
            if !gate.admit(&account.account, account.position()) {
                PipelineCounters::bump(&counters.skipped_stale);
                continue;
            }
        }

        match registry.decode_update(&update) {
            Ok(events) if events.is_empty() => {
                PipelineCounters::bump(&counters.skipped_unrecognized);
            }
            Ok(events) => {
                for event in events {
                    PipelineCounters::bump(&counters.events_decoded);
                    if event_tx.send(event).await.is_err() {
                        return; // sink gone
                    }
                }
            }
            Err(e) => {
                PipelineCounters::bump(&counters.decode_malformed);
                debug!(lane, error = %e, "dropping malformed update");
            }
        }
    }
}
