//! End-to-end pipeline scenarios over scripted sources and in-memory sinks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::watch;

use dexstream_core::{
    Checkpoint, CheckpointError, CheckpointManager, CheckpointStore, DecodeError, DecodedEvent,
    DecoderRegistry, EventKind, PipelineConfig, ProtocolDecoder, RawAccountUpdate,
    RawTransactionUpdate, RawUpdate, SourceFilter, UpdatePosition,
};
use dexstream_engine::{PipelineCounters, PipelineEngine};
use dexstream_sink::{
    CommitRetryConfig, CommitRetryPolicy, DeadLetter, EventStore, MemoryEventStore, SinkError,
    SinkWriter,
};
use dexstream_source::{SourceError, UpdateSource, UpdateStream};

const PROGRAM: &str = "TestProg11111111111111111111111111111111111";

// ─── Scripted fixtures ────────────────────────────────────────────────────────

/// Yields a fixed script of updates, then ends (or hangs, for shutdown
/// tests). Records the resume checkpoint it was opened with.
struct ScriptedSource {
    script: Mutex<Option<Vec<Result<RawUpdate, SourceError>>>>,
    hang_after: bool,
    opened_with: Mutex<Option<Option<Checkpoint>>>,
}

impl ScriptedSource {
    fn new(script: Vec<Result<RawUpdate, SourceError>>) -> Self {
        Self {
            script: Mutex::new(Some(script)),
            hang_after: false,
            opened_with: Mutex::new(None),
        }
    }

    /// Keep the stream open after the script so only shutdown ends the run.
    fn hanging(script: Vec<Result<RawUpdate, SourceError>>) -> Self {
        Self {
            hang_after: true,
            ..Self::new(script)
        }
    }

    fn resume_seen(&self) -> Option<Checkpoint> {
        self.opened_with.lock().unwrap().clone().flatten()
    }
}

#[async_trait]
impl UpdateSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open(
        &self,
        _filter: &SourceFilter,
        resume: Option<Checkpoint>,
    ) -> Result<UpdateStream, SourceError> {
        *self.opened_with.lock().unwrap() = Some(resume);
        let script = self
            .script
            .lock()
            .unwrap()
            .take()
            .expect("scripted source opened twice");
        let head = stream::iter(script);
        if self.hang_after {
            Ok(Box::pin(head.chain(stream::pending())))
        } else {
            Ok(Box::pin(head))
        }
    }
}

/// Account-only decoder: first data byte 0 means not ours, empty data is
/// malformed, anything else becomes one swap event carrying the byte.
struct ByteDecoder;

impl ProtocolDecoder for ByteDecoder {
    fn protocol(&self) -> &'static str {
        "byte"
    }

    fn program_ids(&self) -> &'static [&'static str] {
        &[PROGRAM]
    }

    fn decode_account(&self, update: &RawAccountUpdate) -> Result<DecodedEvent, DecodeError> {
        match update.data.first() {
            None => Err(DecodeError::malformed("byte", "empty account data")),
            Some(0) => Err(DecodeError::unrecognized("byte")),
            Some(&b) => Ok(DecodedEvent {
                protocol: "byte".into(),
                kind: EventKind::Swap,
                entity: update.account.clone(),
                base_amount: u64::from(b),
                quote_amount: 0,
                base_reserve: 0,
                quote_reserve: 0,
                slot: update.slot,
                write_version: update.write_version,
                signature: None,
                state: Some(json!({ "byte": b, "slot": update.slot })),
            }),
        }
    }

    fn decode_transaction(
        &self,
        _update: &RawTransactionUpdate,
    ) -> Result<Vec<DecodedEvent>, DecodeError> {
        Err(DecodeError::unrecognized("byte"))
    }
}

/// Checkpoint store sharable across pipeline runs, with a save counter.
#[derive(Default)]
struct SharedCheckpointStore {
    current: Mutex<Option<Checkpoint>>,
    saves: Mutex<u32>,
}

impl SharedCheckpointStore {
    fn position(&self) -> Option<UpdatePosition> {
        self.current.lock().unwrap().as_ref().map(Checkpoint::position)
    }

    fn saves(&self) -> u32 {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl CheckpointStore for SharedCheckpointStore {
    async fn load(&self, _pipeline_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        *self.saves.lock().unwrap() += 1;
        *self.current.lock().unwrap() = Some(checkpoint);
        Ok(())
    }

    async fn delete(&self, _pipeline_id: &str) -> Result<(), CheckpointError> {
        *self.current.lock().unwrap() = None;
        Ok(())
    }
}

/// Arc wrapper so one store outlives the manager that boxes it.
struct SharedHandle(Arc<SharedCheckpointStore>);

#[async_trait]
impl CheckpointStore for SharedHandle {
    async fn load(&self, pipeline_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.0.load(pipeline_id).await
    }
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        self.0.save(checkpoint).await
    }
    async fn delete(&self, pipeline_id: &str) -> Result<(), CheckpointError> {
        self.0.delete(pipeline_id).await
    }
}

/// Store whose first `failures` insert calls fail.
struct FlakyStore {
    inner: MemoryEventStore,
    failures: Mutex<u32>,
    insert_calls: Mutex<u32>,
}

impl FlakyStore {
    fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryEventStore::new(),
            failures: Mutex::new(failures),
            insert_calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn insert_events(&self, events: &[DecodedEvent]) -> Result<(), SinkError> {
        *self.insert_calls.lock().unwrap() += 1;
        // The guard must not live across the await below.
        let fail = {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            return Err(SinkError::Store("connection reset".into()));
        }
        self.inner.insert_events(events).await
    }

    async fn insert_dead_letters(&self, letters: &[DeadLetter]) -> Result<(), SinkError> {
        self.inner.insert_dead_letters(letters).await
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn account(entity: &str, slot: u64, write_version: u64, data: Vec<u8>) -> Result<RawUpdate, SourceError> {
    Ok(RawUpdate::Account(RawAccountUpdate {
        owner_program: PROGRAM.into(),
        account: entity.into(),
        slot,
        write_version,
        lamports: 1_000_000,
        data,
        is_startup: false,
    }))
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        filter: SourceFilter::program(PROGRAM),
        lanes: 2,
        batch_max_events: 4,
        batch_max_wait_ms: 25,
        ..PipelineConfig::default()
    }
}

fn fast_retry(max_retries: u32) -> CommitRetryPolicy {
    CommitRetryPolicy::new(CommitRetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        multiplier: 2.0,
    })
}

struct Harness {
    engine: PipelineEngine,
    counters: Arc<PipelineCounters>,
    writer: SinkWriter,
}

fn harness(
    config: PipelineConfig,
    source: ScriptedSource,
    store: Arc<dyn EventStore>,
    checkpoints: Arc<SharedCheckpointStore>,
) -> Harness {
    let mut registry = DecoderRegistry::new();
    registry.register(Arc::new(ByteDecoder));

    let manager = CheckpointManager::new(Box::new(SharedHandle(checkpoints)), "test-pipe");
    let writer = SinkWriter::new(store, manager).with_retry(fast_retry(3));

    let engine = PipelineEngine::new(config, Arc::new(source), Arc::new(registry));
    let counters = engine.counters();
    Harness {
        engine,
        counters,
        writer,
    }
}

async fn run_to_end(harness: Harness) -> Arc<PipelineCounters> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    harness
        .engine
        .run(harness.writer, shutdown_rx)
        .await
        .expect("pipeline run failed");
    harness.counters
}

// ─── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn commits_decoded_events_and_advances_checkpoint() {
    let store = Arc::new(MemoryEventStore::new());
    let checkpoints = Arc::new(SharedCheckpointStore::default());
    let source = ScriptedSource::new(vec![
        account("pool-a", 100, 1, vec![7]),
        account("pool-b", 100, 2, vec![8]),
        account("pool-a", 101, 0, vec![9]),
    ]);

    let h = harness(test_config(), source, store.clone(), checkpoints.clone());
    let counters = run_to_end(h).await;

    assert_eq!(store.event_count(), 3);
    assert_eq!(checkpoints.position(), Some(UpdatePosition::new(101, 0)));

    let snap = counters.snapshot();
    assert_eq!(snap.updates_received, 3);
    assert_eq!(snap.events_decoded, 3);
    assert_eq!(snap.events_written, 3);
    assert_eq!(snap.batches_dead_lettered, 0);

    // Per-entity events landed with their own positions intact.
    let a_events = store.events_for("pool-a");
    assert_eq!(a_events.len(), 2);
    assert!(a_events.iter().any(|e| e.base_amount == 7 && e.slot == 100));
    assert!(a_events.iter().any(|e| e.base_amount == 9 && e.slot == 101));
}

#[tokio::test]
async fn replayed_feed_after_restart_leaves_no_duplicate_rows() {
    let store = Arc::new(MemoryEventStore::new());
    let checkpoints = Arc::new(SharedCheckpointStore::default());

    // First run commits through slot 100.
    let first = ScriptedSource::new(vec![
        account("pool", 99, 4, vec![1]),
        account("pool", 100, 2, vec![2]),
    ]);
    let h = harness(test_config(), first, store.clone(), checkpoints.clone());
    run_to_end(h).await;
    assert_eq!(store.event_count(), 2);
    assert_eq!(checkpoints.position(), Some(UpdatePosition::new(100, 2)));

    // Second run: the feed replays everything at or before slot 100, then
    // continues with new slots.
    let second = ScriptedSource::new(vec![
        account("pool", 99, 4, vec![1]),
        account("pool", 100, 2, vec![2]),
        account("pool", 101, 0, vec![3]),
        account("pool", 102, 1, vec![4]),
    ]);
    let h = harness(test_config(), second, store.clone(), checkpoints.clone());
    let resume_probe = Arc::clone(&checkpoints);
    run_to_end(h).await;

    // Replayed rows collapsed on their idempotency keys; new rows landed.
    assert_eq!(store.event_count(), 4);
    assert_eq!(resume_probe.position(), Some(UpdatePosition::new(102, 1)));
}

#[tokio::test]
async fn source_passed_the_saved_checkpoint_on_open() {
    let store = Arc::new(MemoryEventStore::new());
    let checkpoints = Arc::new(SharedCheckpointStore::default());

    let first = ScriptedSource::new(vec![account("pool", 500, 3, vec![1])]);
    let h = harness(test_config(), first, store.clone(), checkpoints.clone());
    run_to_end(h).await;

    let second = Arc::new(ScriptedSource::new(vec![]));
    let mut registry = DecoderRegistry::new();
    registry.register(Arc::new(ByteDecoder));
    let manager = CheckpointManager::new(
        Box::new(SharedHandle(checkpoints.clone())),
        "test-pipe",
    );
    let writer = SinkWriter::new(store, manager);
    let engine = PipelineEngine::new(test_config(), second.clone(), Arc::new(registry));
    let (_tx, rx) = watch::channel(false);
    engine.run(writer, rx).await.unwrap();

    let resume = second.resume_seen().expect("no resume checkpoint passed");
    assert_eq!(resume.position(), UpdatePosition::new(500, 3));
}

#[tokio::test]
async fn transient_store_outage_recovers_below_retry_ceiling() {
    let store = Arc::new(FlakyStore::failing(2));
    let checkpoints = Arc::new(SharedCheckpointStore::default());
    let source = ScriptedSource::new(vec![account("pool", 100, 1, vec![5])]);

    let h = harness(test_config(), source, store.clone(), checkpoints.clone());
    let counters = run_to_end(h).await;

    assert_eq!(*store.insert_calls.lock().unwrap(), 3); // 2 failures + 1 success
    assert_eq!(store.inner.event_count(), 1);
    assert!(store.inner.dead_letters().is_empty());
    // One batch, one checkpoint save.
    assert_eq!(checkpoints.saves(), 1);
    assert_eq!(checkpoints.position(), Some(UpdatePosition::new(100, 1)));
    assert_eq!(counters.snapshot().batches_dead_lettered, 0);
}

#[tokio::test]
async fn exhausted_retries_dead_letter_the_batch_and_freeze_checkpoint() {
    let store = Arc::new(FlakyStore::failing(u32::MAX));
    let checkpoints = Arc::new(SharedCheckpointStore::default());
    let source = ScriptedSource::new(vec![
        account("pool", 100, 1, vec![5]),
        account("pool", 100, 2, vec![6]),
    ]);

    let h = harness(test_config(), source, store.clone(), checkpoints.clone());
    let counters = run_to_end(h).await;

    let letters = store.inner.dead_letters();
    assert_eq!(letters.len(), 2);
    assert!(letters.iter().all(|l| l.reason.contains("connection reset")));
    assert_eq!(store.inner.event_count(), 0);
    // Checkpoint never moved.
    assert_eq!(checkpoints.position(), None);
    assert_eq!(checkpoints.saves(), 0);
    assert_eq!(counters.snapshot().batches_dead_lettered, 1);
    assert_eq!(counters.snapshot().events_written, 0);
}

#[tokio::test]
async fn malformed_and_foreign_updates_do_not_block_the_batch() {
    let store = Arc::new(MemoryEventStore::new());
    let checkpoints = Arc::new(SharedCheckpointStore::default());
    let mut config = test_config();
    config.lanes = 1; // single lane keeps arrival order deterministic

    let source = ScriptedSource::new(vec![
        account("pool", 100, 1, vec![1]),
        account("pool", 100, 2, vec![]), // malformed: dropped, logged
        account("pool", 100, 3, vec![0]), // not this protocol: skipped
        account("pool", 100, 4, vec![2]),
    ]);

    let h = harness(config, source, store.clone(), checkpoints.clone());
    let counters = run_to_end(h).await;

    assert_eq!(store.event_count(), 2);
    let snap = counters.snapshot();
    assert_eq!(snap.decode_malformed, 1);
    assert_eq!(snap.skipped_unrecognized, 1);
    assert_eq!(checkpoints.position(), Some(UpdatePosition::new(100, 4)));
}

#[tokio::test]
async fn stale_and_duplicate_account_writes_are_dropped_before_decode() {
    let store = Arc::new(MemoryEventStore::new());
    let checkpoints = Arc::new(SharedCheckpointStore::default());
    let source = ScriptedSource::new(vec![
        account("pool", 100, 5, vec![1]),
        account("pool", 100, 5, vec![2]), // duplicate
        account("pool", 99, 9, vec![3]),  // late
        account("pool", 100, 6, vec![4]),
    ]);

    let h = harness(test_config(), source, store.clone(), checkpoints.clone());
    let counters = run_to_end(h).await;

    assert_eq!(store.event_count(), 2);
    let snap = counters.snapshot();
    assert_eq!(snap.skipped_stale, 2);
    assert_eq!(snap.events_decoded, 2);
    // The duplicate's payload never overwrote the first write.
    let first = store.get("pool:100:5").unwrap();
    assert_eq!(first.base_amount, 1);
}

#[tokio::test]
async fn transient_source_errors_are_counted_not_fatal() {
    let store = Arc::new(MemoryEventStore::new());
    let checkpoints = Arc::new(SharedCheckpointStore::default());
    let source = ScriptedSource::new(vec![
        account("pool", 100, 1, vec![1]),
        Err(SourceError::Transport("read timed out".into())),
        account("pool", 100, 2, vec![2]),
    ]);

    let h = harness(test_config(), source, store.clone(), checkpoints.clone());
    let counters = run_to_end(h).await;

    assert_eq!(store.event_count(), 2);
    assert_eq!(counters.snapshot().source_errors, 1);
}

#[tokio::test]
async fn shutdown_drains_lanes_and_flushes_the_partial_batch() {
    let store = Arc::new(MemoryEventStore::new());
    let checkpoints = Arc::new(SharedCheckpointStore::default());
    let mut config = test_config();
    // Neither threshold can fire on its own; only shutdown flushes.
    config.batch_max_events = 1_000;
    config.batch_max_wait_ms = 60_000;

    let source = ScriptedSource::hanging(vec![
        account("pool-a", 100, 1, vec![1]),
        account("pool-b", 100, 2, vec![2]),
        account("pool-a", 101, 0, vec![3]),
    ]);

    let h = harness(config, source, store.clone(), checkpoints.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(h.engine.run(h.writer, shutdown_rx));

    // Let the script drain into the open batch, then signal shutdown.
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    run.await.unwrap().expect("pipeline run failed");

    assert_eq!(store.event_count(), 3);
    assert_eq!(checkpoints.position(), Some(UpdatePosition::new(101, 0)));
}

#[tokio::test]
async fn empty_program_filter_is_rejected_before_anything_opens() {
    let store = Arc::new(MemoryEventStore::new());
    let checkpoints = Arc::new(SharedCheckpointStore::default());
    let mut config = test_config();
    config.filter.programs.clear();

    let source = ScriptedSource::new(vec![account("pool", 100, 1, vec![1])]);
    let h = harness(config, source, store.clone(), checkpoints.clone());
    let (_tx, rx) = watch::channel(false);

    assert!(h.engine.run(h.writer, rx).await.is_err());
    assert_eq!(store.event_count(), 0);
}
