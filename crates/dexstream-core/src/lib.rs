//! dexstream-core — types and contracts for the DEX ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! UpdateSource ──▶ dispatcher ──▶ lane workers ──▶ SinkWriter
//!                  (lane_for)      ├── StaleGate        ├── EventStore
//!                                  └── DecoderRegistry  ├── StateCache
//!                                                       └── CheckpointManager
//! ```
//!
//! This crate holds the pieces every other dexstream crate agrees on: raw
//! update and decoded event types, the decoder contract and registry, the
//! per-entity ordering gate, lane partitioning, checkpoint management, and
//! pipeline configuration.

pub mod checkpoint;
pub mod config;
pub mod decoder;
pub mod error;
pub mod gate;
pub mod lane;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::{Commitment, PipelineConfig, SourceFilter};
pub use decoder::{DecoderRegistry, ProtocolDecoder};
pub use error::{CheckpointError, ConfigError, DecodeError};
pub use gate::StaleGate;
pub use lane::lane_for;
pub use types::{
    CacheEntry, DecodedEvent, EventKind, RawAccountUpdate, RawInstruction, RawTransactionUpdate,
    RawUpdate, UpdatePosition,
};
