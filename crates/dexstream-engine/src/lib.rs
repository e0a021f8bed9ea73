//! dexstream-engine — wires source, lanes, and sink into one pipeline.
//!
//! ```text
//! source pump ──▶ lane 0 (gate + decode) ─┐
//!             ──▶ lane 1 (gate + decode) ─┼──▶ sink (batch + commit)
//!             ──▶ lane N (gate + decode) ─┘
//! ```
//!
//! Bounded mpsc channels are the only cross-task primitive; a full queue
//! suspends the producer, which is how backpressure reaches the remote
//! feed. Shutdown closes the chain left to right: the pump stops, lanes
//! drain, the sink flushes its open batch, and `run` returns.

pub mod counters;
pub mod engine;
pub mod error;

pub use counters::{CountersSnapshot, PipelineCounters};
pub use engine::PipelineEngine;
pub use error::PipelineError;
