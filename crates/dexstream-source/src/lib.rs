//! dexstream-source — data-source adapters for the ingestion pipeline.
//!
//! Two acquisition modes behind one [`UpdateSource`] contract:
//! - [`WsStreamSource`] — persistent WebSocket JSON-RPC subscription
//!   (`programSubscribe` / `transactionSubscribe`) with reconnect,
//!   resubscribe, and ping/pong keepalive.
//! - [`RpcPollSource`] — interval-driven JSON-RPC over HTTP
//!   (`getProgramAccounts`, `getSignaturesForAddress`, `getTransaction`).
//!
//! Both resume from the last [`Checkpoint`](dexstream_core::Checkpoint) and
//! tolerate a bounded replay window; exact deduplication happens downstream
//! at the ordering gate and the store's idempotent writes.

pub mod backoff;
pub mod error;
pub mod poll;
pub mod source;
pub mod ws;

pub use backoff::ReconnectPolicy;
pub use error::SourceError;
pub use poll::RpcPollSource;
pub use source::{UpdateSource, UpdateStream};
pub use ws::WsStreamSource;
