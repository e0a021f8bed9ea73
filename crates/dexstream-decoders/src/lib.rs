//! dexstream-decoders — protocol decoders for the ingestion pipeline.
//!
//! Each decoder is a pure `ProtocolDecoder`: raw account bytes or
//! instruction data in, typed `DecodedEvent` out. Unknown discriminators
//! and sizes answer `Unrecognized` so upstream protocol upgrades degrade
//! to skipped updates instead of failures.

pub mod helpers;
pub mod pump;
pub mod raydium;

pub use pump::PumpFunDecoder;
pub use raydium::RaydiumAmmDecoder;

use std::sync::Arc;

use dexstream_core::DecoderRegistry;

/// Registry with every production decoder registered.
pub fn default_registry() -> DecoderRegistry {
    let mut registry = DecoderRegistry::new();
    registry.register(Arc::new(RaydiumAmmDecoder));
    registry.register(Arc::new(PumpFunDecoder));
    registry
}
