//! Decoder contract and registry.
//!
//! Decoders are pure transforms: raw bytes in, typed events out, no I/O and
//! no shared state. The registry is built once at startup and routes updates
//! by owning program id. Several decoders may claim the same program id
//! (sub-protocols behind discriminator prefixes); they are tried in
//! registration order and the first success wins.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DecodeError;
use crate::types::{DecodedEvent, RawAccountUpdate, RawTransactionUpdate, RawUpdate};

/// A stateless decoder for one DEX protocol.
pub trait ProtocolDecoder: Send + Sync {
    /// Protocol tag stamped on every event this decoder emits.
    fn protocol(&self) -> &'static str;

    /// Program ids this decoder claims.
    fn program_ids(&self) -> &'static [&'static str];

    /// Decode an account-state write into a single event.
    fn decode_account(&self, update: &RawAccountUpdate) -> Result<DecodedEvent, DecodeError>;

    /// Decode the instructions of a confirmed transaction into events.
    ///
    /// Returns `Unrecognized` when the transaction contains no instruction
    /// this decoder understands.
    fn decode_transaction(
        &self,
        update: &RawTransactionUpdate,
    ) -> Result<Vec<DecodedEvent>, DecodeError>;
}

// ─── DecoderRegistry ──────────────────────────────────────────────────────────

/// Routes raw updates to the decoders registered for their program id.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Vec<Arc<dyn ProtocolDecoder>>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder under every program id it claims.
    pub fn register(&mut self, decoder: Arc<dyn ProtocolDecoder>) {
        for id in decoder.program_ids() {
            self.decoders
                .entry((*id).to_string())
                .or_default()
                .push(Arc::clone(&decoder));
        }
    }

    /// Decoders claiming `program`, in registration order.
    pub fn decoders_for(&self, program: &str) -> &[Arc<dyn ProtocolDecoder>] {
        self.decoders.get(program).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `true` if any registered decoder claims `program`.
    pub fn handles(&self, program: &str) -> bool {
        self.decoders.contains_key(program)
    }

    /// Number of distinct program ids with at least one decoder.
    pub fn program_count(&self) -> usize {
        self.decoders.len()
    }

    /// Decode a raw update.
    ///
    /// `Ok(vec![])` means no registered decoder claimed the update (skip);
    /// `Err` means at least one decoder claimed it and every claimant found
    /// the payload malformed.
    pub fn decode_update(&self, update: &RawUpdate) -> Result<Vec<DecodedEvent>, DecodeError> {
        match update {
            RawUpdate::Account(account) => self.decode_account_update(account),
            RawUpdate::Transaction(tx) => self.decode_transaction_update(tx),
        }
    }

    fn decode_account_update(
        &self,
        update: &RawAccountUpdate,
    ) -> Result<Vec<DecodedEvent>, DecodeError> {
        let mut malformed = None;
        for decoder in self.decoders_for(&update.owner_program) {
            match decoder.decode_account(update) {
                Ok(event) => return Ok(vec![event]),
                Err(err) if err.is_unrecognized() => continue,
                Err(err) => malformed = Some(err),
            }
        }
        match malformed {
            Some(err) => Err(err),
            None => Ok(Vec::new()),
        }
    }

    fn decode_transaction_update(
        &self,
        update: &RawTransactionUpdate,
    ) -> Result<Vec<DecodedEvent>, DecodeError> {
        let mut events = Vec::new();
        let mut malformed = None;
        // Each decoder scans the whole transaction, so try it once even if
        // its program appears in several instructions.
        let mut tried: Vec<&str> = Vec::new();
        for instruction in &update.instructions {
            if tried.contains(&instruction.program.as_str()) {
                continue;
            }
            tried.push(&instruction.program);
            for decoder in self.decoders_for(&instruction.program) {
                match decoder.decode_transaction(update) {
                    Ok(mut decoded) => {
                        events.append(&mut decoded);
                        break;
                    }
                    Err(err) if err.is_unrecognized() => continue,
                    Err(err) => malformed = Some(err),
                }
            }
        }
        if events.is_empty() {
            if let Some(err) = malformed {
                return Err(err);
            }
        }
        Ok(events)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
