//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

// ─── UpdatePosition ───────────────────────────────────────────────────────────

/// Position of an update in the chain's write order.
///
/// Account writes are ordered by `(slot, write_version)`: the slot the write
/// landed in, plus a per-slot tiebreaker assigned by the validator. The
/// derived `Ord` is the lexicographic order the whole pipeline relies on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UpdatePosition {
    /// Slot the write landed in.
    pub slot: u64,
    /// Intra-slot write sequence number.
    pub write_version: u64,
}

impl UpdatePosition {
    pub fn new(slot: u64, write_version: u64) -> Self {
        Self {
            slot,
            write_version,
        }
    }
}

// ─── Raw updates ──────────────────────────────────────────────────────────────

/// A raw account-state write observed on chain, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAccountUpdate {
    /// Program that owns the account (base58).
    pub owner_program: String,
    /// Address of the account that changed (base58).
    pub account: String,
    /// Slot the write landed in.
    pub slot: u64,
    /// Intra-slot write sequence number.
    pub write_version: u64,
    /// Account balance in lamports after the write.
    pub lamports: u64,
    /// Raw account data.
    pub data: Vec<u8>,
    /// `true` when emitted by an initial snapshot sweep rather than a live write.
    pub is_startup: bool,
}

impl RawAccountUpdate {
    pub fn position(&self) -> UpdatePosition {
        UpdatePosition::new(self.slot, self.write_version)
    }
}

/// One instruction invocation inside a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    /// Program invoked (base58).
    pub program: String,
    /// Accounts passed to the instruction, in position order (base58).
    pub accounts: Vec<String>,
    /// Raw instruction data.
    pub data: Vec<u8>,
}

/// A raw confirmed transaction observed on chain, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransactionUpdate {
    /// Transaction signature (base58).
    pub signature: String,
    /// Slot the transaction was confirmed in.
    pub slot: u64,
    /// Top-level instruction invocations in execution order.
    pub instructions: Vec<RawInstruction>,
    /// Program log lines emitted during execution.
    pub logs: Vec<String>,
    /// `false` when the transaction failed on chain.
    pub success: bool,
}

/// A raw update from either source mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawUpdate {
    Account(RawAccountUpdate),
    Transaction(RawTransactionUpdate),
}

impl RawUpdate {
    /// Slot the update was observed in.
    pub fn slot(&self) -> u64 {
        match self {
            RawUpdate::Account(a) => a.slot,
            RawUpdate::Transaction(t) => t.slot,
        }
    }

    /// Key used to assign the update to a dispatch lane.
    ///
    /// Account updates partition by the account itself, so every write to
    /// one entity lands on the same lane in arrival order. Transactions
    /// partition by signature: their entity keys are only known after
    /// decoding.
    pub fn partition_key(&self) -> &str {
        match self {
            RawUpdate::Account(a) => &a.account,
            RawUpdate::Transaction(t) => &t.signature,
        }
    }
}

// ─── Decoded events ───────────────────────────────────────────────────────────

/// Kind of domain event produced by a protocol decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Initialize,
    Swap,
    AddLiquidity,
    RemoveLiquidity,
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Initialize => "initialize",
            EventKind::Swap => "swap",
            EventKind::AddLiquidity => "add_liquidity",
            EventKind::RemoveLiquidity => "remove_liquidity",
            EventKind::Other => "other",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed domain event decoded from a raw update.
///
/// Amounts and reserves are fixed-precision native token units (no floats);
/// fields that do not apply to a given event carry zero. Account-derived
/// events additionally carry a `state` snapshot for the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Protocol tag (e.g. `"raydium-amm-v4"`).
    pub protocol: String,
    /// What happened.
    pub kind: EventKind,
    /// Entity the event belongs to — the pool / curve account (base58).
    pub entity: String,
    /// Base-side token amount in native units.
    pub base_amount: u64,
    /// Quote-side token amount in native units.
    pub quote_amount: u64,
    /// Base-side reserve after the update (0 when unknown).
    pub base_reserve: u64,
    /// Quote-side reserve after the update (0 when unknown).
    pub quote_reserve: u64,
    /// Slot the originating update landed in.
    pub slot: u64,
    /// Account `write_version`, or the instruction index for
    /// transaction-derived events.
    pub write_version: u64,
    /// Originating transaction signature (tx-derived events only).
    pub signature: Option<String>,
    /// Latest-state snapshot for the cache (account-derived events only).
    pub state: Option<serde_json::Value>,
}

impl DecodedEvent {
    /// Key that makes sink writes idempotent.
    ///
    /// Account-derived events collapse on `entity:slot:write_version`,
    /// transaction-derived events on `signature:index`.
    pub fn idempotency_key(&self) -> String {
        match &self.signature {
            Some(sig) => format!("{sig}:{}", self.write_version),
            None => format!("{}:{}:{}", self.entity, self.slot, self.write_version),
        }
    }

    pub fn position(&self) -> UpdatePosition {
        UpdatePosition::new(self.slot, self.write_version)
    }
}

// ─── CacheEntry ───────────────────────────────────────────────────────────────

/// Value written to the low-latency cache for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entity the snapshot belongs to (base58).
    pub entity: String,
    /// Latest decoded state snapshot.
    pub state: serde_json::Value,
    /// Slot the snapshot was produced at.
    pub updated_at_slot: u64,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
