//! Pipeline configuration.
//!
//! Everything is built from environment variables (the binary honors a
//! `.env` file) on top of serde-friendly defaults, and validated once
//! before any connection is opened. Validation failures are fatal.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─── Commitment ───────────────────────────────────────────────────────────────

/// Solana commitment level used for subscriptions and queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl std::str::FromStr for Commitment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(ConfigError::invalid(
                "COMMITMENT",
                format!("unknown commitment level `{other}`"),
            )),
        }
    }
}

// ─── SourceFilter ─────────────────────────────────────────────────────────────

/// Which programs to ingest, and at what commitment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceFilter {
    /// Program ids to subscribe to / poll (base58).
    pub programs: Vec<String>,
    /// Commitment level for subscriptions and queries.
    #[serde(default)]
    pub commitment: Commitment,
    /// Also ingest transaction activity, not just account state.
    #[serde(default)]
    pub transactions: bool,
}

impl SourceFilter {
    /// Create a filter for a single program id.
    pub fn program(id: impl Into<String>) -> Self {
        Self {
            programs: vec![id.into()],
            ..Default::default()
        }
    }

    /// Enable transaction ingestion.
    pub fn with_transactions(mut self) -> Self {
        self.transactions = true;
        self
    }

    /// Returns `true` if `program` is one of the filtered programs.
    ///
    /// Base58 ids are case-sensitive, so this is an exact match.
    pub fn matches_owner(&self, program: &str) -> bool {
        self.programs.iter().any(|p| p == program)
    }
}

// ─── PipelineConfig ───────────────────────────────────────────────────────────

/// Top-level pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Identifier namespacing the checkpoint (one per deployment).
    #[serde(default = "default_pipeline_id")]
    pub pipeline_id: String,
    /// Number of dispatch lanes (parallel decode workers).
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// Capacity of each bounded update queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Flush a sink batch at this many events…
    #[serde(default = "default_batch_max_events")]
    pub batch_max_events: usize,
    /// …or after this long, whichever triggers first.
    #[serde(default = "default_batch_max_wait_ms")]
    pub batch_max_wait_ms: u64,
    /// Store write attempts before a batch is dead-lettered.
    #[serde(default = "default_sink_max_retries")]
    pub sink_max_retries: u32,
    /// Cache entry TTL in seconds (0 = no expiry).
    #[serde(default)]
    pub cache_ttl_secs: u64,
    /// Poll mode: interval between sweeps.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// What to ingest.
    #[serde(default)]
    pub filter: SourceFilter,
}

fn default_pipeline_id() -> String {
    "dexstream".to_string()
}
fn default_lanes() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    1_024
}
fn default_batch_max_events() -> usize {
    256
}
fn default_batch_max_wait_ms() -> u64 {
    500
}
fn default_sink_max_retries() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    3_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_id: default_pipeline_id(),
            lanes: default_lanes(),
            queue_capacity: default_queue_capacity(),
            batch_max_events: default_batch_max_events(),
            batch_max_wait_ms: default_batch_max_wait_ms(),
            sink_max_retries: default_sink_max_retries(),
            cache_ttl_secs: 0,
            poll_interval_ms: default_poll_interval_ms(),
            filter: SourceFilter::default(),
        }
    }
}

impl PipelineConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Recognized variables: `PIPELINE_ID`, `LANES`, `QUEUE_CAPACITY`,
    /// `BATCH_MAX_EVENTS`, `BATCH_MAX_WAIT_MS`, `SINK_MAX_RETRIES`,
    /// `CACHE_TTL_SECS`, `POLL_INTERVAL_MS`, `PROGRAM_IDS` (comma-separated),
    /// `COMMITMENT`, `INGEST_TRANSACTIONS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("PIPELINE_ID") {
            cfg.pipeline_id = v;
        }
        if let Ok(v) = std::env::var("LANES") {
            cfg.lanes = parse_setting("LANES", &v)?;
        }
        if let Ok(v) = std::env::var("QUEUE_CAPACITY") {
            cfg.queue_capacity = parse_setting("QUEUE_CAPACITY", &v)?;
        }
        if let Ok(v) = std::env::var("BATCH_MAX_EVENTS") {
            cfg.batch_max_events = parse_setting("BATCH_MAX_EVENTS", &v)?;
        }
        if let Ok(v) = std::env::var("BATCH_MAX_WAIT_MS") {
            cfg.batch_max_wait_ms = parse_setting("BATCH_MAX_WAIT_MS", &v)?;
        }
        if let Ok(v) = std::env::var("SINK_MAX_RETRIES") {
            cfg.sink_max_retries = parse_setting("SINK_MAX_RETRIES", &v)?;
        }
        if let Ok(v) = std::env::var("CACHE_TTL_SECS") {
            cfg.cache_ttl_secs = parse_setting("CACHE_TTL_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("POLL_INTERVAL_MS") {
            cfg.poll_interval_ms = parse_setting("POLL_INTERVAL_MS", &v)?;
        }
        if let Ok(v) = std::env::var("PROGRAM_IDS") {
            cfg.filter.programs = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("COMMITMENT") {
            cfg.filter.commitment = v.parse()?;
        }
        if let Ok(v) = std::env::var("INGEST_TRANSACTIONS") {
            cfg.filter.transactions = parse_setting("INGEST_TRANSACTIONS", &v)?;
        }
        Ok(cfg)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.programs.is_empty() {
            return Err(ConfigError::Missing("PROGRAM_IDS"));
        }
        if self.lanes == 0 {
            return Err(ConfigError::invalid("LANES", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("QUEUE_CAPACITY", "must be at least 1"));
        }
        if self.batch_max_events == 0 {
            return Err(ConfigError::invalid(
                "BATCH_MAX_EVENTS",
                "must be at least 1",
            ));
        }
        if self.batch_max_wait_ms == 0 {
            return Err(ConfigError::invalid(
                "BATCH_MAX_WAIT_MS",
                "must be at least 1ms",
            ));
        }
        Ok(())
    }
}

fn parse_setting<T: std::str::FromStr>(
    setting: &'static str,
    value: &str,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(setting, e.to_string()))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
