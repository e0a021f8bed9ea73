//! ClickHouse event store.
//!
//! Rows land in `dex_events`, a ReplacingMergeTree ordered by the
//! idempotency key, so replayed events collapse to one row at merge time
//! and point lookups stay cheap. Dead letters go to their own table.

use async_trait::async_trait;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use dexstream_core::DecodedEvent;

use crate::error::SinkError;
use crate::store::{DeadLetter, EventStore};

const CREATE_EVENTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS dex_events (
    idempotency_key String,
    protocol        LowCardinality(String),
    kind            LowCardinality(String),
    entity          String,
    base_amount     UInt64,
    quote_amount    UInt64,
    base_reserve    UInt64,
    quote_reserve   UInt64,
    slot            UInt64,
    write_version   UInt64,
    signature       String,
    inserted_at     DateTime DEFAULT now()
)
ENGINE = ReplacingMergeTree
ORDER BY idempotency_key
";

const CREATE_DEAD_LETTERS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS dead_letters (
    idempotency_key String,
    entity          String,
    slot            UInt64,
    write_version   UInt64,
    payload         String,
    reason          String,
    failed_at       Int64
)
ENGINE = MergeTree
ORDER BY (failed_at, idempotency_key)
";

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
struct EventRow {
    idempotency_key: String,
    protocol: String,
    kind: String,
    entity: String,
    base_amount: u64,
    quote_amount: u64,
    base_reserve: u64,
    quote_reserve: u64,
    slot: u64,
    write_version: u64,
    signature: String,
}

impl EventRow {
    fn from_event(event: &DecodedEvent) -> Self {
        Self {
            idempotency_key: event.idempotency_key(),
            protocol: event.protocol.clone(),
            kind: event.kind.as_str().to_string(),
            entity: event.entity.clone(),
            base_amount: event.base_amount,
            quote_amount: event.quote_amount,
            base_reserve: event.base_reserve,
            quote_reserve: event.quote_reserve,
            slot: event.slot,
            write_version: event.write_version,
            signature: event.signature.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
struct DeadLetterRow {
    idempotency_key: String,
    entity: String,
    slot: u64,
    write_version: u64,
    payload: String,
    reason: String,
    failed_at: i64,
}

/// ClickHouse-backed durable event store.
pub struct ClickhouseEventStore {
    client: Client,
}

impl ClickhouseEventStore {
    pub fn new(url: &str, user: &str, password: &str, database: &str) -> Self {
        let client = Client::default()
            .with_url(url)
            .with_user(user)
            .with_password(password)
            .with_database(database);
        Self { client }
    }

    /// Build from `CLICKHOUSE_URL` / `CLICKHOUSE_USER` / `CLICKHOUSE_PASS`
    /// / `CLICKHOUSE_DATABASE` (database defaults to `default`).
    pub fn from_env() -> Result<Self, SinkError> {
        let url = std::env::var("CLICKHOUSE_URL")
            .map_err(|_| SinkError::Store("CLICKHOUSE_URL not set".into()))?;
        let user = std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".into());
        let password = std::env::var("CLICKHOUSE_PASS").unwrap_or_default();
        let database = std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "default".into());
        Ok(Self::new(&url, &user, &password, &database))
    }

    /// Create the tables if they do not exist. Called once at startup.
    pub async fn init_schema(&self) -> Result<(), SinkError> {
        self.client
            .query(CREATE_EVENTS_TABLE)
            .execute()
            .await
            .map_err(|e| SinkError::Store(e.to_string()))?;
        self.client
            .query(CREATE_DEAD_LETTERS_TABLE)
            .execute()
            .await
            .map_err(|e| SinkError::Store(e.to_string()))?;
        info!("clickhouse schema ready");
        Ok(())
    }
}

#[async_trait]
impl EventStore for ClickhouseEventStore {
    async fn insert_events(&self, events: &[DecodedEvent]) -> Result<(), SinkError> {
        let mut insert = self
            .client
            .insert("dex_events")
            .map_err(|e| SinkError::Store(e.to_string()))?;
        for event in events {
            insert
                .write(&EventRow::from_event(event))
                .await
                .map_err(|e| SinkError::Store(e.to_string()))?;
        }
        insert
            .end()
            .await
            .map_err(|e| SinkError::Store(e.to_string()))
    }

    async fn insert_dead_letters(&self, letters: &[DeadLetter]) -> Result<(), SinkError> {
        let mut insert = self
            .client
            .insert("dead_letters")
            .map_err(|e| SinkError::Store(e.to_string()))?;
        for letter in letters {
            let row = DeadLetterRow {
                idempotency_key: letter.idempotency_key.clone(),
                entity: letter.entity.clone(),
                slot: letter.slot,
                write_version: letter.write_version,
                payload: letter.payload.to_string(),
                reason: letter.reason.clone(),
                failed_at: letter.failed_at,
            };
            insert
                .write(&row)
                .await
                .map_err(|e| SinkError::Store(e.to_string()))?;
        }
        insert
            .end()
            .await
            .map_err(|e| SinkError::Store(e.to_string()))
    }
}
