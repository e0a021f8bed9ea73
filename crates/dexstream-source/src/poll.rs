//! `RpcPollSource` — poll/crawl adapter over HTTP JSON-RPC.
//!
//! Each sweep fetches the current program-owned account set with
//! `getProgramAccounts` (withContext, so every account carries the sweep
//! slot) and, when transaction ingestion is enabled, walks new signatures
//! with `getSignaturesForAddress` (paginated by an `until` cursor) and
//! fetches each with `getTransaction`. Account sweeps at or below the
//! checkpoint slot are skipped entirely; the signature cursor only moves
//! past signatures that were actually fetched.

use std::time::Duration;

use async_trait::async_trait;
use futures::{channel::mpsc, SinkExt};
use serde_json::{json, Value};
use tokio::time;
use tracing::{debug, info, warn};

use dexstream_core::{
    Checkpoint, RawAccountUpdate, RawTransactionUpdate, RawUpdate, SourceFilter,
};

use crate::backoff::ReconnectPolicy;
use crate::error::SourceError;
use crate::source::{UpdateSource, UpdateStream};
use crate::ws::parse_instructions;

/// Poll/crawl source over an HTTP JSON-RPC endpoint.
pub struct RpcPollSource {
    url: String,
    poll_interval: Duration,
    channel_capacity: usize,
    client: reqwest::Client,
}

impl RpcPollSource {
    pub fn new(url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            url: url.into(),
            poll_interval,
            channel_capacity: 1_024,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

#[async_trait]
impl UpdateSource for RpcPollSource {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn open(
        &self,
        filter: &SourceFilter,
        resume: Option<Checkpoint>,
    ) -> Result<UpdateStream, SourceError> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(SourceError::Config(format!(
                "RPC endpoint must be http:// or https://, got `{}`",
                self.url
            )));
        }
        if filter.programs.is_empty() {
            return Err(SourceError::Config("no program ids to poll".into()));
        }

        let (tx, rx) = mpsc::channel::<Result<RawUpdate, SourceError>>(self.channel_capacity);
        let resume_slot = resume.map(|cp| cp.slot).unwrap_or(0);
        let sweeper = PollSweeper {
            url: self.url.clone(),
            client: self.client.clone(),
            filter: filter.clone(),
            poll_interval: self.poll_interval,
            last_swept_slot: resume_slot,
            resume_slot,
            signature_cursor: None,
            first_sweep: true,
        };

        tokio::spawn(sweeper.run(tx));
        Ok(Box::pin(rx))
    }
}

// ─── Sweep loop ───────────────────────────────────────────────────────────────

struct PollSweeper {
    url: String,
    client: reqwest::Client,
    filter: SourceFilter,
    poll_interval: Duration,
    /// Highest account-sweep slot already emitted; account sweeps at or
    /// below it are skipped.
    last_swept_slot: u64,
    /// Checkpoint slot at open; signatures at or below it are replays.
    resume_slot: u64,
    /// `until` cursor for signature pagination. Advanced only past
    /// signatures that were handled, so a failed fetch is retried on the
    /// next sweep instead of lost.
    signature_cursor: Option<String>,
    first_sweep: bool,
}

impl PollSweeper {
    async fn run(mut self, mut tx: mpsc::Sender<Result<RawUpdate, SourceError>>) {
        info!(
            url = %self.url,
            interval_ms = self.poll_interval.as_millis() as u64,
            resume_slot = self.last_swept_slot,
            "poll source started"
        );
        let mut backoff = ReconnectPolicy::default();

        loop {
            match self.sweep(&mut tx).await {
                Ok(()) => {
                    backoff.reset();
                    time::sleep(self.poll_interval).await;
                }
                Err(SourceError::Malformed(reason)) => {
                    // One bad response; drop it and keep the cadence.
                    debug!(%reason, "dropping malformed poll response");
                    time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    warn!(error = %e, "poll sweep failed");
                    if tx.send(Err(e)).await.is_err() {
                        return;
                    }
                    time::sleep(backoff.next_delay()).await;
                }
            }
            if tx.is_closed() {
                return;
            }
        }
    }

    async fn sweep(
        &mut self,
        tx: &mut mpsc::Sender<Result<RawUpdate, SourceError>>,
    ) -> Result<(), SourceError> {
        for program in self.filter.programs.clone() {
            self.sweep_accounts(&program, tx).await?;
            if self.filter.transactions {
                self.sweep_transactions(&program, tx).await?;
            }
        }
        self.first_sweep = false;
        Ok(())
    }

    async fn sweep_accounts(
        &mut self,
        program: &str,
        tx: &mut mpsc::Sender<Result<RawUpdate, SourceError>>,
    ) -> Result<(), SourceError> {
        let result = self
            .rpc_call(
                "getProgramAccounts",
                json!([
                    program,
                    {
                        "encoding": "base64",
                        "commitment": self.filter.commitment.as_str(),
                        "withContext": true
                    }
                ]),
            )
            .await?;

        let slot = result
            .pointer("/context/slot")
            .and_then(Value::as_u64)
            .ok_or_else(|| SourceError::Malformed("getProgramAccounts without context".into()))?;

        // Already covered by a previous sweep or the checkpoint.
        if slot <= self.last_swept_slot && !self.first_sweep {
            debug!(slot, program, "skipping already-processed sweep slot");
            return Ok(());
        }

        let accounts = result
            .get("value")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::Malformed("getProgramAccounts without value".into()))?;

        for entry in accounts {
            match parse_program_account(entry, program, slot, self.first_sweep) {
                Ok(update) => {
                    if tx.send(Ok(RawUpdate::Account(update))).await.is_err() {
                        return Err(SourceError::Closed);
                    }
                }
                Err(e) => debug!(error = %e, "dropping malformed account entry"),
            }
        }

        self.last_swept_slot = self.last_swept_slot.max(slot);
        Ok(())
    }

    async fn sweep_transactions(
        &mut self,
        program: &str,
        tx: &mut mpsc::Sender<Result<RawUpdate, SourceError>>,
    ) -> Result<(), SourceError> {
        let mut params = json!([program, { "limit": 100 }]);
        if let Some(cursor) = &self.signature_cursor {
            params = json!([program, { "limit": 100, "until": cursor }]);
        }

        let result = self.rpc_call("getSignaturesForAddress", params).await?;
        let entries = result
            .as_array()
            .ok_or_else(|| SourceError::Malformed("getSignaturesForAddress not an array".into()))?;

        // Newest first; walk oldest-to-newest so slots arrive in order,
        // moving the cursor one handled signature at a time.
        for entry in entries.iter().rev() {
            let signature = match entry.get("signature").and_then(Value::as_str) {
                Some(sig) => sig,
                None => continue,
            };
            if entry.get("slot").and_then(Value::as_u64).unwrap_or(0) <= self.resume_slot {
                // Replay of ground the checkpoint already covers.
                self.signature_cursor = Some(signature.to_string());
                continue;
            }
            match self.fetch_transaction(signature).await {
                Ok(Some(update)) => {
                    if tx.send(Ok(RawUpdate::Transaction(update))).await.is_err() {
                        return Err(SourceError::Closed);
                    }
                    self.signature_cursor = Some(signature.to_string());
                }
                Ok(None) => {
                    // Not yet visible at this commitment; the cursor stays
                    // put and the next sweep retries from here.
                    return Ok(());
                }
                Err(SourceError::Malformed(reason)) => {
                    debug!(signature, %reason, "dropping malformed transaction");
                    self.signature_cursor = Some(signature.to_string());
                }
                // Transient: surface to the run loop for backoff; the
                // cursor has not moved past this signature.
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn fetch_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<RawTransactionUpdate>, SourceError> {
        let result = self
            .rpc_call(
                "getTransaction",
                json!([
                    signature,
                    {
                        "encoding": "jsonParsed",
                        "commitment": self.filter.commitment.as_str(),
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await?;

        if result.is_null() {
            return Ok(None); // not yet visible at this commitment
        }
        parse_transaction(&result, signature).map(Some)
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, SourceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });
        let response: Value = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SourceError::connect(&self.url, &e))?
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("{method}: {e}")))?;

        if let Some(err) = response.get("error") {
            return Err(SourceError::Transport(format!("{method} failed: {err}")));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| SourceError::Malformed(format!("{method} without result")))
    }
}

// ─── Response parsing ─────────────────────────────────────────────────────────

fn parse_program_account(
    entry: &Value,
    program: &str,
    slot: u64,
    is_startup: bool,
) -> Result<RawAccountUpdate, SourceError> {
    let pubkey = entry
        .get("pubkey")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Malformed("account entry without pubkey".into()))?;
    let account = entry
        .get("account")
        .ok_or_else(|| SourceError::Malformed("account entry without account".into()))?;
    let data = crate::ws::decode_account_data(account.get("data"))?;

    Ok(RawAccountUpdate {
        owner_program: program.to_string(),
        account: pubkey.to_string(),
        slot,
        // getProgramAccounts carries no write tiebreaker; a sweep is one
        // consistent snapshot, so zero orders correctly against later slots.
        write_version: 0,
        lamports: account.get("lamports").and_then(Value::as_u64).unwrap_or(0),
        data,
        is_startup,
    })
}

fn parse_transaction(result: &Value, signature: &str) -> Result<RawTransactionUpdate, SourceError> {
    let slot = result
        .get("slot")
        .and_then(Value::as_u64)
        .ok_or_else(|| SourceError::Malformed("getTransaction without slot".into()))?;

    let meta = result.get("meta");
    let success = meta
        .and_then(|m| m.get("err"))
        .map(Value::is_null)
        .unwrap_or(true);
    let logs = meta
        .and_then(|m| m.get("logMessages"))
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let instructions = result
        .pointer("/transaction/message/instructions")
        .and_then(Value::as_array)
        .map(|list| parse_instructions(list))
        .unwrap_or_default();

    Ok(RawTransactionUpdate {
        signature: signature.to_string(),
        slot,
        instructions,
        logs,
        success,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
