//! `WsStreamSource` — push-stream adapter over a WebSocket JSON-RPC
//! subscription.
//!
//! A background task owns the socket: it subscribes with `programSubscribe`
//! per filtered program (plus `transactionSubscribe` when transaction
//! ingestion is enabled), answers server pings, and reconnects with
//! exponential backoff on any disconnect, resubscribing from the last
//! checkpoint slot. Updates are handed to the pipeline through a bounded
//! channel, so a slow consumer suspends the read loop instead of dropping
//! messages.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{channel::mpsc, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use dexstream_core::{
    Checkpoint, RawAccountUpdate, RawInstruction, RawTransactionUpdate, RawUpdate, SourceFilter,
};

use crate::backoff::ReconnectPolicy;
use crate::error::SourceError;
use crate::source::{UpdateSource, UpdateStream};

/// Reconnect if the socket is silent this long (heartbeats included).
const IDLE_TIMEOUT_SECS: u64 = 45;

/// Signatures remembered for replay deduplication after a reconnect.
const SEEN_SIGNATURES_WINDOW: usize = 512;

/// Account-write digests remembered for replay deduplication. Replayed
/// frames would otherwise mint a fresh fallback write version and a fresh
/// idempotency key, so the store would keep both rows.
const SEEN_ACCOUNTS_WINDOW: usize = 1_024;

/// Push-stream source over a WebSocket JSON-RPC endpoint.
pub struct WsStreamSource {
    url: String,
    reconnect_initial: Duration,
    reconnect_max: Duration,
    channel_capacity: usize,
}

impl WsStreamSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            channel_capacity: 1_024,
        }
    }

    pub fn with_reconnect(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

#[async_trait]
impl UpdateSource for WsStreamSource {
    fn name(&self) -> &'static str {
        "ws"
    }

    async fn open(
        &self,
        filter: &SourceFilter,
        resume: Option<Checkpoint>,
    ) -> Result<UpdateStream, SourceError> {
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(SourceError::Config(format!(
                "WS endpoint must be ws:// or wss://, got `{}`",
                self.url
            )));
        }
        if filter.programs.is_empty() {
            return Err(SourceError::Config("no program ids to subscribe".into()));
        }

        let (tx, rx) = mpsc::channel::<Result<RawUpdate, SourceError>>(self.channel_capacity);
        let session = WsSession {
            url: self.url.clone(),
            filter: filter.clone(),
            resume_slot: resume.map(|cp| cp.slot).unwrap_or(0),
            backoff: ReconnectPolicy::new(self.reconnect_initial, self.reconnect_max),
            seen_signatures: HashSet::new(),
            seen_queue: VecDeque::new(),
            seen_accounts: HashSet::new(),
            seen_accounts_queue: VecDeque::new(),
            local_write_seq: 0,
        };

        tokio::spawn(session.run(tx));
        Ok(Box::pin(rx))
    }
}

// ─── Background session ───────────────────────────────────────────────────────

struct WsSession {
    url: String,
    filter: SourceFilter,
    resume_slot: u64,
    backoff: ReconnectPolicy,
    seen_signatures: HashSet<String>,
    seen_queue: VecDeque<String>,
    seen_accounts: HashSet<u64>,
    seen_accounts_queue: VecDeque<u64>,
    /// Fallback write tiebreaker for endpoints that omit `writeVersion`.
    /// Only meaningful within one session; the slot dominates across
    /// reconnects and restarts.
    local_write_seq: u64,
}

impl WsSession {
    async fn run(mut self, mut tx: mpsc::Sender<Result<RawUpdate, SourceError>>) {
        loop {
            let ws = match connect_async(&self.url).await {
                Ok((ws, _)) => {
                    info!(url = %self.url, "WS connected");
                    self.backoff.reset();
                    ws
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "WS connect failed");
                    if tx
                        .send(Err(SourceError::connect(&self.url, &e)))
                        .await
                        .is_err()
                    {
                        return; // pipeline gone
                    }
                    time::sleep(self.backoff.next_delay()).await;
                    continue;
                }
            };

            let (mut write, mut read) = ws.split();

            if let Err(e) = self.send_subscriptions(&mut write).await {
                warn!(error = %e, "WS subscribe failed");
                time::sleep(self.backoff.next_delay()).await;
                continue;
            }

            // Read until the connection drops or goes silent.
            loop {
                let msg = match time::timeout(Duration::from_secs(IDLE_TIMEOUT_SECS), read.next())
                    .await
                {
                    Err(_) => {
                        warn!(idle_secs = IDLE_TIMEOUT_SECS, "WS idle, reconnecting");
                        break;
                    }
                    Ok(None) => {
                        warn!("WS stream ended, reconnecting");
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        warn!(error = %e, "WS receive error, reconnecting");
                        break;
                    }
                    Ok(Some(Ok(msg))) => msg,
                };

                match msg {
                    Message::Text(text) => match self.handle_text(&text) {
                        None => {}
                        Some(Ok(update)) => {
                            // Bounded send: suspends here when the pipeline
                            // is busy, which is the backpressure path.
                            if tx.send(Ok(update)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            debug!(error = %e, "dropping malformed WS message");
                        }
                    },
                    Message::Ping(payload) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!("WS closed by server, reconnecting");
                        break;
                    }
                    _ => {} // binary / pong
                }
            }

            if tx.send(Err(SourceError::Closed)).await.is_err() {
                return;
            }
            time::sleep(self.backoff.next_delay()).await;
        }
    }

    async fn send_subscriptions<S>(&self, write: &mut S) -> Result<(), SourceError>
    where
        S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let commitment = self.filter.commitment.as_str();
        let mut id = 1u64;

        for program in &self.filter.programs {
            let req = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "programSubscribe",
                "params": [
                    program,
                    { "encoding": "base64", "commitment": commitment }
                ]
            });
            write
                .send(Message::Text(req.to_string().into()))
                .await
                .map_err(|e| SourceError::Transport(e.to_string()))?;
            id += 1;
        }

        if self.filter.transactions {
            let req = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "transactionSubscribe",
                "params": [
                    { "failed": false, "accountInclude": self.filter.programs },
                    { "commitment": commitment, "encoding": "jsonParsed" }
                ]
            });
            write
                .send(Message::Text(req.to_string().into()))
                .await
                .map_err(|e| SourceError::Transport(e.to_string()))?;
        }

        info!(
            programs = self.filter.programs.len(),
            transactions = self.filter.transactions,
            resume_slot = self.resume_slot,
            "WS subscriptions sent"
        );
        Ok(())
    }

    fn handle_text(&mut self, text: &str) -> Option<Result<RawUpdate, SourceError>> {
        let update = match parse_notification(text, &mut self.local_write_seq) {
            None => return None,
            Some(Err(e)) => return Some(Err(e)),
            Some(Ok(update)) => update,
        };

        // Cheap replay pre-filter; the exact (slot, write_version) check
        // belongs to the downstream gate.
        if update.slot() < self.resume_slot {
            return None;
        }

        match &update {
            RawUpdate::Transaction(tx) => {
                if !self.remember_signature(&tx.signature) {
                    return None;
                }
            }
            RawUpdate::Account(account) => {
                if !self.remember_account(account) {
                    return None;
                }
            }
        }

        Some(Ok(update))
    }

    /// Returns `false` when the signature was already seen in the window.
    fn remember_signature(&mut self, signature: &str) -> bool {
        if self.seen_signatures.contains(signature) {
            return false;
        }
        self.seen_signatures.insert(signature.to_string());
        self.seen_queue.push_back(signature.to_string());
        if self.seen_queue.len() > SEEN_SIGNATURES_WINDOW {
            if let Some(old) = self.seen_queue.pop_front() {
                self.seen_signatures.remove(&old);
            }
        }
        true
    }

    /// Returns `false` when an identical account write (same account, slot
    /// and content) was already seen in the window. The digest skips the
    /// write version: a replayed frame gets a fresh fallback sequence, so
    /// the write version cannot identify the replay.
    fn remember_account(&mut self, update: &RawAccountUpdate) -> bool {
        let mut hasher = DefaultHasher::new();
        update.account.hash(&mut hasher);
        update.slot.hash(&mut hasher);
        update.lamports.hash(&mut hasher);
        update.data.hash(&mut hasher);
        let digest = hasher.finish();

        if self.seen_accounts.contains(&digest) {
            return false;
        }
        self.seen_accounts.insert(digest);
        self.seen_accounts_queue.push_back(digest);
        if self.seen_accounts_queue.len() > SEEN_ACCOUNTS_WINDOW {
            if let Some(old) = self.seen_accounts_queue.pop_front() {
                self.seen_accounts.remove(&old);
            }
        }
        true
    }
}

// ─── Notification parsing ─────────────────────────────────────────────────────

/// Parse one WS text frame.
///
/// Returns `None` for subscription acks and anything that is not a
/// notification; `Some(Err)` when a notification payload is malformed.
fn parse_notification(
    text: &str,
    local_write_seq: &mut u64,
) -> Option<Result<RawUpdate, SourceError>> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Some(Err(SourceError::Malformed(e.to_string()))),
    };

    match value.get("method").and_then(Value::as_str) {
        Some("programNotification") => Some(parse_program_notification(&value, local_write_seq)),
        Some("transactionNotification") => Some(parse_transaction_notification(&value)),
        // Subscription acks ({"id":n,"result":...}) and unknown methods.
        _ => None,
    }
}

fn parse_program_notification(
    value: &Value,
    local_write_seq: &mut u64,
) -> Result<RawUpdate, SourceError> {
    let result = value
        .pointer("/params/result")
        .ok_or_else(|| SourceError::Malformed("programNotification without result".into()))?;

    let slot = result
        .pointer("/context/slot")
        .and_then(Value::as_u64)
        .ok_or_else(|| SourceError::Malformed("programNotification without context.slot".into()))?;

    let account_value = result
        .pointer("/value")
        .ok_or_else(|| SourceError::Malformed("programNotification without value".into()))?;
    let pubkey = account_value
        .get("pubkey")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Malformed("account update without pubkey".into()))?;
    let account = account_value
        .get("account")
        .ok_or_else(|| SourceError::Malformed("account update without account".into()))?;

    let owner = account
        .get("owner")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Malformed("account update without owner".into()))?;
    let lamports = account
        .get("lamports")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let data = decode_account_data(account.get("data"))?;

    // Geyser-enhanced endpoints carry a real writeVersion; plain RPC nodes
    // do not, so fall back to a session-local sequence.
    let write_version = match account.get("writeVersion").and_then(Value::as_u64) {
        Some(wv) => wv,
        None => {
            *local_write_seq += 1;
            *local_write_seq
        }
    };

    Ok(RawUpdate::Account(RawAccountUpdate {
        owner_program: owner.to_string(),
        account: pubkey.to_string(),
        slot,
        write_version,
        lamports,
        data,
        is_startup: false,
    }))
}

fn parse_transaction_notification(value: &Value) -> Result<RawUpdate, SourceError> {
    let result = value
        .pointer("/params/result")
        .ok_or_else(|| SourceError::Malformed("transactionNotification without result".into()))?;

    let signature = result
        .get("signature")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Malformed("transaction without signature".into()))?;
    let slot = result
        .get("slot")
        .and_then(Value::as_u64)
        .ok_or_else(|| SourceError::Malformed("transaction without slot".into()))?;

    let meta = result.pointer("/transaction/meta");
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
        .pointer("/transaction/transaction/message/instructions")
        .and_then(Value::as_array)
        .map(|list| parse_instructions(list))
        .unwrap_or_default();

    Ok(RawUpdate::Transaction(RawTransactionUpdate {
        signature: signature.to_string(),
        slot,
        instructions,
        logs,
        success,
    }))
}

/// Parse jsonParsed-encoding instructions; entries without a program id or
/// with undecodable data are skipped rather than failing the transaction.
pub(crate) fn parse_instructions(list: &[Value]) -> Vec<RawInstruction> {
    list.iter()
        .filter_map(|ix| {
            let program = ix.get("programId").and_then(Value::as_str)?;
            let accounts = ix
                .get("accounts")
                .and_then(Value::as_array)
                .map(|accs| {
                    accs.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            let data = match ix.get("data").and_then(Value::as_str) {
                Some(encoded) => bs58::decode(encoded).into_vec().ok()?,
                None => Vec::new(),
            };
            Some(RawInstruction {
                program: program.to_string(),
                accounts,
                data,
            })
        })
        .collect()
}

/// Decode the `["<base64>", "base64"]` account-data tuple.
pub(crate) fn decode_account_data(data: Option<&Value>) -> Result<Vec<u8>, SourceError> {
    let tuple = data
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Malformed("account data is not an array".into()))?;
    let encoded = tuple
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Malformed("account data tuple is empty".into()))?;
    match tuple.get(1).and_then(Value::as_str) {
        Some("base64") | None => {}
        Some(other) => {
            return Err(SourceError::Malformed(format!(
                "unsupported account encoding `{other}`"
            )))
        }
    }
    BASE64
        .decode(encoded)
        .map_err(|e| SourceError::Malformed(format!("bad base64 account data: {e}")))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_ack_is_ignored() {
        let mut seq = 0;
        assert!(parse_notification(r#"{"jsonrpc":"2.0","id":1,"result":42}"#, &mut seq).is_none());
        assert_eq!(seq, 0);
    }

    #[test]
    fn program_notification_parses() {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "programNotification",
            "params": {
                "subscription": 7,
                "result": {
                    "context": { "slot": 12345 },
                    "value": {
                        "pubkey": "Pool1111111111111111111111111111111111111111",
                        "account": {
                            "lamports": 2_039_280u64,
                            "owner": "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
                            "data": [BASE64.encode([1u8, 2, 3, 4]), "base64"],
                            "writeVersion": 99
                        }
                    }
                }
            }
        });
        let mut seq = 0;
        let update = parse_notification(&msg.to_string(), &mut seq)
            .unwrap()
            .unwrap();
        match update {
            RawUpdate::Account(acc) => {
                assert_eq!(acc.slot, 12345);
                assert_eq!(acc.write_version, 99);
                assert_eq!(acc.data, vec![1, 2, 3, 4]);
                assert_eq!(acc.owner_program, "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");
                assert!(!acc.is_startup);
            }
            other => panic!("expected account update, got {other:?}"),
        }
        // Provided writeVersion must not consume the local sequence.
        assert_eq!(seq, 0);
    }

    #[test]
    fn missing_write_version_uses_local_sequence() {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "programNotification",
            "params": { "result": {
                "context": { "slot": 10 },
                "value": {
                    "pubkey": "P1",
                    "account": { "owner": "Prog", "lamports": 1, "data": ["", "base64"] }
                }
            }}
        })
        .to_string();
        let mut seq = 0;
        let first = parse_notification(&msg, &mut seq).unwrap().unwrap();
        let second = parse_notification(&msg, &mut seq).unwrap().unwrap();
        match (first, second) {
            (RawUpdate::Account(a), RawUpdate::Account(b)) => {
                assert_eq!(a.write_version, 1);
                assert_eq!(b.write_version, 2);
            }
            _ => panic!("expected account updates"),
        }
    }

    #[test]
    fn transaction_notification_parses() {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "transactionNotification",
            "params": { "result": {
                "signature": "Sig1111",
                "slot": 777,
                "transaction": {
                    "meta": { "err": null, "logMessages": ["Program log: ray_log"] },
                    "transaction": { "message": { "instructions": [
                        {
                            "programId": "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
                            "accounts": ["TokenProg", "Amm1111"],
                            "data": bs58::encode([9u8, 0, 0, 0]).into_string()
                        }
                    ]}}
                }
            }}
        });
        let mut seq = 0;
        let update = parse_notification(&msg.to_string(), &mut seq)
            .unwrap()
            .unwrap();
        match update {
            RawUpdate::Transaction(tx) => {
                assert_eq!(tx.signature, "Sig1111");
                assert_eq!(tx.slot, 777);
                assert!(tx.success);
                assert_eq!(tx.instructions.len(), 1);
                assert_eq!(tx.instructions[0].data, vec![9, 0, 0, 0]);
                assert_eq!(tx.instructions[0].accounts[1], "Amm1111");
                assert_eq!(tx.logs.len(), 1);
            }
            other => panic!("expected transaction update, got {other:?}"),
        }
    }

    #[test]
    fn malformed_notification_is_an_error_not_a_panic() {
        let mut seq = 0;
        let err = parse_notification(
            r#"{"method":"programNotification","params":{"result":{}}}"#,
            &mut seq,
        )
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn bad_account_encoding_rejected() {
        let data = serde_json::json!(["deadbeef", "base58"]);
        assert!(decode_account_data(Some(&data)).is_err());

        let good = serde_json::json!([BASE64.encode([7u8]), "base64"]);
        assert_eq!(decode_account_data(Some(&good)).unwrap(), vec![7]);
    }

    fn test_session() -> WsSession {
        WsSession {
            url: "wss://example.org".into(),
            filter: SourceFilter::program("Prog"),
            resume_slot: 0,
            backoff: ReconnectPolicy::default(),
            seen_signatures: HashSet::new(),
            seen_queue: VecDeque::new(),
            seen_accounts: HashSet::new(),
            seen_accounts_queue: VecDeque::new(),
            local_write_seq: 0,
        }
    }

    fn account_frame(slot: u64, data: &[u8]) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "programNotification",
            "params": { "result": {
                "context": { "slot": slot },
                "value": {
                    "pubkey": "P1",
                    "account": {
                        "owner": "Prog",
                        "lamports": 1,
                        "data": [BASE64.encode(data), "base64"]
                    }
                }
            }}
        })
        .to_string()
    }

    #[test]
    fn replayed_account_frame_is_dropped() {
        let mut session = test_session();
        let msg = account_frame(10, &[1, 2, 3]);

        assert!(matches!(
            session.handle_text(&msg),
            Some(Ok(RawUpdate::Account(_)))
        ));
        // The same frame again, as a reconnect replays it: without a real
        // writeVersion it would get a fresh fallback sequence and a fresh
        // idempotency key, so it has to be dropped here.
        assert!(session.handle_text(&msg).is_none());

        // A different write in the same slot still passes.
        assert!(matches!(
            session.handle_text(&account_frame(10, &[9, 9])),
            Some(Ok(RawUpdate::Account(_)))
        ));
    }

    #[tokio::test]
    async fn invalid_url_is_fatal_at_open() {
        let source = WsStreamSource::new("http://not-a-ws-endpoint");
        let filter = SourceFilter::program("Prog");
        let err = source
            .open(&filter, None)
            .await
            .err()
            .expect("open should refuse a non-ws endpoint");
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn empty_filter_is_fatal_at_open() {
        let source = WsStreamSource::new("wss://example.org");
        let err = source
            .open(&SourceFilter::default(), None)
            .await
            .err()
            .expect("open should refuse an empty filter");
        assert!(err.is_fatal());
    }
}
