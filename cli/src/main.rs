//! dexstream CLI — run the DEX ingestion pipeline.
//!
//! Usage:
//! ```bash
//! # Stream live updates over a WebSocket subscription
//! dexstream stream --url wss://api.mainnet-beta.solana.com
//!
//! # Poll a JSON-RPC endpoint on an interval
//! dexstream poll --url https://api.mainnet-beta.solana.com
//!
//! # Show configuration defaults
//! dexstream info
//! ```
//!
//! All tuning comes from the environment (a `.env` file is honored):
//! `PROGRAM_IDS`, `PIPELINE_ID`, `LANES`, `BATCH_MAX_EVENTS`,
//! `BATCH_MAX_WAIT_MS`, `SINK_MAX_RETRIES`, `CACHE_TTL_SECS`,
//! `POLL_INTERVAL_MS`, `COMMITMENT`, `INGEST_TRANSACTIONS`, plus
//! `WS_URL` / `RPC_URL` for endpoints and `CLICKHOUSE_URL` / `REDIS_URL`
//! for the sink backends.

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dexstream_core::{CheckpointManager, CheckpointStore, MemoryCheckpointStore, PipelineConfig};
use dexstream_engine::PipelineEngine;
use dexstream_sink::{
    ClickhouseEventStore, CommitRetryPolicy, EventStore, MemoryEventStore, RedisStateCache,
    SinkWriter,
};
use dexstream_source::{RpcPollSource, UpdateSource, WsStreamSource};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "stream" => cmd_stream(&args[2..]).await,
        "poll" => cmd_poll(&args[2..]).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("dexstream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_usage() {
    println!("dexstream {}", env!("CARGO_PKG_VERSION"));
    println!("Solana DEX ingestion pipeline: decode, order, and sink on-chain activity\n");
    println!("USAGE:");
    println!("    dexstream <COMMAND>\n");
    println!("COMMANDS:");
    println!("    stream   Ingest via WebSocket push subscriptions");
    println!("    poll     Ingest by polling a JSON-RPC endpoint");
    println!("    info     Show configuration defaults");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("FLAGS:");
    println!("    --url <URL>   Endpoint (falls back to WS_URL / RPC_URL)");
}

fn cmd_info() {
    let defaults = PipelineConfig::default();
    println!("dexstream v{}", env!("CARGO_PKG_VERSION"));
    println!("  Dispatch lanes:       {}", defaults.lanes);
    println!("  Queue capacity:       {}", defaults.queue_capacity);
    println!(
        "  Batch flush:          {} events / {}ms",
        defaults.batch_max_events, defaults.batch_max_wait_ms
    );
    println!("  Sink retry ceiling:   {}", defaults.sink_max_retries);
    println!("  Poll interval:        {}ms", defaults.poll_interval_ms);
    println!("  Event store:          ClickHouse (memory without CLICKHOUSE_URL)");
    println!("  Cache / checkpoints:  Redis (memory without REDIS_URL)");
    println!("  Protocols:            raydium-amm-v4, pump-fun");
}

async fn cmd_stream(args: &[String]) -> anyhow::Result<()> {
    let config = load_config()?;
    let url = endpoint(args, "WS_URL")
        .context("WebSocket endpoint required: pass --url or set WS_URL")?;
    let source = WsStreamSource::new(url).with_channel_capacity(config.queue_capacity);
    run_pipeline(config, Arc::new(source)).await
}

async fn cmd_poll(args: &[String]) -> anyhow::Result<()> {
    let config = load_config()?;
    let url = endpoint(args, "RPC_URL")
        .context("JSON-RPC endpoint required: pass --url or set RPC_URL")?;
    let source = RpcPollSource::new(url, Duration::from_millis(config.poll_interval_ms))
        .with_channel_capacity(config.queue_capacity);
    run_pipeline(config, Arc::new(source)).await
}

fn load_config() -> anyhow::Result<PipelineConfig> {
    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}

fn endpoint(args: &[String], var: &str) -> Option<String> {
    parse_flag(args, "--url").or_else(|| env::var(var).ok())
}

async fn run_pipeline(
    config: PipelineConfig,
    source: Arc<dyn UpdateSource>,
) -> anyhow::Result<()> {
    let writer = build_writer(&config).await?;
    let registry = Arc::new(dexstream_decoders::default_registry());
    let engine = PipelineEngine::new(config, source, registry);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, draining pipeline");
            let _ = shutdown_tx.send(true);
        }
    });

    engine.run(writer, shutdown_rx).await?;
    Ok(())
}

/// Assemble the sink from the environment: ClickHouse and Redis when
/// configured, in-memory stand-ins (with a warning) when not.
async fn build_writer(config: &PipelineConfig) -> anyhow::Result<SinkWriter> {
    let store: Arc<dyn EventStore> = if env::var("CLICKHOUSE_URL").is_ok() {
        let store = ClickhouseEventStore::from_env().context("clickhouse configuration")?;
        store
            .init_schema()
            .await
            .context("clickhouse schema init")?;
        Arc::new(store)
    } else {
        warn!("CLICKHOUSE_URL not set; events will not survive a restart");
        Arc::new(MemoryEventStore::new())
    };

    let retry = CommitRetryPolicy::with_max_retries(config.sink_max_retries);

    match env::var("REDIS_URL") {
        Ok(url) => {
            let cache = Arc::new(
                RedisStateCache::connect(&url)
                    .await
                    .context("redis connection")?,
            );
            let checkpoints: Box<dyn CheckpointStore> = Box::new(cache.checkpoint_store());
            let manager = CheckpointManager::new(checkpoints, config.pipeline_id.clone());
            Ok(SinkWriter::new(store, manager)
                .with_retry(retry)
                .with_cache(cache.clone(), config.cache_ttl_secs)
                .with_publisher(cache))
        }
        Err(_) => {
            warn!("REDIS_URL not set; cache and checkpoint are in-memory only");
            let manager = CheckpointManager::new(
                Box::new(MemoryCheckpointStore::new()),
                config.pipeline_id.clone(),
            );
            Ok(SinkWriter::new(store, manager).with_retry(retry))
        }
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
