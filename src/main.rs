//! SiteLens Cache Daemon
//!
//! Runs a tiered cache with its cleanup sweeper and metrics server, driven by
//! line commands on stdin. Every command prints one JSON document.
//!
//! ```text
//! set <key> <json> [ttl_ms] [tag,tag...]
//! get <key>
//! del <key>
//! invalidate <tag,tag...>
//! clear
//! stats
//! quit
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sitelens::exporter;
use sitelens::{Cache, CacheConfig, CacheExporter, CacheStrategy};

// =============================================================================
// CLI Arguments
// =============================================================================

/// SiteLens - tiered cache for website and analysis data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache configuration file (.yaml, .yml or .json)
    #[arg(long, env = "SITELENS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable the persistent tiers under this directory
    #[arg(long, env = "SITELENS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Cleanup sweep interval in milliseconds
    #[arg(long, env = "SITELENS_CLEANUP_INTERVAL_MS")]
    cleanup_interval_ms: Option<u64>,

    /// Metrics and health server bind address (disabled if unset)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    info!("Starting SiteLens cache {}", sitelens::version());
    info!("  Memory tier: {} bytes", config.memory.max_size_bytes);
    info!("  Fast tier enabled: {}", config.fast.enabled);
    info!("  Durable tier enabled: {}", config.durable.enabled);
    info!("  Eviction policy: {}", config.eviction_policy);
    info!("  Cleanup interval: {} ms", config.cleanup_interval_ms);

    let cache = Cache::open(config).await.context("failed to open cache")?;
    let sweeper = cache.start_sweeper();
    let shutdown = CancellationToken::new();

    let server = match args.metrics_addr {
        Some(addr) => {
            let exporter = Arc::new(CacheExporter::new()?);
            let cache = cache.clone();
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = exporter::serve(addr, cache, exporter, shutdown).await {
                    error!("Metrics server error: {}", e);
                }
            }))
        }
        None => None,
    };

    run_commands(&cache).await?;

    info!("Input closed, shutting down");
    sweeper.shutdown().await;
    shutdown.cancel();
    if let Some(server) = server {
        let _ = server.await;
    }
    cache.flush().await;

    info!("Shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<CacheConfig> {
    let mut config = match args.config {
        Some(ref path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(ref dir) = args.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(interval) = args.cleanup_interval_ms {
        config.cleanup_interval_ms = interval;
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    // Logs go to stderr, command results to stdout
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Command Loop
// =============================================================================

async fn run_commands(cache: &Cache) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        let output = match execute(cache, line).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Command failed: {:#}", e);
                json!({ "error": format!("{:#}", e) })
            }
        };
        println!("{}", output);
    }
    Ok(())
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

async fn execute(cache: &Cache, line: &str) -> anyhow::Result<Value> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "set" => {
            let (key, rest) = rest.split_once(' ').context("usage: set <key> <json> [ttl_ms] [tags]")?;
            let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
            let value = stream.next().context("missing value")??;
            let mut options = rest[stream.byte_offset()..].split_whitespace();

            let mut strategy = CacheStrategy::default();
            if let Some(ttl) = options.next() {
                strategy.ttl_ms = Some(ttl.parse().context("ttl_ms must be an integer")?);
            }
            if let Some(tags) = options.next() {
                strategy = strategy.with_tags(split_tags(tags));
            }

            cache.set_with(key, &value, &strategy).await?;
            Ok(json!({ "ok": true, "key": key }))
        }
        "get" => {
            anyhow::ensure!(!rest.is_empty(), "usage: get <key>");
            let value: Option<Value> = cache.get(rest).await;
            Ok(json!({ "key": rest, "value": value }))
        }
        "del" => {
            anyhow::ensure!(!rest.is_empty(), "usage: del <key>");
            let removed = cache.remove(rest).await;
            Ok(json!({ "key": rest, "removed": removed }))
        }
        "invalidate" => {
            let tags = split_tags(rest);
            anyhow::ensure!(!tags.is_empty(), "usage: invalidate <tag,tag...>");
            let removed = cache.invalidate_by_tags(&tags).await;
            Ok(json!({ "tags": tags, "removed": removed }))
        }
        "clear" => {
            cache.clear().await;
            Ok(json!({ "ok": true }))
        }
        "stats" => Ok(serde_json::to_value(cache.stats())?),
        other => anyhow::bail!("unknown command: {}", other),
    }
}
