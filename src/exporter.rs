//! Prometheus Exporter
//!
//! Mirrors [`CacheStats`] into Prometheus gauges and serves them over HTTP
//! together with liveness and readiness probes.
//!
//! Endpoints:
//! - `/metrics` - text exposition format, refreshed from the cache on every scrape
//! - `/healthz`, `/livez` - always `ok`
//! - `/readyz` - `ok` while at least one tier is enabled, 503 otherwise

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::{Cache, CacheStats};
use crate::error::{Error, Result};

const NAMESPACE: &str = "sitelens_cache";

fn metric_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

/// Prometheus view of one cache
pub struct CacheExporter {
    registry: Registry,

    hits: IntGauge,
    misses: IntGauge,
    hit_rate: Gauge,
    entries: IntGauge,
    memory_bytes: IntGauge,
    evictions: IntGauge,
    expirations: IntGauge,
    promotions: IntGauge,
    corrupt_purges: IntGauge,
    refreshes_started: IntGauge,
    refreshes_failed: IntGauge,
    fetch_errors: IntGauge,
    bytes_saved: IntGauge,
    read_latency_us: IntGauge,

    tier_entries: IntGaugeVec,
    tier_bytes: IntGaugeVec,
    tier_hits: IntGaugeVec,
    tier_write_failures: IntGaugeVec,
}

impl CacheExporter {
    /// Create an exporter with its own registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let int_gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))
                .map_err(metric_error)?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(metric_error)?;
            Ok(gauge)
        };
        let tier_gauge = |name: &str, help: &str| -> Result<IntGaugeVec> {
            let gauge = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["tier"])
                .map_err(metric_error)?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(metric_error)?;
            Ok(gauge)
        };

        let hit_rate = Gauge::with_opts(
            Opts::new("hit_rate", "Hits divided by total requests").namespace(NAMESPACE),
        )
        .map_err(metric_error)?;
        registry
            .register(Box::new(hit_rate.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            hits: int_gauge("hits", "Reads served from any tier")?,
            misses: int_gauge("misses", "Reads no tier could serve")?,
            hit_rate,
            entries: int_gauge("entries", "Entries in the fastest enabled tier")?,
            memory_bytes: int_gauge("memory_bytes", "Payload bytes in the fastest enabled tier")?,
            evictions: int_gauge("evictions", "Entries evicted under capacity pressure")?,
            expirations: int_gauge("expirations", "Entries removed after expiry")?,
            promotions: int_gauge("promotions", "Entries copied into a faster tier")?,
            corrupt_purges: int_gauge("corrupt_purges", "Undecodable entries purged on read")?,
            refreshes_started: int_gauge("refreshes_started", "Refresh fetches started")?,
            refreshes_failed: int_gauge("refreshes_failed", "Refresh fetches that failed")?,
            fetch_errors: int_gauge("fetch_errors", "Failed fetch or fallback calls")?,
            bytes_saved: int_gauge("compression_bytes_saved", "Bytes saved by compression")?,
            read_latency_us: int_gauge("read_latency_us", "Average read latency (EMA)")?,
            tier_entries: tier_gauge("tier_entries", "Entries per tier")?,
            tier_bytes: tier_gauge("tier_bytes", "Payload bytes per tier")?,
            tier_hits: tier_gauge("tier_hits", "Reads served per tier")?,
            tier_write_failures: tier_gauge("tier_write_failures", "Failed writes per tier")?,
            registry,
        })
    }

    /// Copy a stats snapshot into the gauges
    pub fn update(&self, stats: &CacheStats) {
        self.hits.set(stats.hits as i64);
        self.misses.set(stats.misses as i64);
        self.hit_rate.set(stats.hit_rate);
        self.entries.set(stats.entry_count as i64);
        self.memory_bytes.set(stats.memory_usage_bytes as i64);
        self.evictions.set(stats.evictions as i64);
        self.expirations.set(stats.expirations as i64);
        self.promotions.set(stats.promotions as i64);
        self.corrupt_purges.set(stats.corrupt_purges as i64);
        self.refreshes_started.set(stats.refreshes_started as i64);
        self.refreshes_failed.set(stats.refreshes_failed as i64);
        self.fetch_errors.set(stats.fetch_errors as i64);
        self.bytes_saved.set(stats.bytes_saved as i64);
        self.read_latency_us.set(stats.avg_read_latency_us as i64);

        for tier in &stats.tiers {
            let label = [tier.kind.name()];
            self.tier_entries.with_label_values(&label).set(tier.entries as i64);
            self.tier_bytes.with_label_values(&label).set(tier.size_bytes as i64);
            self.tier_hits.with_label_values(&label).set(tier.hits as i64);
            self.tier_write_failures
                .with_label_values(&label)
                .set(tier.write_failures as i64);
        }
    }

    /// Encode every registered metric in the text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle(
    req: Request<Incoming>,
    cache: Cache,
    exporter: Arc<CacheExporter>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => {
            exporter.update(&cache.stats());
            match exporter.render() {
                Ok(body) => {
                    let mut response = text_response(StatusCode::OK, body);
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
                    response
                }
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
                }
            }
        }
        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
        "/readyz" => {
            if cache.stats().tiers.iter().any(|t| t.enabled) {
                text_response(StatusCode::OK, "ok")
            } else {
                text_response(StatusCode::SERVICE_UNAVAILABLE, "no cache tier enabled")
            }
        }
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

/// Serve metrics and probes on `addr` until `shutdown` is cancelled
pub async fn serve(
    addr: SocketAddr,
    cache: Cache,
    exporter: Arc<CacheExporter>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?,
        };

        let io = TokioIo::new(stream);
        let cache = cache.clone();
        let exporter = Arc::clone(&exporter);

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, cache.clone(), Arc::clone(&exporter)));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    #[tokio::test]
    async fn test_render_reflects_stats() {
        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        cache.set("k", "v").await.unwrap();
        let _: Option<String> = cache.get("k").await;
        let _: Option<String> = cache.get("missing").await;

        let exporter = CacheExporter::new().unwrap();
        exporter.update(&cache.stats());
        let text = exporter.render().unwrap();

        assert!(text.contains("sitelens_cache_hits 1"));
        assert!(text.contains("sitelens_cache_misses 1"));
        assert!(text.contains("sitelens_cache_hit_rate 0.5"));
        assert!(text.contains(r#"sitelens_cache_tier_entries{tier="memory"} 1"#));
    }

    #[test]
    fn test_exporters_are_independent() {
        // Each exporter owns its registry, so names never collide
        let a = CacheExporter::new().unwrap();
        let b = CacheExporter::new().unwrap();
        a.hits.set(5);
        assert!(b.render().unwrap().contains("sitelens_cache_hits 0"));
    }

    #[tokio::test]
    async fn test_serve_probes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let cache = Cache::open(CacheConfig::default()).await.unwrap();
        let exporter = Arc::new(CacheExporter::new().unwrap());
        let shutdown = CancellationToken::new();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = tokio::spawn(serve(addr, cache, exporter, shutdown.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /readyz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
