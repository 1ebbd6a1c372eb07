//! Metrics and tracing setup for blocksync.
//!
//! Provides a global [`NodeMetrics`] singleton backed by the `prometheus`
//! crate, plus an optional lightweight HTTP server for Prometheus scraping.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// Global metrics instance.
static METRICS: OnceLock<NodeMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static NodeMetrics {
    METRICS.get_or_init(NodeMetrics::new)
}

/// All Prometheus metrics for a blocksync node.
pub struct NodeMetrics {
    pub registry: Registry,

    // ── RPC counters ──
    pub rpcs_sent: IntCounter,
    pub rpcs_received: IntCounter,
    pub rpcs_sent_by_type: IntCounterVec,
    pub rpcs_received_by_type: IntCounterVec,

    // ── RPC latency ──
    pub rpc_latency_secs: HistogramVec,

    // ── Metadata operations ──
    pub meta_reads: IntCounter,
    pub meta_modifies: IntCounter,
    pub meta_deletes: IntCounter,
    pub write_outcomes: IntCounterVec,

    // ── Replication ──
    pub pushes_sent: IntCounter,
    pub pushes_failed: IntCounter,
    pub appends_applied: IntCounter,
    pub appends_dropped: IntCounter,

    // ── Crash recovery ──
    pub restores_nudged: IntCounter,
    pub restores_completed: IntCounter,

    // ── Block store ──
    pub blocks_stored: IntCounter,
    pub block_misses: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for NodeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for RPC latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

impl NodeMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let rpcs_sent = IntCounter::with_opts(Opts::new(
            "blocksync_rpcs_sent_total",
            "Total outbound RPCs sent",
        ))
        .expect("rpcs_sent counter");
        let rpcs_received = IntCounter::with_opts(Opts::new(
            "blocksync_rpcs_received_total",
            "Total inbound RPCs received",
        ))
        .expect("rpcs_received counter");

        let rpcs_sent_by_type = IntCounterVec::new(
            Opts::new(
                "blocksync_rpcs_sent_by_type_total",
                "Outbound RPCs sent, by type",
            ),
            &["rpc_type"],
        )
        .expect("rpcs_sent_by_type counter vec");
        let rpcs_received_by_type = IntCounterVec::new(
            Opts::new(
                "blocksync_rpcs_received_by_type_total",
                "Inbound RPCs received, by type",
            ),
            &["rpc_type"],
        )
        .expect("rpcs_received_by_type counter vec");

        let rpc_latency_secs = HistogramVec::new(
            HistogramOpts::new("blocksync_rpc_latency_seconds", "RPC latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["rpc_type", "direction"],
        )
        .expect("rpc_latency_secs histogram");

        let meta_reads = IntCounter::with_opts(Opts::new(
            "blocksync_meta_reads_total",
            "ReadFile operations served",
        ))
        .expect("meta_reads counter");
        let meta_modifies = IntCounter::with_opts(Opts::new(
            "blocksync_meta_modifies_total",
            "ModifyFile operations served",
        ))
        .expect("meta_modifies counter");
        let meta_deletes = IntCounter::with_opts(Opts::new(
            "blocksync_meta_deletes_total",
            "DeleteFile operations served",
        ))
        .expect("meta_deletes counter");

        let write_outcomes = IntCounterVec::new(
            Opts::new(
                "blocksync_write_outcomes_total",
                "Write decisions, by outcome",
            ),
            &["outcome"],
        )
        .expect("write_outcomes counter vec");

        let pushes_sent = IntCounter::with_opts(Opts::new(
            "blocksync_pushes_sent_total",
            "Replication pushes attempted",
        ))
        .expect("pushes_sent counter");
        let pushes_failed = IntCounter::with_opts(Opts::new(
            "blocksync_pushes_failed_total",
            "Replication pushes that failed or timed out",
        ))
        .expect("pushes_failed counter");

        let appends_applied = IntCounter::with_opts(Opts::new(
            "blocksync_appends_applied_total",
            "Replication appends applied",
        ))
        .expect("appends_applied counter");
        let appends_dropped = IntCounter::with_opts(Opts::new(
            "blocksync_appends_dropped_total",
            "Replication appends dropped while crashed",
        ))
        .expect("appends_dropped counter");

        let restores_nudged = IntCounter::with_opts(Opts::new(
            "blocksync_restores_nudged_total",
            "Restore nudges sent to followers",
        ))
        .expect("restores_nudged counter");
        let restores_completed = IntCounter::with_opts(Opts::new(
            "blocksync_restores_completed_total",
            "Catch-up passes completed after a crash",
        ))
        .expect("restores_completed counter");

        let blocks_stored = IntCounter::with_opts(Opts::new(
            "blocksync_blocks_stored_total",
            "Blocks written to the block store",
        ))
        .expect("blocks_stored counter");
        let block_misses = IntCounter::with_opts(Opts::new(
            "blocksync_block_misses_total",
            "Block lookups that missed",
        ))
        .expect("block_misses counter");

        // Register all metrics
        for c in [
            &rpcs_sent,
            &rpcs_received,
            &meta_reads,
            &meta_modifies,
            &meta_deletes,
            &pushes_sent,
            &pushes_failed,
            &appends_applied,
            &appends_dropped,
            &restores_nudged,
            &restores_completed,
            &blocks_stored,
            &block_misses,
        ] {
            registry
                .register(Box::new((*c).clone()))
                .expect("register counter");
        }
        registry
            .register(Box::new(rpcs_sent_by_type.clone()))
            .expect("register rpcs_sent_by_type");
        registry
            .register(Box::new(rpcs_received_by_type.clone()))
            .expect("register rpcs_received_by_type");
        registry
            .register(Box::new(write_outcomes.clone()))
            .expect("register write_outcomes");
        registry
            .register(Box::new(rpc_latency_secs.clone()))
            .expect("register rpc_latency_secs");

        Self {
            registry,
            rpcs_sent,
            rpcs_received,
            rpcs_sent_by_type,
            rpcs_received_by_type,
            rpc_latency_secs,
            meta_reads,
            meta_modifies,
            meta_deletes,
            write_outcomes,
            pushes_sent,
            pushes_failed,
            appends_applied,
            appends_dropped,
            restores_nudged,
            restores_completed,
            blocks_stored,
            block_misses,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Helper: start an RPC latency timer. Returns a guard that records
/// elapsed time on drop.
pub fn start_rpc_timer(rpc_type: &str, direction: &str) -> prometheus::HistogramTimer {
    metrics()
        .rpc_latency_secs
        .with_label_values(&[rpc_type, direction])
        .start_timer()
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response"))
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init_and_increment() {
        let m = metrics();

        let before_sent = m.rpcs_sent.get();
        m.rpcs_sent.inc();
        m.rpcs_sent.inc();
        assert_eq!(m.rpcs_sent.get(), before_sent + 2);

        let before_reads = m.meta_reads.get();
        m.meta_reads.inc();
        assert_eq!(m.meta_reads.get(), before_reads + 1);

        m.write_outcomes.with_label_values(&["ok"]).inc();
        m.write_outcomes.with_label_values(&["old_version"]).inc();
        m.rpcs_received_by_type.with_label_values(&["read_file"]).inc();
    }

    #[test]
    fn test_encode_metrics_format() {
        // Ensure at least one counter is incremented
        metrics().appends_dropped.inc();

        let output = encode_metrics();
        assert!(output.contains("blocksync_rpcs_sent_total"));
        assert!(output.contains("blocksync_appends_dropped_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_histogram_records() {
        let m = metrics();

        m.rpc_latency_secs
            .with_label_values(&["test_rpc", "outbound"])
            .observe(0.005);
        m.rpc_latency_secs
            .with_label_values(&["test_rpc", "outbound"])
            .observe(0.010);

        let h = m
            .rpc_latency_secs
            .with_label_values(&["test_rpc", "outbound"]);
        assert_eq!(h.get_sample_count(), 2);
        assert!((h.get_sample_sum() - 0.015).abs() < 1e-9);
    }
}
