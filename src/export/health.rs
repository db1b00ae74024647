use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::core::Collector;
use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Prometheus registry plus the agent's own operational metrics.
///
/// Probe statistics are rendered by a [`super::SnapshotExporter`]
/// registered into the same registry via [`HealthMetrics::register`].
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Lifecycle events received by kind (add/update/delete).
    pub events_received: CounterVec,
    /// Lifecycle events discarded by reason (stale/no_address).
    pub events_discarded: CounterVec,
    /// Probe target operations by operation (add/remove) and result.
    pub target_operations: CounterVec,
    /// Number of sibling peers currently tracked.
    pub peers_tracked: Gauge,
    /// Number of probe targets currently submitted to the engine.
    pub targets_active: Gauge,
    /// Whether the event source finished its initial sync (1=yes, 0=no).
    pub synced: Gauge,
    /// Time spent pulling and rendering one probe snapshot.
    pub render_duration: Histogram,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let events_received = CounterVec::new(
            Opts::new(
                "events_received_total",
                "Total peer lifecycle events received by kind.",
            )
            .namespace("peerping"),
            &["kind"],
        )?;
        let events_discarded = CounterVec::new(
            Opts::new(
                "events_discarded_total",
                "Total peer lifecycle events discarded by reason.",
            )
            .namespace("peerping"),
            &["reason"],
        )?;
        let target_operations = CounterVec::new(
            Opts::new(
                "target_operations_total",
                "Total probe target operations by operation and result.",
            )
            .namespace("peerping"),
            &["operation", "result"],
        )?;
        let peers_tracked = Gauge::with_opts(
            Opts::new("peers_tracked", "Number of sibling peers currently tracked.")
                .namespace("peerping"),
        )?;
        let targets_active = Gauge::with_opts(
            Opts::new(
                "targets_active",
                "Number of probe targets submitted to the probing engine.",
            )
            .namespace("peerping"),
        )?;
        let synced = Gauge::with_opts(
            Opts::new(
                "event_source_synced",
                "Whether the event source completed its initial sync (1=yes, 0=no).",
            )
            .namespace("peerping"),
        )?;
        let render_duration = Histogram::with_opts(
            HistogramOpts::new(
                "render_duration_seconds",
                "Time to pull and render one probe statistics snapshot.",
            )
            .namespace("peerping")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;

        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(events_discarded.clone()))?;
        registry.register(Box::new(target_operations.clone()))?;
        registry.register(Box::new(peers_tracked.clone()))?;
        registry.register(Box::new(targets_active.clone()))?;
        registry.register(Box::new(synced.clone()))?;
        registry.register(Box::new(render_duration.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            events_received,
            events_discarded,
            target_operations,
            peers_tracked,
            targets_active,
            synced,
            render_duration,
        })
    }

    /// Register an additional collector, e.g. the probe snapshot exporter.
    pub fn register(&self, collector: Box<dyn Collector>) -> Result<()> {
        self.registry
            .register(collector)
            .context("registering collector")
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        encode_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when binding port 0.
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            ":8080"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "metrics server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("encoding metrics")?;

    String::from_utf8(buffer).context("converting metrics to string")
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Rendering takes the exporter lock; keep it off the async workers.
    let registry = state.registry.clone();
    match tokio::task::spawn_blocking(move || encode_registry(&registry)).await {
        Ok(Ok(text)) => (StatusCode::OK, text),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "metrics task panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, "task failed".to_string())
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
