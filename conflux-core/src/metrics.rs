//! Prometheus metrics for the consumer, exposed as an OpenMetrics text
//! endpoint. Everything hangs off one global registry built on first use.

use std::net::SocketAddr;
use std::sync::{Mutex, OnceLock};

use axum::Router;
use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::{debug, error};

use crate::Error;

const REGISTRY_PREFIX: &str = "conflux";
const KIND_LABEL: &str = "kind";

pub(crate) struct ConsumerMetrics {
    /// Records read from the log, by kind.
    pub(crate) records_read: Family<Vec<(String, String)>, Counter>,
    /// Transactions written to the sink.
    pub(crate) txns_flushed: Counter,
    /// Resolved timestamps forwarded to the sink.
    pub(crate) resolved_ts_emitted: Counter,
    /// Offset commits issued to the log session.
    pub(crate) offsets_committed: Counter,
    /// Current global safe watermark.
    pub(crate) safe_watermark: Gauge,
}

struct GlobalRegistry {
    registry: Mutex<Registry>,
    metrics: ConsumerMetrics,
}

fn global_registry() -> &'static GlobalRegistry {
    static REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = Registry::with_prefix(REGISTRY_PREFIX);
        let metrics = ConsumerMetrics {
            records_read: Family::default(),
            txns_flushed: Counter::default(),
            resolved_ts_emitted: Counter::default(),
            offsets_committed: Counter::default(),
            safe_watermark: Gauge::default(),
        };
        registry.register(
            "records_read",
            "Records read from the log, by kind",
            metrics.records_read.clone(),
        );
        registry.register(
            "txns_flushed",
            "Transactions written to the sink",
            metrics.txns_flushed.clone(),
        );
        registry.register(
            "resolved_ts_emitted",
            "Resolved timestamps forwarded to the sink",
            metrics.resolved_ts_emitted.clone(),
        );
        registry.register(
            "offsets_committed",
            "Offset commits issued to the log session",
            metrics.offsets_committed.clone(),
        );
        registry.register(
            "safe_watermark",
            "Current global safe watermark",
            metrics.safe_watermark.clone(),
        );
        GlobalRegistry {
            registry: Mutex::new(registry),
            metrics,
        }
    })
}

pub(crate) fn consumer_metrics() -> &'static ConsumerMetrics {
    &global_registry().metrics
}

pub(crate) fn kind_label(kind: &str) -> Vec<(String, String)> {
    vec![(KIND_LABEL.to_string(), kind.to_string())]
}

// Snapshot of the global registry in OpenMetrics text form.
async fn metrics_handler() -> impl IntoResponse {
    let state = global_registry()
        .registry
        .lock()
        .expect("failed to acquire lock");
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &state) {
        error!(?e, "Encoding metrics");
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::empty())
            .expect("response builder with empty body");
    }
    debug!("Exposing metrics: {:?}", buffer);
    Response::builder()
        .status(StatusCode::OK)
        .header(
            axum::http::header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )
        .body(Body::from(buffer))
        .expect("response builder with metrics body")
}

async fn livez() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// Serves `/metrics` and `/livez` until the process exits.
pub async fn start_metrics_server(addr: SocketAddr) -> crate::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/livez", get(livez));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Metrics(format!("Binding metrics listener on {addr}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Metrics(format!("Starting web server for metrics: {e}")))
}
