//! HTTP surface for the dashboard and peer replication.
//!
//! Endpoints:
//! - `GET /metrics`: cumulative snapshots for both measured systems
//! - `GET /metrics/window?windowMs=N`: sliding-window snapshots
//! - `POST /metrics/mymq/send?n=N&key=K&keyBuckets=B`: fire N publishes
//! - `POST /metrics/reset?scope=all|latency`: reset counters and windows
//! - `POST /_replicate`: peer ingress; never re-replicates outward
//!
//! Handlers surface nothing as errors beyond HTTP status codes; every failure
//! inside the pipeline is observable through counters and logs.

use crate::broker::{Broker, Enqueue, RejectReason};
use crate::consumer::ConsumerPool;
use crate::idempotency::IdempotencyStore;
use crate::message::Message;
use crate::metrics::{MetricsDto, MetricsRecorder};
use crate::producer::MymqProducer;
use crate::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Shared handler state: the two metrics recorders under comparison plus the
/// pipeline components the endpoints drive.
#[derive(Clone)]
pub struct AppState {
    pub mymq_metrics: Arc<MetricsRecorder>,
    pub kafka_metrics: Arc<MetricsRecorder>,
    pub producer: Arc<MymqProducer>,
    pub broker: Arc<Broker>,
    pub consumers: Arc<ConsumerPool>,
    pub idempotency: Arc<IdempotencyStore>,
}

/// Snapshot pair served to the dashboard.
#[derive(Debug, Serialize)]
pub struct ComparisonSnapshot {
    pub mymq: MetricsDto,
    pub kafka: MetricsDto,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/metrics/window", get(metrics_window))
        .route("/metrics/mymq/send", post(send_mymq))
        .route("/metrics/reset", post(reset))
        .route("/_replicate", post(replicate))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("http server listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn metrics(State(state): State<AppState>) -> Json<ComparisonSnapshot> {
    Json(ComparisonSnapshot {
        mymq: state.mymq_metrics.snapshot(),
        kafka: state.kafka_metrics.snapshot(),
    })
}

#[derive(Debug, Deserialize)]
struct WindowParams {
    #[serde(rename = "windowMs", default = "default_window_ms")]
    window_ms: u64,
}

fn default_window_ms() -> u64 {
    60_000
}

async fn metrics_window(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Json<ComparisonSnapshot> {
    Json(ComparisonSnapshot {
        mymq: state.mymq_metrics.window_snapshot(params.window_ms),
        kafka: state.kafka_metrics.window_snapshot(params.window_ms),
    })
}

#[derive(Debug, Deserialize)]
struct SendParams {
    #[serde(default = "default_send_count")]
    n: usize,
    #[serde(default)]
    key: Option<String>,
    #[serde(rename = "keyBuckets", default = "default_key_buckets")]
    key_buckets: usize,
}

fn default_send_count() -> usize {
    1000
}

fn default_key_buckets() -> usize {
    16
}

#[derive(Debug, Serialize)]
struct SendResponse {
    sent: usize,
    target: &'static str,
    metrics: MetricsDto,
}

async fn send_mymq(
    State(state): State<AppState>,
    Query(params): Query<SendParams>,
) -> Json<SendResponse> {
    let buckets = params.key_buckets.max(1);
    let explicit_key = params
        .key
        .as_deref()
        .filter(|k| !k.trim().is_empty());

    for i in 0..params.n {
        let key = match explicit_key {
            Some(k) => k.to_string(),
            None => format!("key-{}", i % buckets),
        };
        state
            .producer
            .publish(Some(&key), &format!("mymq-test-{i}"))
            .await;
    }

    Json(SendResponse {
        sent: params.n,
        target: "mymq",
        metrics: state.mymq_metrics.snapshot(),
    })
}

#[derive(Debug, Deserialize)]
struct ResetParams {
    #[serde(default = "default_scope")]
    scope: String,
}

fn default_scope() -> String {
    "all".to_string()
}

#[derive(Debug, Serialize)]
struct ResetResponse {
    status: &'static str,
    scope: String,
    metrics: ComparisonSnapshot,
}

async fn reset(
    State(state): State<AppState>,
    Query(params): Query<ResetParams>,
) -> std::result::Result<Json<ResetResponse>, (StatusCode, String)> {
    match params.scope.to_lowercase().as_str() {
        "latency" => {
            state.mymq_metrics.reset_latency_window();
            state.kafka_metrics.reset_latency_window();
        }
        "all" => {
            state.mymq_metrics.reset_all();
            state.kafka_metrics.reset_all();
            state.consumers.reset_consistency_windows();
            state.producer.reset_sequences();
            state.idempotency.clear();
        }
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("scope must be one of: all, latency (got {other})"),
            ));
        }
    }

    info!("metrics reset scope={}", params.scope);
    Ok(Json(ResetResponse {
        status: "ok",
        scope: params.scope,
        metrics: ComparisonSnapshot {
            mymq: state.mymq_metrics.snapshot(),
            kafka: state.kafka_metrics.snapshot(),
        },
    }))
}

/// Peer ingress. Local admission only; replicas never fan back out. The
/// status code is the acknowledgement signal for the sending node's quorum.
async fn replicate(State(state): State<AppState>, Json(msg): Json<Message>) -> StatusCode {
    match state.broker.enqueue_from_peer(msg).await {
        Enqueue::Accepted => StatusCode::OK,
        Enqueue::Rejected(RejectReason::Duplicate) => StatusCode::CONFLICT,
        Enqueue::Rejected(RejectReason::QueueFull | RejectReason::Quorum) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Enqueue::Rejected(RejectReason::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
