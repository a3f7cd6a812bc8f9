//! ---
//! ccs_section: "05-operator-interface"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Operator HTTP interface over the control-state store."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
//! Narrow operator interface: read-only views over the control-state store
//! and event sink, plus the single mode-change write. Nothing here can
//! mutate control state except through the store's mode-request mailbox,
//! which the scheduler drains at tick boundaries.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ccs_core::events::EventRecord;
use ccs_core::metrics::SharedRegistry;
use ccs_core::state::{ControlStateStore, OperatorMode, StoreSnapshot};
use ccs_core::EventSink;
use prometheus::TextEncoder;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Shared state injected into the axum handlers.
pub struct ApiState {
    store: Arc<ControlStateStore>,
    sink: Arc<EventSink>,
    registry: Option<SharedRegistry>,
}

impl ApiState {
    pub fn new(
        store: Arc<ControlStateStore>,
        sink: Arc<EventSink>,
        registry: Option<SharedRegistry>,
    ) -> Self {
        Self {
            store,
            sink,
            registry,
        }
    }
}

/// Payload of the `/events` endpoint.
#[derive(Debug, Serialize)]
pub struct EventsView {
    pub dropped: u64,
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

fn default_event_limit() -> usize {
    64
}

/// Mode-change request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeRequest {
    pub mode: OperatorMode,
}

/// Response emitted after queueing a mode change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeResponse {
    pub accepted: bool,
    pub message: String,
}

/// Spawn the operator API server.
pub async fn spawn_api_server(state: Arc<ApiState>, listen: SocketAddr) -> anyhow::Result<ApiServer> {
    let listener = TcpListener::bind(listen).await?;
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "operator api listening");

    let router = Router::new()
        .route("/status", get(get_status))
        .route("/window", get(get_window))
        .route("/events", get(get_events))
        .route("/metrics", get(get_metrics))
        .route("/mode", post(post_mode))
        .with_state(state);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });
    let task = tokio::spawn(async move {
        if let Err(err) = server.await {
            warn!(error = %err, "operator api server exited with error");
        }
    });

    Ok(ApiServer {
        address: local_addr,
        task,
        shutdown: shutdown_tx,
    })
}

/// Handle returned from [`spawn_api_server`].
pub struct ApiServer {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ApiServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StoreSnapshot> {
    let mut snapshot = state.store.snapshot();
    // The window digest has its own endpoint.
    snapshot.window = None;
    Json(snapshot)
}

async fn get_window(State(state): State<Arc<ApiState>>) -> Response {
    match state.store.snapshot().window {
        Some(window) => Json(window).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn get_events(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsView> {
    Json(EventsView {
        dropped: state.sink.dropped(),
        events: state.sink.recent(query.limit),
    })
}

async fn get_metrics(State(state): State<Arc<ApiState>>) -> Response {
    let Some(registry) = &state.registry else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics registry unavailable",
        )
            .into_response();
    };
    let encoder = TextEncoder::new();
    let families = registry.gather();
    match encoder.encode_to_string(&families) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn post_mode(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ModeRequest>,
) -> (StatusCode, Json<ModeResponse>) {
    state.store.request_mode(request.mode);
    info!(mode = request.mode.as_str(), "operator mode change queued");
    (
        StatusCode::ACCEPTED,
        Json(ModeResponse {
            accepted: true,
            message: format!("mode {} applies at the next tick", request.mode.as_str()),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccs_common::config::SupervisorConfig;
    use ccs_core::events::EventKind;
    use ccs_core::metrics::{new_registry, SupervisorMetrics};

    fn populated_state() -> Arc<ApiState> {
        let config = SupervisorConfig::default();
        let store = Arc::new(ControlStateStore::new(&config.groups));
        let sink = EventSink::new(32);
        sink.publish(1, EventKind::DecisionEmitted, None, "tick 1".into());
        sink.publish(2, EventKind::DeadlineMiss, None, "1 consecutive".into());

        let registry = new_registry();
        let metrics = SupervisorMetrics::new(registry.clone()).unwrap();
        metrics.inc_tick();

        Arc::new(ApiState::new(store, sink, Some(registry)))
    }

    #[tokio::test]
    async fn endpoints_serve_status_events_metrics_and_mode() {
        let state = populated_state();
        let store = state.store.clone();
        let server = spawn_api_server(state, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let base = format!("http://{}", server.local_addr());
        let client = reqwest::Client::new();

        let status: serde_json::Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["mode"], "auto");
        assert_eq!(status["degradation"], "normal");

        let events: serde_json::Value = client
            .get(format!("{base}/events?limit=1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(events["events"].as_array().unwrap().len(), 1);
        assert_eq!(events["dropped"], 0);

        let metrics_text = client
            .get(format!("{base}/metrics"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(metrics_text.contains("ccs_ticks_total"));

        let response = client
            .post(format!("{base}/mode"))
            .json(&serde_json::json!({ "mode": "safe-hold" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        assert_eq!(store.take_mode_request(), Some(OperatorMode::SafeHold));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn window_endpoint_is_empty_before_the_first_commit() {
        let state = populated_state();
        let server = spawn_api_server(state, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let base = format!("http://{}", server.local_addr());
        let response = reqwest::get(format!("{base}/window")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        server.shutdown().await.unwrap();
    }
}
