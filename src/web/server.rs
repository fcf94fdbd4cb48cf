use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::context::{BatchScoreOutcome, ServiceContext};
use crate::metrics;
use crate::registry::RegistryError;
use crate::scoring::{ScoreResult, WARNING_SCORE};

/// HTTP / WebSocket facade over the scoring service
pub struct WebServer {
    ctx: Arc<ServiceContext>,
}

#[derive(Clone)]
struct AppState {
    ctx: Arc<ServiceContext>,
}

#[derive(Deserialize)]
struct BatchRequest {
    addresses: Vec<String>,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

/// Registry failure as an HTTP response
struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::MalformedInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            e if e.is_transient() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl WebServer {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
        };

        Router::new()
            .route("/health", get(health))
            .route("/node/:address/score", get(node_score))
            .route("/nodes/batch-score", post(batch_score))
            .route("/nodes/critical", get(critical_nodes))
            .route("/api/keeper", get(api_keeper))
            .route("/api/writes", get(api_writes))
            .route("/metrics", get(prometheus_metrics))
            .route("/ws/live-scores", get(live_scores))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    pub async fn run<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.ctx.config.web;
        if !config.enabled {
            info!("Web API disabled");
            shutdown.await;
            return Ok(());
        }

        let addr = format!("{}:{}", config.address, config.port);
        info!("🌐 Web API listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp(),
        "chainConnected": !state.ctx.is_demo(),
        "writeEnabled": state.ctx.write_enabled(),
    }))
}

async fn node_score(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ScoreResult>, ApiError> {
    Ok(Json(state.ctx.score_node(&address).await?))
}

async fn batch_score(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchScoreOutcome>, ApiError> {
    Ok(Json(state.ctx.score_batch(&request.addresses).await?))
}

async fn critical_nodes(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let nodes = state.ctx.critical_nodes().await?;
    Ok(Json(serde_json::json!({
        "critical_nodes": nodes,
        "count": nodes.len(),
    })))
}

/// Keeper / registry status
async fn api_keeper(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.ctx.get_stats())
}

/// Recent registry writes, newest first
async fn api_writes(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    let limit = params.limit.unwrap_or(50);
    Json(serde_json::json!({
        "writes": state.ctx.recent_writes(limit),
        "write_enabled": state.ctx.write_enabled(),
    }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = metrics::render_metrics(
        &state.ctx.metrics,
        !state.ctx.is_demo(),
        state.ctx.write_enabled(),
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn live_scores(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| push_live_scores(socket, state))
}

/// Push one score every `live_interval_secs` until the client goes away
async fn push_live_scores(mut socket: WebSocket, state: AppState) {
    let period = Duration::from_secs(state.ctx.config.web.live_interval_secs);
    'push: loop {
        match state.ctx.sample_live_score().await {
            Ok(Some(result)) => {
                let msg = serde_json::json!({
                    "address": result.address,
                    "score": result.predicted_score,
                    "timestamp": chrono::Utc::now().timestamp(),
                    "alert": result.predicted_score < WARNING_SCORE,
                });
                if socket.send(Message::Text(msg.to_string())).await.is_err() {
                    break;
                }
            }
            Ok(None) => debug!("Live scores: no active nodes"),
            Err(e) => warn!("Live scores: sampling failed: {}", e),
        }

        // Wait out the period, watching for the client leaving
        let next = tokio::time::Instant::now() + period;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next) => break,
                incoming = socket.recv() => match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break 'push,
                    Some(Ok(_)) => {}
                },
            }
        }
    }
    debug!("Live score client disconnected");
}
