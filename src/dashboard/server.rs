//! HTTP API and WebSocket dashboard server

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::modules::pump_monitor::{PumpEvent, PumpHistoryEntry, PumpMonitorStats, PumpRecord};
use crate::modules::whale_tracker::{WhaleActivity, WhaleSentiment, WhaleTrackerStats};
use crate::modules::{PumpMonitor, WhaleTracker};
use crate::utils::alerts::Alert;
use crate::utils::{AlertService, MetricsService};

/// Query params for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    uptime: f64,
    modules: ModuleStatus,
}

#[derive(Debug, Serialize)]
pub struct ModuleStatus {
    pump_monitor: bool,
    whale_tracker: bool,
}

/// Stats response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pump_monitor: PumpMonitorStats,
    whale_tracker: WhaleTrackerStats,
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    #[serde(rename = "init")]
    Init {
        stats: StatsResponse,
        active_pumps: Vec<PumpRecord>,
        recent_alerts: Vec<Alert>,
    },
    #[serde(rename = "pump")]
    Pump(PumpEvent),
    #[serde(rename = "alert")]
    Alert(Alert),
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pump_monitor: PumpMonitor,
    pub whale_tracker: Arc<WhaleTracker>,
    pub alerts: Arc<AlertService>,
    pub metrics: Arc<MetricsService>,
    pub start_time: std::time::Instant,
}

impl AppState {
    fn stats(&self) -> StatsResponse {
        StatsResponse {
            pump_monitor: self.pump_monitor.get_stats(),
            whale_tracker: self.whale_tracker.get_stats(),
        }
    }
}

/// Build the dashboard router; every route is read-only
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/stats", get(get_stats))
        // Pump Monitor
        .route("/api/pumps", get(get_active_pumps))
        .route("/api/pumps/history", get(get_pump_history))
        .route("/api/pumps/:token", get(get_pump))
        // Whale Tracker
        .route("/api/whales/wallets", get(get_whale_wallets))
        .route("/api/whales/:token/activity", get(get_whale_activity))
        .route("/api/whales/:token/sentiment", get(get_whale_sentiment))
        .route("/api/whales/:token/positions", get(get_whale_positions))
        // Alerts
        .route("/api/alerts", get(get_alerts))
        // Prometheus metrics
        .route("/metrics", get(get_metrics))
        // Health checks
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // WebSocket
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Dashboard server
pub struct DashboardServer {
    port: u16,
    state: AppState,
}

impl DashboardServer {
    /// Create a new dashboard server
    pub fn new(
        config: &Config,
        pump_monitor: PumpMonitor,
        whale_tracker: Arc<WhaleTracker>,
        alerts: Arc<AlertService>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        let state = AppState {
            pump_monitor,
            whale_tracker,
            alerts,
            metrics,
            start_time: std::time::Instant::now(),
        };

        Self {
            port: config.dashboard_port,
            state,
        }
    }

    /// Start the dashboard server
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(target: "DASHBOARD", "✅ Dashboard running at http://localhost:{}", self.port);

        axum::serve(listener, app).await?;

        Ok(())
    }
}

// ============================================
// HANDLERS
// ============================================

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.stats())
}

// Pump Monitor handlers
async fn get_active_pumps(State(state): State<AppState>) -> Json<Vec<PumpRecord>> {
    Json(state.pump_monitor.get_active_pumps())
}

async fn get_pump(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    match state.pump_monitor.get_pump(&token) {
        Some(pump) => Json(pump).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Pump not found"})),
        )
            .into_response(),
    }
}

async fn get_pump_history(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<PumpHistoryEntry>> {
    let limit = params.limit.unwrap_or(50);
    Json(state.pump_monitor.get_history(limit))
}

// Whale Tracker handlers
async fn get_whale_wallets(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.whale_tracker.active_wallets())
}

async fn get_whale_activity(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Json<Vec<WhaleActivity>> {
    Json(state.whale_tracker.get_recent_activity(&token))
}

async fn get_whale_sentiment(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Json<WhaleSentiment> {
    Json(state.whale_tracker.get_whale_sentiment(&token))
}

async fn get_whale_positions(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Json<HashMap<String, f64>> {
    Json(state.whale_tracker.get_positions(&token))
}

// Alerts handler
async fn get_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Alert>> {
    let limit = params.limit.unwrap_or(50);
    Json(state.alerts.get_recent_alerts(limit))
}

// Metrics handler
async fn get_metrics(State(state): State<AppState>) -> Response {
    state
        .metrics
        .set_module_status("pump_monitor", state.pump_monitor.is_running());
    state
        .metrics
        .set_module_status("whale_tracker", state.whale_tracker.is_running());

    match state.metrics.get_metrics() {
        Ok(metrics) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            metrics,
        )
            .into_response(),
        Err(e) => {
            error!(target: "DASHBOARD", "Metrics encoding failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// Health check handlers
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime: state.start_time.elapsed().as_secs_f64(),
        modules: ModuleStatus {
            pump_monitor: state.pump_monitor.is_running(),
            whale_tracker: state.whale_tracker.is_running(),
        },
    })
}

async fn readiness_check(State(state): State<AppState>) -> Response {
    let ready = state.pump_monitor.is_running() && state.whale_tracker.is_running();

    if ready {
        Json(serde_json::json!({"ready": true})).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ready": false})),
        )
            .into_response()
    }
}

// WebSocket handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    info!(target: "DASHBOARD", "WebSocket client connected");

    // Subscribe before the snapshot so no event falls between the two
    let mut pump_rx = state.pump_monitor.subscribe_events();
    let mut alert_rx = state.alerts.subscribe();

    let init_msg = WsMessage::Init {
        stats: state.stats(),
        active_pumps: state.pump_monitor.get_active_pumps(),
        recent_alerts: state.alerts.get_recent_alerts(20),
    };

    if let Ok(json) = serde_json::to_string(&init_msg) {
        let _ = sender.send(Message::Text(json)).await;
    }

    // Forward pump events and alerts to websocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = next_ws_message(&mut pump_rx, &mut alert_rx).await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Handle incoming messages (mainly for keeping connection alive)
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(target: "DASHBOARD", "WebSocket client disconnected");
}

/// Next message from either feed; `None` once a feed closes
async fn next_ws_message(
    pump_rx: &mut broadcast::Receiver<PumpEvent>,
    alert_rx: &mut broadcast::Receiver<Alert>,
) -> Option<WsMessage> {
    loop {
        let received = tokio::select! {
            event = pump_rx.recv() => event.map(WsMessage::Pump),
            alert = alert_rx.recv() => alert.map(WsMessage::Alert),
        };

        match received {
            Ok(msg) => return Some(msg),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(target: "DASHBOARD", "WebSocket client lagged {} messages", n);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
