//! HTTP read models and control endpoints.
//!
//! Read endpoints serialize snapshots of in-memory state; control
//! endpoints flip flags or kick background work and return `{ok: true}`.
//! Nothing here blocks on the network: long work is spawned.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::state::AppState;

/// Default and maximum `?limit=` for the ring endpoints.
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    limit: Option<usize>,
}

impl LimitParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

/// Builds the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/activities", get(activities))
        .route("/api/trades", get(trades))
        .route("/api/decisions", get(decisions))
        .route("/api/stats", get(stats))
        .route("/api/btc-price", get(btc_price))
        .route("/api/redemptions", get(redemptions))
        .route("/api/positions", get(positions))
        .route("/api/bot/start", post(bot_start))
        .route("/api/bot/stop", post(bot_stop))
        .route("/api/bot/scan-now", post(scan_now))
        .route("/api/killswitch", post(killswitch))
        .route("/api/scan-positions", post(scan_positions))
        .with_state(state)
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let coordinator = state.coordinator.status();
    Json(json!({
        "isRunning": coordinator.is_running,
        "lastScanTime": coordinator.last_scan_time,
        "lastSpikeStatus": coordinator.last_spike_status,
        "strategy": coordinator.strategy,
        "safety": state.safety.snapshot(),
    }))
}

async fn activities(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Json<Value> {
    Json(json!({ "activities": state.bus.activities(params.limit()) }))
}

async fn trades(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Json<Value> {
    Json(json!({ "trades": state.bus.trades(params.limit()) }))
}

async fn decisions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Json<Value> {
    Json(json!({ "decisions": state.bus.decisions(params.limit()) }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "stats": state.bus.stats(), "safety": state.safety.snapshot() }))
}

async fn btc_price(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "latest": state.feed.latest(),
        "context": state.feed.context(),
    }))
}

async fn redemptions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let queue = state.engine.queue();
    let totals = queue.totals();
    Json(json!({
        "pending": queue.pending(),
        "history": queue.history(),
        "safeAddress": state.engine.proxy_address().map(|a| format!("{:?}", a)),
        "totalRedeemed": totals.total_redeemed,
        "totalLost": totals.total_lost,
    }))
}

async fn positions(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "lastScan": state.scanner.last_result() }))
}

async fn bot_start(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.coordinator.start();
    Json(json!({ "ok": true, "isRunning": true }))
}

async fn bot_stop(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.coordinator.stop();
    Json(json!({ "ok": true, "isRunning": false }))
}

async fn scan_now(State(state): State<Arc<AppState>>) -> Json<Value> {
    info!("Manual scan requested");
    let coordinator = Arc::clone(&state.coordinator);
    tokio::spawn(async move {
        coordinator.tick().await;
    });
    Json(json!({ "ok": true }))
}

async fn killswitch(State(state): State<Arc<AppState>>) -> Json<Value> {
    let engaged = state.safety.toggle_kill_switch();
    Json(json!({ "ok": true, "killSwitch": engaged }))
}

async fn scan_positions(State(state): State<Arc<AppState>>) -> Json<Value> {
    info!("Manual position scan requested");
    let scanner = Arc::clone(&state.scanner);
    let signer = state.signer_address.clone();
    let proxy = state.engine.proxy_address().map(|a| format!("{:?}", a));
    tokio::spawn(async move {
        scanner.scan(&signer, proxy.as_deref()).await;
    });
    Json(json!({ "ok": true }))
}
