//! HTTP/WebSocket surface for the telephony bridge (C12): one upgrade
//! endpoint per platform adapter plus a liveness probe.

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::json;

use crate::adapters::{audiocodes, twilio, AdapterDeps};
use crate::api::response::api_success;
use crate::api::ws_connection::WsConnectionManager;

/// Shared state for the bridge router. Thin by design -- all call wiring
/// lives in [`AdapterDeps`]; this just adds the connection registry every
/// upgrade handler needs to join the force-close hierarchy.
#[derive(Clone)]
pub struct BridgeAppState {
    pub adapter_deps: AdapterDeps,
    pub ws_manager: Arc<WsConnectionManager>,
}

/// Builds the router: `/voicebot` (AudioCodes-style gateway), `/twilio`
/// (cloud-telephony style), `/health` (liveness probe).
pub fn create_bridge_router(state: BridgeAppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/voicebot", get(voicebot_upgrade))
        .route("/twilio", get(twilio_upgrade))
        .with_state(state)
}

async fn health_check(State(state): State<BridgeAppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "activeCalls": state.ws_manager.connection_count(),
    }))
}

async fn voicebot_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<BridgeAppState>,
) -> impl IntoResponse {
    let guard = state.ws_manager.register();
    let deps = state.adapter_deps.clone();
    ws.on_upgrade(move |socket| audiocodes::handle_socket(socket, deps, guard))
}

async fn twilio_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<BridgeAppState>,
) -> impl IntoResponse {
    let guard = state.ws_manager.register();
    let deps = state.adapter_deps.clone();
    ws.on_upgrade(move |socket| twilio::handle_socket(socket, deps, guard))
}
