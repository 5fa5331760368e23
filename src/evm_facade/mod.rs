//! HTTP transport for the bridge's two JSON-RPC surfaces plus health and
//! metrics. Grounded on the teacher's `api.rs` raw-socket server and
//! `metrics.rs` exposition in spirit — replaced here with a routed `axum`
//! server, since the teacher already depends on `axum`/`tower_governor`
//! without using either for routing.

pub mod abi;
mod eth_rpc;
mod jsonrpc;
mod rpc;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{EthRpcConfig, TokenConfig};
use crate::token_service::TokenService;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub token_service: TokenService,
    pub eth_rpc: EthRpcConfig,
    pub token: TokenConfig,
}

/// Builds the router: `/rpc` (internal), `/eth` (Ethereum-compatible,
/// answers `UNSUPPORTED_METHOD` for every call when `eth_rpc.enabled` is
/// false), `/health`, `/metrics`. CORS preflight is allowed unconditionally
/// and a per-IP rate limit guards every route.
pub fn router(state: AppState) -> Router {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(40)
            .finish()
            .expect("static governor config is always valid"),
    );
    let request_timeout = Duration::from_secs(state.eth_rpc.request_timeout_secs);

    Router::new()
        .route("/rpc", post(rpc::handle))
        .route("/eth", post(eth_rpc::handle))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(GovernorLayer { config: governor_conf })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics() -> String {
    crate::metrics::render()
}
