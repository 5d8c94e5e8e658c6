//! HTTP transport: a health probe and the MCP endpoint.

pub mod middleware;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

pub use middleware::SecurityConfig;

use crate::mcp::WorkSyncServer;
use crate::tracker::WorkTracker;

pub fn create_router(tracker: WorkTracker, security: SecurityConfig) -> Router {
    let mcp = StreamableHttpService::new(
        move || Ok(WorkSyncServer::new(tracker.clone())),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let protected = Router::new()
        .nest_service("/mcp", mcp)
        .layer(from_fn_with_state(security, middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
