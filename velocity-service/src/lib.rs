//! Velocity Service - cached GP velocity metrics over HTTP

pub mod error;
pub mod routes;
pub mod state;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::{AppState, Freshness, MetricsCache, MetricsOutcome, SharedState};

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/metrics", get(routes::metrics))
        .route("/status", get(routes::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
