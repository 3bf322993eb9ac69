//! HTTP read API and alert actions.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use vigil_application::{AggregationQueryService, AlertDispatcher, StatusTracker};
use vigil_ports::Clock;

#[derive(Clone)]
pub struct AppState {
    pub query: Arc<AggregationQueryService>,
    pub tracker: Arc<StatusTracker>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub clock: Arc<dyn Clock>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/chart", get(handlers::chart))
        .route("/api/validator-statuses", get(handlers::validator_statuses))
        .route("/api/validators/:id/history", get(handlers::status_history))
        .route("/api/alerts/:id/ack", post(handlers::acknowledge))
        .route("/api/alerts/callback", post(handlers::ack_callback))
        .route(
            "/api/subscriptions",
            post(handlers::subscribe).delete(handlers::unsubscribe),
        )
        .route("/api/announcements", post(handlers::announce))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
