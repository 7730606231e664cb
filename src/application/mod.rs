//! Application Layer
//!
//! HTTP surface wiring the domain services to axum.

pub mod handlers;

use crate::domain::services::broadcast_dispatcher::BroadcastDispatcher;
use crate::domain::services::order_reconciler::OrderStatusReconciler;
use crate::domain::services::token_manager::TokenManager;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub reconciler: Arc<OrderStatusReconciler>,
    pub tokens: Arc<TokenManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::broadcast_handler::health))
        .route(
            "/signals/broadcast",
            post(handlers::broadcast_handler::broadcast_signal),
        )
        .route(
            "/orders/status/refresh",
            post(handlers::broadcast_handler::refresh_order_statuses),
        )
        .route(
            "/accounts/:id/token",
            post(handlers::broadcast_handler::refresh_account_token),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
