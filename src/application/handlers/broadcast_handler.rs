//! HTTP handlers for signal broadcast, order status refresh, and token
//! maintenance.

use crate::application::AppState;
use crate::domain::entities::signal::SignalRequest;
use crate::domain::errors::{BroadcastError, TokenError};
use crate::domain::repositories::store::OrderSelector;
use crate::domain::services::broadcast_dispatcher::BroadcastResult;
use crate::domain::services::order_reconciler::ReconciliationReport;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: message }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /signals/broadcast
pub async fn broadcast_signal(
    State(state): State<AppState>,
    Json(request): Json<SignalRequest>,
) -> Result<Json<BroadcastResult>, (StatusCode, Json<ErrorResponse>)> {
    match state.dispatcher.broadcast_signal(request).await {
        Ok(result) => Ok(Json(result)),
        Err(BroadcastError::InvalidSignal(message)) => Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            message,
        )),
        Err(e) => {
            error!(error = %e, "broadcast failed");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            ))
        }
    }
}

/// Body for POST /orders/status/refresh. An empty object reconciles every
/// pending order.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RefreshOrdersRequest {
    #[serde(default)]
    pub order_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub account_ids: Option<Vec<i64>>,
}

impl RefreshOrdersRequest {
    fn selector(&self) -> Result<OrderSelector, String> {
        match (&self.order_ids, &self.account_ids) {
            (Some(_), Some(_)) => {
                Err("provide either order_ids or account_ids, not both".to_string())
            }
            (Some(ids), None) => Ok(OrderSelector::Orders(ids.clone())),
            (None, Some(ids)) => Ok(OrderSelector::Accounts(ids.clone())),
            (None, None) => Ok(OrderSelector::AllPending),
        }
    }
}

/// POST /orders/status/refresh
pub async fn refresh_order_statuses(
    State(state): State<AppState>,
    Json(request): Json<RefreshOrdersRequest>,
) -> Result<Json<ReconciliationReport>, (StatusCode, Json<ErrorResponse>)> {
    let selector = request
        .selector()
        .map_err(|message| error_response(StatusCode::UNPROCESSABLE_ENTITY, message))?;

    match state.reconciler.update_order_statuses(&selector).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            error!(error = %e, "order status refresh failed");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            ))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub account_id: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// POST /accounts/:id/token
///
/// Forces the account's token through the validity check, refreshing if
/// stale. The response never carries token material.
pub async fn refresh_account_token(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> Result<Json<TokenResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.tokens.ensure_valid_for(account_id).await {
        Ok(credentials) => Ok(Json(TokenResponse {
            account_id,
            expires_at: credentials.expires_at,
        })),
        Err(e @ TokenError::NoCredentials(_)) => {
            Err(error_response(StatusCode::NOT_FOUND, e.to_string()))
        }
        Err(e @ TokenError::RefreshFailed { .. }) => {
            Err(error_response(StatusCode::BAD_GATEWAY, e.to_string()))
        }
        Err(e) => {
            error!(error = %e, "token refresh failed");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            ))
        }
    }
}
