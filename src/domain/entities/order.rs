//! Per-account order records and the canonical order status vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical order lifecycle state, as opposed to whatever vocabulary the
/// broker reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Executed,
    PartiallyExecuted,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Executed => "executed",
            OrderStatus::PartiallyExecuted => "partially_executed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "executed" => Some(OrderStatus::Executed),
            "partially_executed" => Some(OrderStatus::PartiallyExecuted),
            "failed" => Some(OrderStatus::Failed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Map a raw broker status string onto the canonical vocabulary.
    ///
    /// Total function: never fails, defaults to `Pending` for anything
    /// unrecognized, since assuming failure from an unknown string risks
    /// abandoning an order the broker is still working.
    ///
    /// The partial check runs first so "partially_filled" and "partially
    /// executed" never match the executed tokens.
    pub fn from_broker(raw: &str) -> Self {
        let s = raw.to_ascii_lowercase();
        if s.contains("partial") {
            OrderStatus::PartiallyExecuted
        } else if s.contains("complete") || s.contains("executed") || s.contains("filled") {
            OrderStatus::Executed
        } else if s.contains("cancel") {
            OrderStatus::Cancelled
        } else if s.contains("reject") || s.contains("failed") {
            OrderStatus::Failed
        } else if s.contains("open") || s.contains("pending") {
            OrderStatus::Pending
        } else {
            OrderStatus::Pending
        }
    }

    /// Statuses the reconciler still has to chase against the broker.
    pub fn is_reconcilable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PartiallyExecuted)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The execution record for one (signal, account) pair. Created exactly once
/// by the dispatcher, thereafter mutated only by status reconciliation.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: i64,
    pub signal_id: i64,
    pub account_id: i64,
    pub broker_order_id: Option<String>,
    pub status: OrderStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub raw_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting a fresh order row.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub signal_id: i64,
    pub account_id: i64,
    pub broker_order_id: Option<String>,
    pub status: OrderStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub raw_response: Option<String>,
}

impl NewOrder {
    /// Order row for an attempt that never reached, or was rejected by,
    /// the broker.
    pub fn failed(signal_id: i64, account_id: i64, message: String) -> Self {
        NewOrder {
            signal_id,
            account_id,
            broker_order_id: None,
            status: OrderStatus::Failed,
            executed_at: None,
            error_message: Some(message),
            raw_response: None,
        }
    }
}

/// Mutation applied by the reconciler. `executed_at` and `error_message`
/// are only written when set.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub status: OrderStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
