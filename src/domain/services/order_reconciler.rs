//! Order status reconciliation against the broker's order book.
//!
//! Runs on demand or periodically, grouping local orders by account so each
//! account costs one order-book call rather than one call per order. Account
//! groups are isolated: a failed credential refresh or broker call skips
//! that group with per-order error notes and the rest of the run continues.

use crate::domain::entities::audit::AuditLogEntry;
use crate::domain::entities::order::{Order, OrderStatus, OrderUpdate};
use crate::domain::repositories::broker_client::{BookEntry, BrokerClient};
use crate::domain::repositories::store::{OrderSelector, Store, StoreError};
use crate::domain::services::token_manager::TokenManager;
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened to one order during a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshDisposition {
    /// Broker reported a different status; the row was updated.
    Updated,
    /// Broker agrees with the stored status.
    Unchanged,
    /// The broker's book no longer lists this order. Ambiguous, books are
    /// often windowed, so the stored status is left alone.
    NotFound,
    /// The order's account group could not be reconciled.
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRefreshOutcome {
    pub order_id: i64,
    pub account_id: i64,
    pub status: OrderStatus,
    pub disposition: RefreshDisposition,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReconciliationReport {
    pub total: usize,
    pub updated: usize,
    pub results: Vec<OrderRefreshOutcome>,
}

pub struct OrderStatusReconciler {
    store: Arc<dyn Store>,
    broker: Arc<dyn BrokerClient>,
    tokens: Arc<TokenManager>,
}

impl OrderStatusReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn BrokerClient>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        OrderStatusReconciler {
            store,
            broker,
            tokens,
        }
    }

    /// Reconcile the selected orders against the broker's books.
    ///
    /// Idempotent: a second run with no broker-side change produces zero
    /// updates and zero audit entries.
    pub async fn update_order_statuses(
        &self,
        selector: &OrderSelector,
    ) -> Result<ReconciliationReport, StoreError> {
        let orders = self.store.list_orders(selector).await?;
        let total = orders.len();

        let mut groups: HashMap<i64, Vec<Order>> = HashMap::new();
        for order in orders {
            groups.entry(order.account_id).or_default().push(order);
        }

        let group_runs = groups
            .into_iter()
            .map(|(account_id, orders)| self.reconcile_account(account_id, orders));
        let mut results: Vec<OrderRefreshOutcome> =
            join_all(group_runs).await.into_iter().flatten().collect();
        results.sort_by_key(|r| r.order_id);

        let updated = results
            .iter()
            .filter(|r| r.disposition == RefreshDisposition::Updated)
            .count();
        info!(total, updated, "order status reconciliation complete");
        Ok(ReconciliationReport {
            total,
            updated,
            results,
        })
    }

    /// One broker order-book call covers every selected order of the
    /// account.
    async fn reconcile_account(
        &self,
        account_id: i64,
        orders: Vec<Order>,
    ) -> Vec<OrderRefreshOutcome> {
        let account = match self.store.load_account(account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return skip_group(orders, "account no longer exists");
            }
            Err(e) => {
                return skip_group(orders, &format!("account load failed: {}", e));
            }
        };

        let credentials = match self.tokens.ensure_valid(&account).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(account_id, error = %e, "skipping account group, credentials unusable");
                return skip_group(orders, &e.to_string());
            }
        };

        let book = match self.broker.get_order_book(&credentials).await {
            Ok(book) => book,
            Err(e) => {
                warn!(account_id, error = %e, "skipping account group, order book unavailable");
                return skip_group(orders, &e.to_string());
            }
        };
        let by_broker_id: HashMap<&str, &BookEntry> = book
            .iter()
            .map(|entry| (entry.broker_order_id.as_str(), entry))
            .collect();

        let mut outcomes = Vec::with_capacity(orders.len());
        for order in orders {
            outcomes.push(self.reconcile_order(order, &by_broker_id).await);
        }
        outcomes
    }

    async fn reconcile_order(
        &self,
        order: Order,
        by_broker_id: &HashMap<&str, &BookEntry>,
    ) -> OrderRefreshOutcome {
        let Some(broker_order_id) = order.broker_order_id.as_deref() else {
            return OrderRefreshOutcome {
                order_id: order.id,
                account_id: order.account_id,
                status: order.status,
                disposition: RefreshDisposition::NotFound,
                detail: Some("order has no broker order id".to_string()),
            };
        };
        let Some(entry) = by_broker_id.get(broker_order_id) else {
            return OrderRefreshOutcome {
                order_id: order.id,
                account_id: order.account_id,
                status: order.status,
                disposition: RefreshDisposition::NotFound,
                detail: Some("not present in broker order book".to_string()),
            };
        };

        let mapped = OrderStatus::from_broker(&entry.status);
        if mapped == order.status {
            return OrderRefreshOutcome {
                order_id: order.id,
                account_id: order.account_id,
                status: order.status,
                disposition: RefreshDisposition::Unchanged,
                detail: None,
            };
        }

        let update = OrderUpdate {
            status: mapped,
            executed_at: (mapped == OrderStatus::Executed).then(Utc::now),
            error_message: (mapped == OrderStatus::Failed)
                .then(|| format!("broker reported: {}", entry.status)),
        };
        if let Err(e) = self.store.update_order(order.id, &update).await {
            error!(order_id = order.id, error = %e, "failed to persist status transition");
            return OrderRefreshOutcome {
                order_id: order.id,
                account_id: order.account_id,
                status: order.status,
                disposition: RefreshDisposition::Error,
                detail: Some(e.to_string()),
            };
        }

        let audit = AuditLogEntry::new(
            "order_status_change",
            json!({
                "order_id": order.id,
                "account_id": order.account_id,
                "old_status": order.status.as_str(),
                "new_status": mapped.as_str(),
                "broker_status": entry.status,
            }),
        );
        if let Err(e) = self.store.append_audit_log(&audit).await {
            warn!(order_id = order.id, error = %e, "failed to audit status transition");
        }

        info!(
            order_id = order.id,
            account_id = order.account_id,
            old = %order.status,
            new = %mapped,
            "order status updated from broker book"
        );
        OrderRefreshOutcome {
            order_id: order.id,
            account_id: order.account_id,
            status: mapped,
            disposition: RefreshDisposition::Updated,
            detail: Some(format!("{} -> {}", order.status, mapped)),
        }
    }
}

fn skip_group(orders: Vec<Order>, reason: &str) -> Vec<OrderRefreshOutcome> {
    orders
        .into_iter()
        .map(|order| OrderRefreshOutcome {
            order_id: order.id,
            account_id: order.account_id,
            status: order.status,
            disposition: RefreshDisposition::Error,
            detail: Some(reason.to_string()),
        })
        .collect()
}
