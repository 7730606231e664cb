//! Store Trait
//!
//! Persistence capability consumed by the broadcast engine. All calls are
//! atomic at row granularity; the core never needs multi-row transactions.
//! Passing the store in explicitly (instead of a global handle) is what lets
//! the dispatcher run against in-memory fakes in tests.

use crate::domain::entities::account::{Account, Credentials};
use crate::domain::entities::audit::AuditLogEntry;
use crate::domain::entities::order::{NewOrder, Order, OrderUpdate};
use crate::domain::entities::signal::{SignalRequest, SignalStatus};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("query error: {0}")]
    Query(String),
}

/// Which locally recorded orders a reconciliation run should cover.
#[derive(Debug, Clone)]
pub enum OrderSelector {
    /// Explicit order ids, regardless of current status.
    Orders(Vec<i64>),
    /// All reconcilable orders belonging to these accounts.
    Accounts(Vec<i64>),
    /// Every order still pending or partially executed.
    AllPending,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Find-or-create by normalized symbol string, returning the symbol id.
    async fn find_or_create_symbol(&self, symbol: &str, exchange: &str)
        -> Result<i64, StoreError>;

    async fn create_signal(&self, request: &SignalRequest, symbol_id: i64)
        -> Result<i64, StoreError>;

    async fn update_signal_status(
        &self,
        signal_id: i64,
        status: SignalStatus,
    ) -> Result<(), StoreError>;

    /// Accounts eligible for broadcast: active accounts of active users.
    async fn list_active_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn load_account(&self, account_id: i64) -> Result<Option<Account>, StoreError>;

    /// Record that the account was just used against the broker.
    async fn touch_account(&self, account_id: i64) -> Result<(), StoreError>;

    async fn load_credentials(&self, account_id: i64) -> Result<Option<Credentials>, StoreError>;

    async fn save_credentials(
        &self,
        account_id: i64,
        credentials: &Credentials,
    ) -> Result<(), StoreError>;

    /// Insert the single order row for one (signal, account) pair. Fails if
    /// a row for that pair already exists.
    async fn create_order(&self, order: &NewOrder) -> Result<i64, StoreError>;

    async fn update_order(&self, order_id: i64, update: &OrderUpdate) -> Result<(), StoreError>;

    async fn list_orders(&self, selector: &OrderSelector) -> Result<Vec<Order>, StoreError>;

    async fn append_audit_log(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;
}
