//! In-memory store and scripted broker for service tests.
//!
//! The store enforces the same one-order-per-(signal, account) constraint as
//! the real schema so dispatcher tests catch duplicate submissions. The
//! broker keys its scripted behavior by account id; order-book lookups map
//! credentials back to the account through `client_id`.

use crate::domain::entities::account::{Account, Credentials};
use crate::domain::entities::audit::AuditLogEntry;
use crate::domain::entities::order::{NewOrder, Order, OrderStatus, OrderUpdate};
use crate::domain::entities::signal::{Signal, SignalRequest, SignalStatus};
use crate::domain::errors::BrokerError;
use crate::domain::repositories::broker_client::{BookEntry, BrokerClient, OrderAck, TokenGrant};
use crate::domain::repositories::store::{OrderSelector, Store, StoreError};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn account(id: i64) -> Account {
    Account {
        id,
        user_id: 100 + id,
        broker: "fakebroker".to_string(),
        api_key: format!("key-{}", id),
        api_secret: format!("secret-{}", id),
        pin: None,
        is_active: true,
        last_used_at: None,
    }
}

pub fn fresh_credentials(account_id: i64) -> Credentials {
    Credentials {
        access_token: format!("access-{}", account_id),
        refresh_token: format!("refresh-{}", account_id),
        expires_at: Some(Utc::now() + ChronoDuration::hours(8)),
        client_id: account_id.to_string(),
    }
}

pub fn stale_credentials(account_id: i64) -> Credentials {
    Credentials {
        access_token: format!("old-access-{}", account_id),
        refresh_token: format!("old-refresh-{}", account_id),
        expires_at: Some(Utc::now() - ChronoDuration::minutes(1)),
        client_id: account_id.to_string(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub accounts: Mutex<HashMap<i64, Account>>,
    pub credentials: Mutex<HashMap<i64, Credentials>>,
    pub orders: Mutex<Vec<Order>>,
    pub signals: Mutex<HashMap<i64, SignalStatus>>,
    pub audit: Mutex<Vec<AuditLogEntry>>,
    pub credential_writes: AtomicUsize,
    pub fail_signal_insert: AtomicBool,
    pub fail_credential_reads_for: Mutex<HashSet<i64>>,
    next_order_id: AtomicI64,
    next_signal_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            next_order_id: AtomicI64::new(1),
            next_signal_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn add_account(&self, account: Account) {
        self.accounts.lock().unwrap().insert(account.id, account);
    }

    pub fn set_credentials(&self, account_id: i64, credentials: Credentials) {
        self.credentials
            .lock()
            .unwrap()
            .insert(account_id, credentials);
    }

    pub fn insert_order(&self, order: NewOrder) -> i64 {
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().unwrap().push(Order {
            id,
            signal_id: order.signal_id,
            account_id: order.account_id,
            broker_order_id: order.broker_order_id,
            status: order.status,
            executed_at: order.executed_at,
            error_message: order.error_message,
            raw_response: order.raw_response,
            created_at: Utc::now(),
        });
        id
    }

    pub fn order(&self, order_id: i64) -> Option<Order> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
    }

    pub fn orders_snapshot(&self) -> Vec<Order> {
        self.orders.lock().unwrap().clone()
    }

    pub fn audit_len(&self) -> usize {
        self.audit.lock().unwrap().len()
    }

    pub fn signal_status(&self, signal_id: i64) -> Option<SignalStatus> {
        self.signals.lock().unwrap().get(&signal_id).copied()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_or_create_symbol(
        &self,
        _symbol: &str,
        _exchange: &str,
    ) -> Result<i64, StoreError> {
        Ok(1)
    }

    async fn create_signal(
        &self,
        _request: &SignalRequest,
        _symbol_id: i64,
    ) -> Result<i64, StoreError> {
        if self.fail_signal_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Query("signal insert failed".to_string()));
        }
        let id = self.next_signal_id.fetch_add(1, Ordering::SeqCst);
        self.signals
            .lock()
            .unwrap()
            .insert(id, SignalStatus::Pending);
        Ok(id)
    }

    async fn update_signal_status(
        &self,
        signal_id: i64,
        status: SignalStatus,
    ) -> Result<(), StoreError> {
        self.signals.lock().unwrap().insert(signal_id, status);
        Ok(())
    }

    async fn list_active_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .accounts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn load_account(&self, account_id: i64) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.lock().unwrap().get(&account_id).cloned())
    }

    async fn touch_account(&self, account_id: i64) -> Result<(), StoreError> {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(&account_id) {
            account.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn load_credentials(&self, account_id: i64) -> Result<Option<Credentials>, StoreError> {
        if self
            .fail_credential_reads_for
            .lock()
            .unwrap()
            .contains(&account_id)
        {
            return Err(StoreError::Query("credential read failed".to_string()));
        }
        Ok(self.credentials.lock().unwrap().get(&account_id).cloned())
    }

    async fn save_credentials(
        &self,
        account_id: i64,
        credentials: &Credentials,
    ) -> Result<(), StoreError> {
        self.credential_writes.fetch_add(1, Ordering::SeqCst);
        self.credentials
            .lock()
            .unwrap()
            .insert(account_id, credentials.clone());
        Ok(())
    }

    async fn create_order(&self, order: &NewOrder) -> Result<i64, StoreError> {
        let mut orders = self.orders.lock().unwrap();
        if orders
            .iter()
            .any(|o| o.signal_id == order.signal_id && o.account_id == order.account_id)
        {
            return Err(StoreError::Query(format!(
                "UNIQUE constraint failed: orders({}, {})",
                order.signal_id, order.account_id
            )));
        }
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        orders.push(Order {
            id,
            signal_id: order.signal_id,
            account_id: order.account_id,
            broker_order_id: order.broker_order_id.clone(),
            status: order.status,
            executed_at: order.executed_at,
            error_message: order.error_message.clone(),
            raw_response: order.raw_response.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn update_order(&self, order_id: i64, update: &OrderUpdate) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| StoreError::Query(format!("order not found: {}", order_id)))?;
        order.status = update.status;
        if update.executed_at.is_some() {
            order.executed_at = update.executed_at;
        }
        if update.error_message.is_some() {
            order.error_message = update.error_message.clone();
        }
        Ok(())
    }

    async fn list_orders(&self, selector: &OrderSelector) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.lock().unwrap();
        let selected = match selector {
            OrderSelector::Orders(ids) => orders
                .iter()
                .filter(|o| ids.contains(&o.id))
                .cloned()
                .collect(),
            OrderSelector::Accounts(ids) => orders
                .iter()
                .filter(|o| ids.contains(&o.account_id) && o.status.is_reconcilable())
                .cloned()
                .collect(),
            OrderSelector::AllPending => orders
                .iter()
                .filter(|o| o.status.is_reconcilable())
                .cloned()
                .collect(),
        };
        Ok(selected)
    }

    async fn append_audit_log(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        self.audit.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// How the fake broker answers a placement for a given account.
#[derive(Debug, Clone)]
pub enum PlaceOutcome {
    Accept { status: String },
    Reject(String),
    Delayed { delay: Duration, status: String },
}

#[derive(Default)]
pub struct FakeBroker {
    pub refresh_calls: AtomicUsize,
    pub place_calls: AtomicUsize,
    pub refresh_delay: Mutex<Duration>,
    pub fail_refresh_for: Mutex<HashSet<i64>>,
    pub fail_book_for: Mutex<HashSet<i64>>,
    pub place_outcomes: Mutex<HashMap<i64, PlaceOutcome>>,
    pub books: Mutex<HashMap<i64, Vec<BookEntry>>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_place_outcome(&self, account_id: i64, outcome: PlaceOutcome) {
        self.place_outcomes
            .lock()
            .unwrap()
            .insert(account_id, outcome);
    }

    pub fn fail_refresh(&self, account_id: i64) {
        self.fail_refresh_for.lock().unwrap().insert(account_id);
    }

    pub fn set_book(&self, account_id: i64, entries: Vec<(&str, &str)>) {
        self.books.lock().unwrap().insert(
            account_id,
            entries
                .into_iter()
                .map(|(id, status)| BookEntry {
                    broker_order_id: id.to_string(),
                    status: status.to_string(),
                })
                .collect(),
        );
    }

    fn ack(&self, account_id: i64, status: String) -> OrderAck {
        let n = self.place_calls.load(Ordering::SeqCst);
        let broker_order_id = format!("BRK-{}-{}", account_id, n);
        OrderAck {
            raw: json!({ "order_id": broker_order_id, "status": status }),
            broker_order_id,
            status,
        }
    }
}

#[async_trait]
impl BrokerClient for FakeBroker {
    fn name(&self) -> &str {
        "fakebroker"
    }

    async fn place_order(
        &self,
        _credentials: &Credentials,
        account: &Account,
        _signal: &Signal,
    ) -> Result<OrderAck, BrokerError> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .place_outcomes
            .lock()
            .unwrap()
            .get(&account.id)
            .cloned()
            .unwrap_or(PlaceOutcome::Accept {
                status: "open".to_string(),
            });
        match outcome {
            PlaceOutcome::Accept { status } => Ok(self.ack(account.id, status)),
            PlaceOutcome::Reject(message) => Err(BrokerError::Rejected(message)),
            PlaceOutcome::Delayed { delay, status } => {
                tokio::time::sleep(delay).await;
                Ok(self.ack(account.id, status))
            }
        }
    }

    async fn refresh_token(
        &self,
        account: &Account,
        _credentials: &Credentials,
    ) -> Result<TokenGrant, BrokerError> {
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_refresh_for.lock().unwrap().contains(&account.id) {
            return Err(BrokerError::Auth("refresh token expired".to_string()));
        }
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenGrant {
            access_token: format!("access-{}-{}", account.id, n),
            refresh_token: format!("refresh-{}-{}", account.id, n),
            expires_at: Some(Utc::now() + ChronoDuration::hours(8)),
        })
    }

    async fn get_order_book(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<BookEntry>, BrokerError> {
        let account_id: i64 = credentials
            .client_id
            .parse()
            .map_err(|_| BrokerError::Auth("unknown client".to_string()))?;
        if self.fail_book_for.lock().unwrap().contains(&account_id) {
            return Err(BrokerError::Unavailable("order book timed out".to_string()));
        }
        Ok(self
            .books
            .lock()
            .unwrap()
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }
}
