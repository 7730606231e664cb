//! SQLite-backed implementation of the [`Store`] trait.

use super::models::{AccountRecord, CredentialsRecord, OrderRecord};
use super::DbPool;
use crate::domain::entities::account::{Account, Credentials};
use crate::domain::entities::audit::AuditLogEntry;
use crate::domain::entities::order::{NewOrder, Order, OrderUpdate};
use crate::domain::entities::signal::{SignalRequest, SignalStatus};
use crate::domain::repositories::store::{OrderSelector, Store, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::QueryBuilder;
use tracing::{debug, error};

const ORDER_COLUMNS: &str = "id, signal_id, account_id, broker_order_id, status, \
     executed_at, error_message, raw_response, created_at";

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn query_error(context: &str, e: sqlx::Error) -> StoreError {
        error!("{}: {}", context, e);
        StoreError::Query(format!("{}: {}", context, e))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_or_create_symbol(
        &self,
        symbol: &str,
        exchange: &str,
    ) -> Result<i64, StoreError> {
        // The no-op conflict update makes RETURNING yield the existing row's
        // id instead of nothing.
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO symbols (symbol, exchange)
            VALUES (?1, ?2)
            ON CONFLICT (symbol, exchange) DO UPDATE SET symbol = excluded.symbol
            RETURNING id
            "#,
        )
        .bind(symbol)
        .bind(exchange)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::query_error("Failed to find or create symbol", e))?;

        Ok(id)
    }

    async fn create_signal(
        &self,
        request: &SignalRequest,
        symbol_id: i64,
    ) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO signals (
                symbol_id, operator_id, quantity, action, instrument,
                order_kind, limit_price, status, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)
            RETURNING id
            "#,
        )
        .bind(symbol_id)
        .bind(request.operator_id)
        .bind(request.quantity as i64)
        .bind(request.action.as_str())
        .bind(request.instrument.as_str())
        .bind(request.order_kind.as_str())
        .bind(request.limit_price)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::query_error("Failed to create signal", e))?;

        debug!("Created signal {} for symbol {}", id, symbol_id);
        Ok(id)
    }

    async fn update_signal_status(
        &self,
        signal_id: i64,
        status: SignalStatus,
    ) -> Result<(), StoreError> {
        let rows_affected = sqlx::query("UPDATE signals SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(signal_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::query_error("Failed to update signal status", e))?
            .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::Query(format!(
                "Signal not found: {}",
                signal_id
            )));
        }
        Ok(())
    }

    async fn list_active_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let records = sqlx::query_as::<_, AccountRecord>(
            r#"
            SELECT a.id, a.user_id, a.broker, a.api_key, a.api_secret,
                   a.pin, a.is_active, a.last_used_at
            FROM accounts a
            JOIN users u ON u.id = a.user_id
            WHERE a.is_active = 1 AND u.is_active = 1
            ORDER BY a.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::query_error("Failed to list active accounts", e))?;

        Ok(records.into_iter().map(Account::from).collect())
    }

    async fn load_account(&self, account_id: i64) -> Result<Option<Account>, StoreError> {
        let record = sqlx::query_as::<_, AccountRecord>(
            r#"
            SELECT id, user_id, broker, api_key, api_secret, pin, is_active, last_used_at
            FROM accounts
            WHERE id = ?1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::query_error("Failed to load account", e))?;

        Ok(record.map(Account::from))
    }

    async fn touch_account(&self, account_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE accounts SET last_used_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::query_error("Failed to touch account", e))?;
        Ok(())
    }

    async fn load_credentials(&self, account_id: i64) -> Result<Option<Credentials>, StoreError> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            r#"
            SELECT access_token, refresh_token, expires_at, client_id
            FROM credentials
            WHERE account_id = ?1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::query_error("Failed to load credentials", e))?;

        Ok(record.map(Credentials::from))
    }

    async fn save_credentials(
        &self,
        account_id: i64,
        credentials: &Credentials,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (account_id, access_token, refresh_token,
                                     expires_at, client_id, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (account_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                client_id = excluded.client_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id)
        .bind(&credentials.access_token)
        .bind(&credentials.refresh_token)
        .bind(credentials.expires_at)
        .bind(&credentials.client_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_error("Failed to save credentials", e))?;

        debug!("Saved credentials for account {}", account_id);
        Ok(())
    }

    async fn create_order(&self, order: &NewOrder) -> Result<i64, StoreError> {
        // Duplicate (signal_id, account_id) pairs hit the UNIQUE constraint.
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (signal_id, account_id, broker_order_id, status,
                                executed_at, error_message, raw_response, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING id
            "#,
        )
        .bind(order.signal_id)
        .bind(order.account_id)
        .bind(&order.broker_order_id)
        .bind(order.status.as_str())
        .bind(order.executed_at)
        .bind(&order.error_message)
        .bind(&order.raw_response)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::query_error("Failed to create order", e))?;

        Ok(id)
    }

    async fn update_order(&self, order_id: i64, update: &OrderUpdate) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?1,
                executed_at = COALESCE(?2, executed_at),
                error_message = COALESCE(?3, error_message)
            WHERE id = ?4
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.executed_at)
        .bind(&update.error_message)
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_error("Failed to update order", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::Query(format!("Order not found: {}", order_id)));
        }
        Ok(())
    }

    async fn list_orders(&self, selector: &OrderSelector) -> Result<Vec<Order>, StoreError> {
        let mut builder = QueryBuilder::new(format!("SELECT {} FROM orders WHERE ", ORDER_COLUMNS));
        match selector {
            OrderSelector::Orders(ids) => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                builder.push("id IN (");
                let mut separated = builder.separated(", ");
                for id in ids {
                    separated.push_bind(*id);
                }
                separated.push_unseparated(")");
            }
            OrderSelector::Accounts(ids) => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                builder.push("status IN ('pending', 'partially_executed') AND account_id IN (");
                let mut separated = builder.separated(", ");
                for id in ids {
                    separated.push_bind(*id);
                }
                separated.push_unseparated(")");
            }
            OrderSelector::AllPending => {
                builder.push("status IN ('pending', 'partially_executed')");
            }
        }
        builder.push(" ORDER BY id");

        let records: Vec<OrderRecord> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::query_error("Failed to list orders", e))?;

        records.into_iter().map(OrderRecord::into_order).collect()
    }

    async fn append_audit_log(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor_id, action, details, severity, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(entry.details.to_string())
        .bind(entry.severity.as_str())
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_error("Failed to append audit log", e))?;
        Ok(())
    }
}
