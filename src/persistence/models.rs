//! Database row types and their conversions into domain entities.
//!
//! Enum-valued columns are stored as their canonical strings; a row carrying
//! a string outside the vocabulary is a corrupt row and surfaces as a query
//! error rather than being silently coerced.

use crate::domain::entities::account::{Account, Credentials};
use crate::domain::entities::order::{Order, OrderStatus};
use crate::domain::repositories::store::StoreError;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct AccountRecord {
    pub id: i64,
    pub user_id: i64,
    pub broker: String,
    pub api_key: String,
    pub api_secret: String,
    pub pin: Option<String>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<AccountRecord> for Account {
    fn from(record: AccountRecord) -> Self {
        Account {
            id: record.id,
            user_id: record.user_id,
            broker: record.broker,
            api_key: record.api_key,
            api_secret: record.api_secret,
            pin: record.pin,
            is_active: record.is_active,
            last_used_at: record.last_used_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CredentialsRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub client_id: String,
}

impl From<CredentialsRecord> for Credentials {
    fn from(record: CredentialsRecord) -> Self {
        Credentials {
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            expires_at: record.expires_at,
            client_id: record.client_id,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderRecord {
    pub id: i64,
    pub signal_id: i64,
    pub account_id: i64,
    pub broker_order_id: Option<String>,
    pub status: String,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub raw_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn into_order(self) -> Result<Order, StoreError> {
        let status = OrderStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Query(format!(
                "order {} has unknown status '{}'",
                self.id, self.status
            ))
        })?;
        Ok(Order {
            id: self.id,
            signal_id: self.signal_id,
            account_id: self.account_id,
            broker_order_id: self.broker_order_id,
            status,
            executed_at: self.executed_at,
            error_message: self.error_message,
            raw_response: self.raw_response,
            created_at: self.created_at,
        })
    }
}
