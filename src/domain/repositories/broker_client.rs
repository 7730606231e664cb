//! Broker Client Trait
//!
//! Thin remote-call abstraction over the brokerage API. Calls may be slow or
//! fail; the engine's job is to use them safely under concurrency and time
//! pressure. The trait keeps the dispatcher independent of the wire protocol
//! and lets tests script broker behavior per account.

use crate::domain::entities::account::{Account, Credentials};
use crate::domain::entities::signal::Signal;
use crate::domain::errors::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The broker's immediate acknowledgement of an order placement.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub broker_order_id: String,
    /// Raw broker status string from the synchronous response.
    pub status: String,
    /// Full response body, kept for diagnostics.
    pub raw: serde_json::Value,
}

/// A freshly issued token pair.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One row of the broker's order book.
#[derive(Debug, Clone)]
pub struct BookEntry {
    pub broker_order_id: String,
    /// Raw broker status vocabulary, mapped later onto canonical status.
    pub status: String,
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn name(&self) -> &str;

    /// Place one order on behalf of `account`. An `Ok` means the broker
    /// accepted the request; rejections come back as [`BrokerError`].
    async fn place_order(
        &self,
        credentials: &Credentials,
        account: &Account,
        signal: &Signal,
    ) -> Result<OrderAck, BrokerError>;

    /// Exchange a refresh token for a new token pair.
    async fn refresh_token(
        &self,
        account: &Account,
        credentials: &Credentials,
    ) -> Result<TokenGrant, BrokerError>;

    /// Fetch the account's full order book in one call.
    async fn get_order_book(&self, credentials: &Credentials)
        -> Result<Vec<BookEntry>, BrokerError>;
}
