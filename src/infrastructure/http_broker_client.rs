//! # HTTP Broker Client
//!
//! reqwest-based implementation of the broker client seam against a REST
//! brokerage API.
//!
//! ## Authentication
//!
//! Order placement and order-book reads carry the account's bearer token.
//! Token refresh additionally signs the request with a SHA-256 checksum of
//! api_key + refresh_token + api_secret, so a leaked refresh token alone
//! cannot mint new access tokens.

use crate::domain::entities::account::{Account, Credentials};
use crate::domain::entities::signal::Signal;
use crate::domain::errors::BrokerError;
use crate::domain::repositories::broker_client::{BookEntry, BrokerClient, OrderAck, TokenGrant};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

/// HTTP broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker identifier, matched against `Account::broker`.
    pub name: String,
    pub api_base: String,
    /// Per-request timeout. The dispatcher's soft deadline is enforced
    /// separately; this only bounds a single hung connection.
    pub request_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: "angelone".to_string(),
            api_base: "https://apiconnect.angelone.in".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpBrokerClient {
    client: Client,
    config: BrokerConfig,
}

#[derive(Debug, Serialize)]
struct PlaceOrderRequest<'a> {
    symbol: &'a str,
    exchange: &'a str,
    transaction_type: &'a str,
    quantity: u32,
    product_type: &'a str,
    order_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    order_id: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
    checksum: String,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    access_token: String,
    refresh_token: String,
    /// Lifetime in seconds; absent means the broker did not state one and
    /// the token is treated as immediately stale.
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OrderBookResponse {
    orders: Vec<OrderBookRow>,
}

#[derive(Debug, Deserialize)]
struct OrderBookRow {
    order_id: String,
    status: String,
}

impl HttpBrokerClient {
    pub fn new(config: BrokerConfig) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .user_agent(concat!("signal-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BrokerError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    /// SHA-256 over api_key + refresh_token + api_secret, hex-encoded.
    pub fn refresh_checksum(api_key: &str, refresh_token: &str, api_secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        hasher.update(refresh_token.as_bytes());
        hasher.update(api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn check_status(response: Response) -> Result<Response, BrokerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, body)
        };
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BrokerError::Auth(message)),
            s if s.is_client_error() => Err(BrokerError::Rejected(message)),
            _ => Err(BrokerError::Unavailable(message)),
        }
    }
}

fn transport_error(e: reqwest::Error) -> BrokerError {
    BrokerError::Unavailable(e.to_string())
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn place_order(
        &self,
        credentials: &Credentials,
        account: &Account,
        signal: &Signal,
    ) -> Result<OrderAck, BrokerError> {
        let request = PlaceOrderRequest {
            symbol: &signal.symbol,
            exchange: &signal.exchange,
            transaction_type: signal.action.as_str(),
            quantity: signal.quantity,
            product_type: signal.instrument.as_str(),
            order_type: signal.order_kind.as_str(),
            price: signal.limit_price,
        };
        debug!(
            account_id = account.id,
            symbol = %signal.symbol,
            "placing order"
        );

        let response = self
            .client
            .post(self.url("/orders"))
            .bearer_auth(&credentials.access_token)
            .header("X-Api-Key", &account.api_key)
            .header("X-Client-Id", &credentials.client_id)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::check_status(response).await?;

        let raw: serde_json::Value = response.json().await.map_err(transport_error)?;
        let parsed: PlaceOrderResponse = serde_json::from_value(raw.clone())
            .map_err(|e| BrokerError::Rejected(format!("malformed order response: {}", e)))?;
        Ok(OrderAck {
            broker_order_id: parsed.order_id,
            status: parsed.status,
            raw,
        })
    }

    async fn refresh_token(
        &self,
        account: &Account,
        credentials: &Credentials,
    ) -> Result<TokenGrant, BrokerError> {
        let request = RefreshTokenRequest {
            refresh_token: &credentials.refresh_token,
            checksum: Self::refresh_checksum(
                &account.api_key,
                &credentials.refresh_token,
                &account.api_secret,
            ),
        };

        let response = self
            .client
            .post(self.url("/tokens/refresh"))
            .header("X-Api-Key", &account.api_key)
            .header("X-Client-Id", &credentials.client_id)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::check_status(response).await?;

        let parsed: RefreshTokenResponse = response.json().await.map_err(transport_error)?;
        Ok(TokenGrant {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_at: parsed
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }

    async fn get_order_book(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<BookEntry>, BrokerError> {
        let response = self
            .client
            .get(self.url("/orders/book"))
            .bearer_auth(&credentials.access_token)
            .header("X-Client-Id", &credentials.client_id)
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::check_status(response).await?;

        let parsed: OrderBookResponse = response.json().await.map_err(transport_error)?;
        Ok(parsed
            .orders
            .into_iter()
            .map(|row| BookEntry {
                broker_order_id: row.order_id,
                status: row.status,
            })
            .collect())
    }
}
