//! Per-account credential lifecycle.
//!
//! Owns the refresh decision for a single account: load the stored token,
//! decide whether it is usable, and exchange the refresh token with the
//! broker when it is not. Safe to call concurrently for different accounts;
//! for the same account a per-account lock guarantees at most one in-flight
//! refresh, with later callers reusing the first caller's result instead of
//! issuing a second broker call.

use crate::domain::entities::account::{Account, Credentials};
use crate::domain::errors::TokenError;
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::repositories::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct TokenManager {
    store: Arc<dyn Store>,
    broker: Arc<dyn BrokerClient>,
    refresh_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn Store>, broker: Arc<dyn BrokerClient>) -> Self {
        TokenManager {
            store,
            broker,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn refresh_lock(&self, account_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return usable credentials for the account, refreshing through the
    /// broker if the stored token is stale.
    ///
    /// Exactly one persistence write happens per successful refresh; a
    /// read-only hit or a failed refresh writes nothing, so a failed attempt
    /// never overwrites the last good state.
    pub async fn ensure_valid(&self, account: &Account) -> Result<Credentials, TokenError> {
        let lock = self.refresh_lock(account.id).await;
        // Single-flight: concurrent callers for the same account queue here.
        // Whoever enters second re-reads the store and finds the token the
        // first caller just refreshed.
        let _guard = lock.lock().await;

        let stored = self
            .store
            .load_credentials(account.id)
            .await
            .map_err(|source| TokenError::Store {
                account_id: account.id,
                source,
            })?;
        let Some(credentials) = stored else {
            return Err(TokenError::NoCredentials(account.id));
        };
        if !credentials.is_stale() {
            return Ok(credentials);
        }

        debug!(account_id = account.id, "access token stale, refreshing");
        let grant = self
            .broker
            .refresh_token(account, &credentials)
            .await
            .map_err(|e| TokenError::RefreshFailed {
                account_id: account.id,
                reason: e.to_string(),
            })?;

        let refreshed = Credentials {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_at,
            client_id: credentials.client_id.clone(),
        };
        self.store
            .save_credentials(account.id, &refreshed)
            .await
            .map_err(|source| TokenError::Store {
                account_id: account.id,
                source,
            })?;
        info!(account_id = account.id, "refreshed broker access token");
        Ok(refreshed)
    }

    /// Variant for ad-hoc callers that only hold an account id.
    pub async fn ensure_valid_for(&self, account_id: i64) -> Result<Credentials, TokenError> {
        let account = self
            .store
            .load_account(account_id)
            .await
            .map_err(|source| TokenError::Store { account_id, source })?
            .ok_or(TokenError::NoCredentials(account_id))?;
        self.ensure_valid(&account).await
    }
}
