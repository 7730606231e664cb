//! Batch token validation and refresh across many accounts.
//!
//! Classification is a cheap local check against stored expiries; the
//! refresh pass fans [`TokenManager::ensure_valid`] out concurrently with a
//! worker-pool limit so a large account base cannot saturate the broker's
//! rate limits. Refresh failures are data, not control flow: partial success
//! is the expected case and must never abort the batch.

use crate::domain::entities::account::{Account, Credentials};
use crate::domain::repositories::store::{Store, StoreError};
use crate::domain::services::token_manager::TokenManager;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Local classification of a set of accounts' stored credentials.
#[derive(Debug, Default)]
pub struct TokenValidationReport {
    /// Accounts whose stored token is present and outside the staleness
    /// window.
    pub valid: HashMap<i64, Credentials>,
    /// Accounts that need a refresh: token absent or stale. Absence counts
    /// as expired for refresh purposes.
    pub expired: Vec<Account>,
    /// Accounts whose credential row could not even be read.
    pub errors: HashMap<i64, String>,
}

pub struct BatchTokenManager {
    store: Arc<dyn Store>,
    tokens: Arc<TokenManager>,
    worker_limit: usize,
}

impl BatchTokenManager {
    pub fn new(store: Arc<dyn Store>, tokens: Arc<TokenManager>, worker_limit: usize) -> Self {
        BatchTokenManager {
            store,
            tokens,
            worker_limit: worker_limit.max(1),
        }
    }

    /// Active accounts whose credentials are absent or within the staleness
    /// window.
    pub async fn accounts_needing_refresh(&self) -> Result<Vec<Account>, StoreError> {
        let accounts = self.store.list_active_accounts().await?;
        let mut needing = Vec::new();
        for account in accounts {
            match self.store.load_credentials(account.id).await? {
                Some(credentials) if !credentials.is_stale() => {}
                _ => needing.push(account),
            }
        }
        Ok(needing)
    }

    /// Partition accounts by stored-token validity. Pure classification: one
    /// credential read per account, no network calls, no writes.
    pub async fn validate_tokens(&self, accounts: &[Account]) -> TokenValidationReport {
        let mut report = TokenValidationReport::default();
        for account in accounts {
            match self.store.load_credentials(account.id).await {
                Ok(Some(credentials)) if !credentials.is_stale() => {
                    report.valid.insert(account.id, credentials);
                }
                Ok(_) => report.expired.push(account.clone()),
                Err(e) => {
                    report.errors.insert(account.id, e.to_string());
                }
            }
        }
        report
    }

    /// Refresh the given accounts concurrently, bounded by the worker limit.
    ///
    /// Returns only the successes; accounts whose refresh failed are absent
    /// from the map and logged.
    pub async fn refresh_expired(&self, accounts: &[Account]) -> HashMap<i64, Credentials> {
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let tasks = accounts.iter().cloned().map(|account| {
            let tokens = self.tokens.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match tokens.ensure_valid(&account).await {
                    Ok(credentials) => Some((account.id, credentials)),
                    Err(e) => {
                        warn!(account_id = account.id, error = %e, "token refresh failed");
                        None
                    }
                }
            }
        });

        let refreshed: HashMap<i64, Credentials> =
            join_all(tasks).await.into_iter().flatten().collect();
        debug!(
            requested = accounts.len(),
            refreshed = refreshed.len(),
            "batch token refresh complete"
        );
        refreshed
    }
}
