//! Error taxonomy for the broadcast engine.
//!
//! Only `BroadcastError` ever crosses the dispatcher boundary as a hard
//! failure; per-account problems during fan-out are captured as failed order
//! rows and per-account result data, never as propagated errors. The caller
//! needs "38 of 40 accounts succeeded", not an all-or-nothing exception.

use crate::domain::repositories::store::StoreError;
use thiserror::Error;

/// Credential lifecycle errors, per account.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The account was never authenticated; the caller must surface an
    /// "authenticate first" condition instead of retrying.
    #[error("account {0} has no stored credentials; authenticate first")]
    NoCredentials(i64),

    /// The broker rejected the refresh or the call failed in transit. The
    /// previously stored credentials are left untouched.
    #[error("token refresh failed for account {account_id}: {reason}")]
    RefreshFailed { account_id: i64, reason: String },

    #[error("credential store error for account {account_id}: {source}")]
    Store {
        account_id: i64,
        #[source]
        source: StoreError,
    },
}

/// Hard failures of a whole broadcast. Everything else is per-account data.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// Rejected before fan-out; no signal row and no order rows exist.
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    /// The broadcast intent could not be durably recorded, so no order can
    /// reference it. Aborts the whole operation.
    #[error("failed to persist signal: {0}")]
    SignalPersistFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the remote broker seam.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Transient transport failure or broker 5xx. Treated like a rejection
    /// for the current attempt; never retried within one broadcast because
    /// a duplicate submission is worse than a missed order.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker understood and refused the request.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// The broker refused the credentials themselves.
    #[error("broker authentication failed: {0}")]
    Auth(String),
}
