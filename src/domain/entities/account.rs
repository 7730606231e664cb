//! Brokerage account and its authentication material.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One brokerage account under one user.
///
/// Broadcast only ever reads active accounts; the account row itself is
/// mutated by toggling `is_active` and by the token refresh flow updating
/// `last_used_at`.
#[derive(Clone)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    /// Broker identifier (e.g. "angelone", "zerodha").
    pub broker: String,
    pub api_key: String,
    pub api_secret: String,
    pub pin: Option<String>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("broker", &self.broker)
            .field("api_key", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}

/// Access/refresh token pair tied 1:1 to an [`Account`].
///
/// Created on first successful authentication and mutated only by the token
/// refresh flow. A token without an expiry is treated as indefinitely stale
/// and must be refreshed before use. Token strings are wiped from memory
/// when a value (or any clone of it) is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    #[zeroize(skip)]
    pub expires_at: Option<DateTime<Utc>>,
    #[zeroize(skip)]
    pub client_id: String,
}

impl Credentials {
    /// Clock-skew tolerance: a token is treated as expired this long before
    /// its stated expiry.
    pub const EXPIRY_SKEW_MINUTES: i64 = 5;

    /// Whether the token must be refreshed before use, evaluated at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => now + Duration::minutes(Self::EXPIRY_SKEW_MINUTES) >= expires_at,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("client_id", &self.client_id)
            .finish()
    }
}
