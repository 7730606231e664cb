//! Broadcast signal entity and the operator request that creates it.

use crate::domain::errors::BroadcastError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(SignalAction::Buy),
            "SELL" => Some(SignalAction::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Product type the order is placed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentKind {
    Intraday,
    Delivery,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Intraday => "INTRADAY",
            InstrumentKind::Delivery => "DELIVERY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INTRADAY" => Some(InstrumentKind::Intraday),
            "DELIVERY" => Some(InstrumentKind::Delivery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    Limit,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit => "LIMIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(OrderKind::Market),
            "LIMIT" => Some(OrderKind::Limit),
            _ => None,
        }
    }
}

/// Derived overall status of a broadcast signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Pending,
    Executed,
    Failed,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Executed => "executed",
            SignalStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SignalStatus::Pending),
            "executed" => Some(SignalStatus::Executed),
            "failed" => Some(SignalStatus::Failed),
            _ => None,
        }
    }
}

/// One broadcast trading instruction, immutable once persisted except for
/// the derived `status`.
#[derive(Debug, Clone)]
pub struct Signal {
    pub id: i64,
    pub symbol_id: i64,
    pub operator_id: i64,
    pub symbol: String,
    pub exchange: String,
    pub quantity: u32,
    pub action: SignalAction,
    pub instrument: InstrumentKind,
    pub order_kind: OrderKind,
    pub limit_price: Option<f64>,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
}

/// Operator request to broadcast a signal. Validated before any account is
/// contacted; an invalid request creates no signal and no order rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    pub operator_id: i64,
    pub symbol: String,
    pub exchange: String,
    pub quantity: u32,
    pub action: SignalAction,
    pub instrument: InstrumentKind,
    pub order_kind: OrderKind,
    #[serde(default)]
    pub limit_price: Option<f64>,
}

impl SignalRequest {
    pub fn validate(&self) -> Result<(), BroadcastError> {
        if self.symbol.trim().is_empty() {
            return Err(BroadcastError::InvalidSignal(
                "symbol must not be empty".to_string(),
            ));
        }
        if self.quantity == 0 {
            return Err(BroadcastError::InvalidSignal(
                "quantity must be a positive integer".to_string(),
            ));
        }
        match self.order_kind {
            OrderKind::Limit => match self.limit_price {
                Some(price) if price > 0.0 => {}
                _ => {
                    return Err(BroadcastError::InvalidSignal(
                        "limit orders require a positive limit price".to_string(),
                    ))
                }
            },
            OrderKind::Market => {
                if self.limit_price.is_some() {
                    return Err(BroadcastError::InvalidSignal(
                        "market orders must not carry a limit price".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Symbol normalized for find-or-create lookup.
    pub fn normalized_symbol(&self) -> String {
        self.symbol.trim().to_uppercase()
    }

    /// Materialize the signal entity once the store has assigned ids.
    pub fn into_signal(self, id: i64, symbol_id: i64) -> Signal {
        let symbol = self.normalized_symbol();
        Signal {
            id,
            symbol_id,
            operator_id: self.operator_id,
            symbol,
            exchange: self.exchange,
            quantity: self.quantity,
            action: self.action,
            instrument: self.instrument,
            order_kind: self.order_kind,
            limit_price: self.limit_price,
            status: SignalStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
