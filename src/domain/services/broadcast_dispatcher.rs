//! Fast broadcast: fan one signal out to every eligible account.
//!
//! One task per account so a single slow or hung account never blocks the
//! others, and a deadline on waiting so it never blocks the caller either.
//! The deadline is soft: an order placement already sent to the broker is
//! allowed to complete and persist its row after the caller has returned,
//! because aborting a call the broker may still execute would let local
//! state diverge from broker state.

use crate::domain::entities::account::Account;
use crate::domain::entities::audit::AuditLogEntry;
use crate::domain::entities::order::{NewOrder, OrderStatus};
use crate::domain::entities::signal::{Signal, SignalRequest, SignalStatus};
use crate::domain::repositories::broker_client::BrokerClient;
use crate::domain::repositories::store::Store;
use crate::domain::services::token_manager::TokenManager;
use crate::domain::errors::BroadcastError;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

/// What happened for one account, as observed before the deadline.
#[derive(Debug, Clone, Serialize)]
pub struct AccountOutcome {
    pub account_id: i64,
    pub status: OrderStatus,
    pub broker_order_id: Option<String>,
    pub error: Option<String>,
}

/// Aggregate result of one broadcast.
///
/// `executed_orders` counts orders the broker accepted (status executed or
/// pending) among on-time completions; accounts still in flight at the
/// deadline appear in neither count and settle in the background.
#[derive(Debug, Serialize)]
pub struct BroadcastResult {
    pub signal_id: i64,
    pub total_accounts: usize,
    pub executed_orders: usize,
    pub failed_orders: usize,
    pub execution_time_ms: u64,
    pub accounts: Vec<AccountOutcome>,
}

pub struct BroadcastDispatcher {
    store: Arc<dyn Store>,
    broker: Arc<dyn BrokerClient>,
    tokens: Arc<TokenManager>,
    deadline: Duration,
}

impl BroadcastDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn BrokerClient>,
        tokens: Arc<TokenManager>,
        deadline: Duration,
    ) -> Self {
        BroadcastDispatcher {
            store,
            broker,
            tokens,
            deadline,
        }
    }

    /// Execute one signal against every active account concurrently.
    ///
    /// Only a validation failure or an unrecorded signal aborts the whole
    /// call; every per-account problem is captured as a failed order row and
    /// reported in the aggregate.
    pub async fn broadcast_signal(
        &self,
        request: SignalRequest,
    ) -> Result<BroadcastResult, BroadcastError> {
        request.validate()?;

        let symbol_id = self
            .store
            .find_or_create_symbol(&request.normalized_symbol(), &request.exchange)
            .await
            .map_err(|e| BroadcastError::SignalPersistFailed(e.to_string()))?;
        let signal_id = self
            .store
            .create_signal(&request, symbol_id)
            .await
            .map_err(|e| BroadcastError::SignalPersistFailed(e.to_string()))?;
        let signal = request.into_signal(signal_id, symbol_id);

        let accounts = self.store.list_active_accounts().await?;
        let total_accounts = accounts.len();
        info!(
            signal_id,
            symbol = %signal.symbol,
            accounts = total_accounts,
            "broadcasting signal"
        );

        let issued = AuditLogEntry::new(
            "signal_broadcast",
            json!({
                "signal_id": signal_id,
                "symbol": signal.symbol,
                "action": signal.action.as_str(),
                "quantity": signal.quantity,
                "accounts": total_accounts,
            }),
        )
        .with_actor(signal.operator_id);
        if let Err(e) = self.store.append_audit_log(&issued).await {
            warn!(signal_id, error = %e, "failed to audit broadcast issuance");
        }

        let started = Instant::now();
        let (tx, mut rx) = mpsc::channel(total_accounts.max(1));
        for account in accounts {
            let store = self.store.clone();
            let broker = self.broker.clone();
            let tokens = self.tokens.clone();
            let signal = signal.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = execute_for_account(store, broker, tokens, &signal, &account).await;
                // Receiver may be gone if the deadline already passed; the
                // order row is persisted either way.
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let deadline = started + self.deadline;
        let mut outcomes: Vec<AccountOutcome> = Vec::with_capacity(total_accounts);
        while outcomes.len() < total_accounts {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        signal_id,
                        outstanding = total_accounts - outcomes.len(),
                        "broadcast deadline reached; remaining placements settle in the background"
                    );
                    break;
                }
            }
        }

        let executed_orders = outcomes
            .iter()
            .filter(|o| matches!(o.status, OrderStatus::Executed | OrderStatus::Pending))
            .count();
        let failed_orders = outcomes
            .iter()
            .filter(|o| o.status == OrderStatus::Failed)
            .count();
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let derived = if executed_orders > 0 {
            Some(SignalStatus::Executed)
        } else if total_accounts > 0 && failed_orders == total_accounts {
            Some(SignalStatus::Failed)
        } else {
            None
        };
        if let Some(status) = derived {
            if let Err(e) = self.store.update_signal_status(signal_id, status).await {
                warn!(signal_id, error = %e, "failed to update derived signal status");
            }
        }

        info!(
            signal_id,
            executed_orders, failed_orders, execution_time_ms, "broadcast complete"
        );
        Ok(BroadcastResult {
            signal_id,
            total_accounts,
            executed_orders,
            failed_orders,
            execution_time_ms,
            accounts: outcomes,
        })
    }
}

/// One account's unit of work: credential check, order placement, then the
/// single order row for this (signal, account) pair. Steps are strictly
/// sequential; no retries are issued because a broker-side duplicate is
/// worse than a missed order.
async fn execute_for_account(
    store: Arc<dyn Store>,
    broker: Arc<dyn BrokerClient>,
    tokens: Arc<TokenManager>,
    signal: &Signal,
    account: &Account,
) -> AccountOutcome {
    let credentials = match tokens.ensure_valid(account).await {
        Ok(credentials) => credentials,
        Err(e) => {
            // Do not contact the broker without usable credentials.
            return record_failure(&*store, signal, account, e.to_string()).await;
        }
    };

    match broker.place_order(&credentials, account, signal).await {
        Ok(ack) => {
            // A 2xx acknowledgement can still carry a rejection in its
            // body; map it with the same vocabulary the reconciler uses.
            let (status, executed_at, error_message) =
                match OrderStatus::from_broker(&ack.status) {
                    OrderStatus::Executed => (OrderStatus::Executed, Some(Utc::now()), None),
                    OrderStatus::Failed => (
                        OrderStatus::Failed,
                        None,
                        Some(format!("broker rejected order: {}", ack.status)),
                    ),
                    // Accepted but not yet confirmed filled; reconciliation
                    // settles it later.
                    _ => (OrderStatus::Pending, None, None),
                };
            let order = NewOrder {
                signal_id: signal.id,
                account_id: account.id,
                broker_order_id: Some(ack.broker_order_id.clone()),
                status,
                executed_at,
                error_message: error_message.clone(),
                raw_response: Some(ack.raw.to_string()),
            };
            if let Err(e) = store.create_order(&order).await {
                error!(
                    signal_id = signal.id,
                    account_id = account.id,
                    error = %e,
                    "order accepted by broker but the local record failed"
                );
                return AccountOutcome {
                    account_id: account.id,
                    status: OrderStatus::Failed,
                    broker_order_id: Some(ack.broker_order_id),
                    error: Some(format!("order accepted but not recorded: {}", e)),
                };
            }
            if let Err(e) = store.touch_account(account.id).await {
                warn!(account_id = account.id, error = %e, "failed to update last-used timestamp");
            }
            AccountOutcome {
                account_id: account.id,
                status,
                broker_order_id: Some(ack.broker_order_id),
                error: error_message,
            }
        }
        Err(e) => record_failure(&*store, signal, account, e.to_string()).await,
    }
}

async fn record_failure(
    store: &dyn Store,
    signal: &Signal,
    account: &Account,
    message: String,
) -> AccountOutcome {
    let order = NewOrder::failed(signal.id, account.id, message.clone());
    if let Err(e) = store.create_order(&order).await {
        error!(
            signal_id = signal.id,
            account_id = account.id,
            error = %e,
            "failed to persist failed-order record"
        );
    }
    AccountOutcome {
        account_id: account.id,
        status: OrderStatus::Failed,
        broker_order_id: None,
        error: Some(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::signal::{InstrumentKind, OrderKind, SignalAction};
    use crate::domain::services::fakes::{
        account, fresh_credentials, stale_credentials, FakeBroker, MemoryStore, PlaceOutcome,
    };
    use std::sync::atomic::Ordering;

    fn dispatcher(
        deadline: Duration,
    ) -> (Arc<MemoryStore>, Arc<FakeBroker>, BroadcastDispatcher) {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(FakeBroker::new());
        let tokens = Arc::new(TokenManager::new(store.clone(), broker.clone()));
        let dispatcher =
            BroadcastDispatcher::new(store.clone(), broker.clone(), tokens, deadline);
        (store, broker, dispatcher)
    }

    fn market_buy(quantity: u32) -> SignalRequest {
        SignalRequest {
            operator_id: 7,
            symbol: "RELIANCE".to_string(),
            exchange: "NSE".to_string(),
            quantity,
            action: SignalAction::Buy,
            instrument: InstrumentKind::Intraday,
            order_kind: OrderKind::Market,
            limit_price: None,
        }
    }

    #[tokio::test]
    async fn test_invalid_limit_price_rejected_before_fanout() {
        let (store, broker, dispatcher) = dispatcher(Duration::from_secs(2));
        store.add_account(account(1));
        store.set_credentials(1, fresh_credentials(1));

        let mut request = market_buy(10);
        request.order_kind = OrderKind::Limit;
        request.limit_price = Some(0.0);

        let err = dispatcher.broadcast_signal(request).await.unwrap_err();
        assert!(matches!(err, BroadcastError::InvalidSignal(_)));
        // Validation precedes fan-out: no signal, no orders, no broker call.
        assert!(store.orders_snapshot().is_empty());
        assert!(store.signals.lock().unwrap().is_empty());
        assert_eq!(broker.place_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_signal_persist_failure_aborts_broadcast() {
        let (store, broker, dispatcher) = dispatcher(Duration::from_secs(2));
        store.add_account(account(1));
        store.set_credentials(1, fresh_credentials(1));
        store.fail_signal_insert.store(true, Ordering::SeqCst);

        let err = dispatcher.broadcast_signal(market_buy(10)).await.unwrap_err();
        assert!(matches!(err, BroadcastError::SignalPersistFailed(_)));
        assert!(store.orders_snapshot().is_empty());
        assert_eq!(broker.place_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_account_partial_failure_scenario() {
        let (store, broker, dispatcher) = dispatcher(Duration::from_secs(2));
        // A: valid credentials, broker accepts.
        store.add_account(account(1));
        store.set_credentials(1, fresh_credentials(1));
        // B: expired credentials and the refresh fails.
        store.add_account(account(2));
        store.set_credentials(2, stale_credentials(2));
        broker.fail_refresh(2);
        // C: broker call resolves only after the deadline.
        store.add_account(account(3));
        store.set_credentials(3, fresh_credentials(3));
        broker.set_place_outcome(
            3,
            PlaceOutcome::Delayed {
                delay: Duration::from_secs(10),
                status: "complete".to_string(),
            },
        );

        let result = dispatcher.broadcast_signal(market_buy(10)).await.unwrap();
        assert_eq!(result.total_accounts, 3);
        assert_eq!(result.executed_orders, 1);
        assert_eq!(result.failed_orders, 1);
        assert!(result.execution_time_ms >= 2_000);
        assert_eq!(result.accounts.len(), 2);

        let a = result
            .accounts
            .iter()
            .find(|o| o.account_id == 1)
            .unwrap();
        assert_eq!(a.status, OrderStatus::Pending);
        assert!(a.broker_order_id.is_some());
        let b = result
            .accounts
            .iter()
            .find(|o| o.account_id == 2)
            .unwrap();
        assert_eq!(b.status, OrderStatus::Failed);
        assert!(b.error.as_ref().unwrap().contains("authentication"));

        // C is still in flight: two order rows so far.
        assert_eq!(store.orders_snapshot().len(), 2);

        // Let the straggler resolve; its order row is written exactly once.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let orders = store.orders_snapshot();
        assert_eq!(orders.len(), 3);
        let c = orders.iter().find(|o| o.account_id == 3).unwrap();
        assert_eq!(c.status, OrderStatus::Executed);
        assert!(c.executed_at.is_some());

        // Exactly one order per (signal, account).
        for id in 1..=3 {
            assert_eq!(
                orders.iter().filter(|o| o.account_id == id).count(),
                1,
                "account {} must have exactly one order",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_broker_rejection_is_isolated_per_account() {
        let (store, broker, dispatcher) = dispatcher(Duration::from_secs(2));
        store.add_account(account(1));
        store.set_credentials(1, fresh_credentials(1));
        store.add_account(account(2));
        store.set_credentials(2, fresh_credentials(2));
        broker.set_place_outcome(2, PlaceOutcome::Reject("margin exceeded".to_string()));

        let result = dispatcher.broadcast_signal(market_buy(5)).await.unwrap();
        assert_eq!(result.executed_orders, 1);
        assert_eq!(result.failed_orders, 1);
        assert_eq!(
            result.total_accounts,
            result.executed_orders + result.failed_orders
        );

        let orders = store.orders_snapshot();
        assert_eq!(orders.len(), 2);
        let rejected = orders.iter().find(|o| o.account_id == 2).unwrap();
        assert_eq!(rejected.status, OrderStatus::Failed);
        assert!(rejected
            .error_message
            .as_ref()
            .unwrap()
            .contains("margin exceeded"));
        // One on-time success marks the signal executed.
        assert_eq!(
            store.signal_status(result.signal_id),
            Some(SignalStatus::Executed)
        );
    }

    #[tokio::test]
    async fn test_rejection_in_accepted_ack_body_records_failure() {
        let (store, broker, dispatcher) = dispatcher(Duration::from_secs(2));
        store.add_account(account(1));
        store.set_credentials(1, fresh_credentials(1));
        // Transport-level success whose body still carries a rejection.
        broker.set_place_outcome(
            1,
            PlaceOutcome::Accept {
                status: "rejected by exchange".to_string(),
            },
        );

        let result = dispatcher.broadcast_signal(market_buy(1)).await.unwrap();
        assert_eq!(result.executed_orders, 0);
        assert_eq!(result.failed_orders, 1);

        let orders = store.orders_snapshot();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Failed);
        assert!(orders[0]
            .error_message
            .as_ref()
            .unwrap()
            .contains("rejected by exchange"));
        // The broker did assign an id; keep it for diagnostics.
        assert!(orders[0].broker_order_id.is_some());
        assert_eq!(
            store.signal_status(result.signal_id),
            Some(SignalStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_all_accounts_failing_marks_signal_failed() {
        let (store, broker, dispatcher) = dispatcher(Duration::from_secs(2));
        for id in [1, 2] {
            store.add_account(account(id));
            store.set_credentials(id, stale_credentials(id));
            broker.fail_refresh(id);
        }

        let result = dispatcher.broadcast_signal(market_buy(1)).await.unwrap();
        assert_eq!(result.executed_orders, 0);
        assert_eq!(result.failed_orders, 2);
        assert_eq!(
            store.signal_status(result.signal_id),
            Some(SignalStatus::Failed)
        );
        // Token failures never reach the broker.
        assert_eq!(broker.place_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_active_accounts() {
        let (store, _broker, dispatcher) = dispatcher(Duration::from_secs(2));
        let mut inactive = account(1);
        inactive.is_active = false;
        store.add_account(inactive);

        let result = dispatcher.broadcast_signal(market_buy(1)).await.unwrap();
        assert_eq!(result.total_accounts, 0);
        assert_eq!(result.executed_orders, 0);
        assert_eq!(result.failed_orders, 0);
        assert!(result.accounts.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_issuance_is_audited() {
        let (store, _broker, dispatcher) = dispatcher(Duration::from_secs(2));
        store.add_account(account(1));
        store.set_credentials(1, fresh_credentials(1));

        let _ = dispatcher.broadcast_signal(market_buy(10)).await.unwrap();
        let audit = store.audit.lock().unwrap();
        assert!(audit.iter().any(|e| e.action == "signal_broadcast"));
        assert_eq!(audit[0].actor_id, Some(7));
    }
}
