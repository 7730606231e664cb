use signal_relay::application::{router, AppState};
use signal_relay::config::AppConfig;
use signal_relay::domain::services::batch_token_manager::BatchTokenManager;
use signal_relay::domain::services::broadcast_dispatcher::BroadcastDispatcher;
use signal_relay::domain::services::order_reconciler::OrderStatusReconciler;
use signal_relay::domain::services::token_manager::TokenManager;
use signal_relay::infrastructure::http_broker_client::{BrokerConfig, HttpBrokerClient};
use signal_relay::persistence::{init_database, repository::SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!(
        deadline_ms = config.broadcast_deadline.as_millis() as u64,
        workers = config.refresh_worker_limit,
        broker = %config.broker_name,
        "Signal relay starting"
    );

    let pool = init_database(&config.database_url, config.database_max_connections).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let broker = Arc::new(HttpBrokerClient::new(BrokerConfig {
        name: config.broker_name.clone(),
        api_base: config.broker_api_base.clone(),
        request_timeout: Duration::from_secs(10),
    })?);

    let tokens = Arc::new(TokenManager::new(store.clone(), broker.clone()));
    let dispatcher = Arc::new(BroadcastDispatcher::new(
        store.clone(),
        broker.clone(),
        tokens.clone(),
        config.broadcast_deadline,
    ));
    let reconciler = Arc::new(OrderStatusReconciler::new(
        store.clone(),
        broker.clone(),
        tokens.clone(),
    ));
    let batch_tokens = Arc::new(BatchTokenManager::new(
        store.clone(),
        tokens.clone(),
        config.refresh_worker_limit,
    ));

    // Scheduled token maintenance. The services hold no clock state; the
    // schedule lives entirely out here.
    let refresh_interval = config.token_refresh_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            match batch_tokens.accounts_needing_refresh().await {
                Ok(accounts) if accounts.is_empty() => {
                    info!("scheduled token refresh: nothing to do");
                }
                Ok(accounts) => {
                    info!(accounts = accounts.len(), "scheduled token refresh starting");
                    let refreshed = batch_tokens.refresh_expired(&accounts).await;
                    info!(
                        requested = accounts.len(),
                        refreshed = refreshed.len(),
                        "scheduled token refresh finished"
                    );
                }
                Err(e) => error!(error = %e, "scheduled token refresh could not list accounts"),
            }
        }
    });

    let app = router(AppState {
        dispatcher,
        reconciler,
        tokens,
    });

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    server.with_graceful_shutdown(shutdown_signal).await?;
    info!("Shutdown complete");
    Ok(())
}
