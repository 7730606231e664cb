//! Runtime configuration, loaded from environment variables with sane
//! defaults. `.env` files are honored via dotenvy in main.

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// SQLite database URL.
    pub database_url: String,

    /// Connection pool size.
    pub database_max_connections: u32,

    /// Soft deadline for collecting broadcast outcomes. In-flight orders
    /// past the deadline still settle in the background.
    pub broadcast_deadline: Duration,

    /// Worker-pool limit for batch token refresh.
    pub refresh_worker_limit: usize,

    /// Interval of the scheduled background token refresh. Defaults to
    /// twice daily.
    pub token_refresh_interval: Duration,

    /// Broker API base URL.
    pub broker_api_base: String,

    /// Broker identifier.
    pub broker_name: String,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().unwrap(),
            database_url: "sqlite://data/signal_relay.db".to_string(),
            database_max_connections: 5,
            broadcast_deadline: Duration::from_millis(2000),
            refresh_worker_limit: 8,
            token_refresh_interval: Duration::from_secs(43_200),
            broker_api_base: "https://apiconnect.angelone.in".to_string(),
            broker_name: "angelone".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parsed("BIND_ADDR", defaults.bind_addr),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: env_parsed(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            broadcast_deadline: Duration::from_millis(env_parsed(
                "BROADCAST_DEADLINE_MS",
                defaults.broadcast_deadline.as_millis() as u64,
            )),
            refresh_worker_limit: env_parsed(
                "TOKEN_REFRESH_WORKERS",
                defaults.refresh_worker_limit,
            ),
            token_refresh_interval: Duration::from_secs(env_parsed(
                "TOKEN_REFRESH_INTERVAL_SECS",
                defaults.token_refresh_interval.as_secs(),
            )),
            broker_api_base: std::env::var("BROKER_API_BASE").unwrap_or(defaults.broker_api_base),
            broker_name: std::env::var("BROKER_NAME").unwrap_or(defaults.broker_name),
        }
    }
}
