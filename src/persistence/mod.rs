//! Persistence Layer
//!
//! SQLite storage for accounts, credentials, signals, orders, and the audit
//! log, with async access via sqlx. Migrations are idempotent and run on
//! every startup.
//!
//! # Database Schema
//!
//! ## Accounts Table
//! One brokerage account per row, owned by a user. Credentials live in a
//! separate table so token rotation never rewrites account rows.
//!
//! ## Orders Table
//! One row per (signal, account) pair, enforced by a UNIQUE constraint; a
//! broadcast can never submit twice for the same account.
//!
//! ## Audit Log Table
//! Append-only record of broadcasts and order status transitions.

pub mod models;
pub mod repository;

use crate::domain::repositories::store::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Initialize the database connection pool and run migrations.
///
/// `database_url` is a SQLite URL such as "sqlite://data/signal_relay.db";
/// tests use "sqlite::memory:" with a single connection.
pub async fn init_database(database_url: &str, max_connections: u32) -> Result<DbPool, StoreError> {
    info!("Initializing database: {}", database_url);

    // Ensure data directory exists
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Connection(e.to_string()))?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StoreError::Connection(e.to_string()))?
        .create_if_missing(true)
        .log_statements(tracing::log::LevelFilter::Debug);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;

    run_migrations(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create users table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            broker TEXT NOT NULL,
            api_key TEXT NOT NULL,
            api_secret TEXT NOT NULL,
            pin TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_used_at DATETIME,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create accounts table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            account_id INTEGER PRIMARY KEY,
            access_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            expires_at DATETIME,
            client_id TEXT NOT NULL,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create credentials table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS symbols (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            exchange TEXT NOT NULL,
            UNIQUE (symbol, exchange)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create symbols table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol_id INTEGER NOT NULL,
            operator_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL,
            action TEXT NOT NULL CHECK(action IN ('BUY', 'SELL')),
            instrument TEXT NOT NULL CHECK(instrument IN ('INTRADAY', 'DELIVERY')),
            order_kind TEXT NOT NULL CHECK(order_kind IN ('MARKET', 'LIMIT')),
            limit_price REAL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'executed', 'failed')),
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (symbol_id) REFERENCES symbols(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create signals table: {}", e)))?;

    // UNIQUE (signal_id, account_id) is the one-order-per-account guarantee.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            signal_id INTEGER NOT NULL,
            account_id INTEGER NOT NULL,
            broker_order_id TEXT,
            status TEXT NOT NULL
                CHECK(status IN ('pending', 'executed', 'partially_executed', 'failed', 'cancelled')),
            executed_at DATETIME,
            error_message TEXT,
            raw_response TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (signal_id, account_id),
            FOREIGN KEY (signal_id) REFERENCES signals(id),
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create orders table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            actor_id INTEGER,
            action TEXT NOT NULL,
            details TEXT NOT NULL,
            severity TEXT NOT NULL DEFAULT 'info',
            timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create audit_log table: {}", e)))?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_accounts_active ON accounts(is_active)",
        "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
        "CREATE INDEX IF NOT EXISTS idx_orders_account ON orders(account_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Migration(format!("Failed to create index: {}", e)))?;
    }

    info!("Database migrations completed");
    Ok(())
}
