//! # homelink-db
//!
//! Database layer for HomeLink — a single embedded SQLite file holding the
//! provisioned users. The full user set is loaded at startup; rows are
//! rewritten on every token or credential change.

pub mod repository;

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use std::str::FromStr;

/// Shared database handle.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the SQLite database at `path`.
    pub async fn connect(path: &str) -> Result<Self> {
        tracing::info!("Opening SQLite database: {path}");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true);

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}
