pub mod models;
pub mod schema;

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::AppConfig;
use crate::crypto::format_timestamp;
use crate::error::{require_non_empty, Result, VoteCoreError};
use models::Shareholder;

/// Handle to the relational store. Cloning shares the underlying pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Database { pool })
    }

    /// Open an existing store for inspection. Never creates the file, runs
    /// migrations or changes its journal mode; writes fail.
    pub async fn open_read_only(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Database { pool })
    }

    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let database = Self::new(&config.database_url, config.max_connections).await?;
        database.run_migrations().await?;
        Ok(database)
    }

    /// Private in-memory database with the schema applied. A single
    /// connection is kept alive for the lifetime of the pool, since every
    /// new SQLite memory connection would start from an empty database.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let database = Database { pool };
        database.run_migrations().await?;
        Ok(database)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        for (name, sql) in schema::MIGRATIONS {
            sqlx::raw_sql(sql).execute(&self.pool).await.map_err(|e| {
                VoteCoreError::DatabaseError(format!("Migration {} failed: {}", name, e))
            })?;
        }

        info!("Database migrations completed");
        Ok(())
    }

    /// Admin hook: add a shareholder that credentials can be issued to.
    pub async fn register_shareholder(
        &self,
        shareholder_id: &str,
        company_id: &str,
        contact: &str,
    ) -> Result<Shareholder> {
        require_non_empty("shareholder_id", shareholder_id)?;
        require_non_empty("company_id", company_id)?;
        require_non_empty("contact", contact)?;

        let created_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO shareholders (id, company_id, contact, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(shareholder_id)
        .bind(company_id)
        .bind(contact)
        .bind(format_timestamp(&created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                VoteCoreError::InvalidInput(format!(
                    "shareholder {} is already registered",
                    shareholder_id
                ))
            } else {
                VoteCoreError::from(e)
            }
        })?;

        info!("Registered shareholder {} for company {}", shareholder_id, company_id);
        Ok(Shareholder {
            id: shareholder_id.to_string(),
            company_id: company_id.to_string(),
            contact: contact.to_string(),
            created_at,
        })
    }

    pub async fn get_shareholder(&self, shareholder_id: &str) -> Result<Option<Shareholder>> {
        let row = sqlx::query(
            "SELECT id, company_id, contact, created_at FROM shareholders WHERE id = ?",
        )
        .bind(shareholder_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Shareholder::from_row).transpose()
    }

    /// Admin hook: remove a shareholder. The credential goes with it; cast
    /// votes stay in the ledger.
    pub async fn remove_shareholder(&self, shareholder_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM shareholders WHERE id = ?")
            .bind(shareholder_id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!("Removed shareholder {}", shareholder_id);
        }
        Ok(removed)
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
