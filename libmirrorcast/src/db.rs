//! Database operations for Mirrorcast

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{IdMapping, PinState, RunRecord};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file when missing
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(pool).await
    }

    /// Private in-memory database, used by tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        // A single connection that never recycles, or the memory database vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ------------------------------------------------------------------
    // ID mappings
    // ------------------------------------------------------------------

    /// Destination id previously recorded for a source post
    pub async fn destination_id_for(&self, account: &str, source_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT destination_id FROM id_mappings
            WHERE account = ? AND source_id = ?
            "#,
        )
        .bind(account)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| r.get("destination_id")))
    }

    /// Append a mapping; a second mapping for the same source post is rejected
    pub async fn record_mapping(
        &self,
        account: &str,
        source_id: &str,
        destination_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO id_mappings (account, source_id, destination_id, mirrored_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(account)
        .bind(source_id)
        .bind(destination_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn mapping_count(&self, account: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM id_mappings WHERE account = ?")
            .bind(account)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.get("n"))
    }

    /// Most recent mappings first
    pub async fn recent_mappings(&self, account: &str, limit: usize) -> Result<Vec<IdMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT account, source_id, destination_id, mirrored_at
            FROM id_mappings
            WHERE account = ?
            ORDER BY mirrored_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(account)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .into_iter()
            .map(|r| IdMapping {
                account: r.get("account"),
                source_id: r.get("source_id"),
                destination_id: r.get("destination_id"),
                mirrored_at: r.get("mirrored_at"),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Pin state
    // ------------------------------------------------------------------

    pub async fn load_pin_state(&self, account: &str) -> Result<PinState> {
        let row = sqlx::query(
            r#"
            SELECT source_pin_id, destination_pin_id FROM pin_state
            WHERE account = ?
            "#,
        )
        .bind(account)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(match row {
            Some(r) => {
                let source: String = r.get("source_pin_id");
                let destination: String = r.get("destination_pin_id");
                PinState::from_stored(&source, &destination)
            }
            None => PinState::Unpinned,
        })
    }

    /// Last write wins
    pub async fn save_pin_state(&self, account: &str, state: &PinState) -> Result<()> {
        let (source, destination) = state.to_stored();

        sqlx::query(
            r#"
            INSERT INTO pin_state (account, source_pin_id, destination_pin_id, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(account) DO UPDATE SET
                source_pin_id = excluded.source_pin_id,
                destination_pin_id = excluded.destination_pin_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account)
        .bind(source)
        .bind(destination)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Run history
    // ------------------------------------------------------------------

    /// True until a pass for this account has completed successfully
    pub async fn is_first_run(&self, account: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM mirror_runs WHERE account = ? AND success = 1",
        )
        .bind(account)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let completed: i64 = row.get("n");
        Ok(completed == 0)
    }

    /// Record the start of a pass and return its run id
    pub async fn start_run(&self, account: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO mirror_runs (id, account, started_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(account)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(id)
    }

    /// Close a run; `error` set means the pass failed
    pub async fn finish_run(
        &self,
        run_id: &str,
        mirrored: usize,
        skipped: usize,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE mirror_runs
            SET finished_at = ?, mirrored = ?, skipped = ?, success = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(mirrored as i64)
        .bind(skipped as i64)
        .bind(error.is_none())
        .bind(error)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Most recent runs first
    pub async fn recent_runs(&self, account: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account, started_at, finished_at, mirrored, skipped, success, error_message
            FROM mirror_runs
            WHERE account = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(account)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .into_iter()
            .map(|r| RunRecord {
                id: r.get("id"),
                account: r.get("account"),
                started_at: r.get("started_at"),
                finished_at: r.get("finished_at"),
                mirrored: r.get("mirrored"),
                skipped: r.get("skipped"),
                success: r.get("success"),
                error_message: r.get("error_message"),
            })
            .collect())
    }
}
