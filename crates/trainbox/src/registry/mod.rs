//! Persistent allocation registry.
//!
//! SQLite database holding one row per registered user. The slot counter is
//! monotonic: removing a user retires their slot forever, so UIDs and ports
//! are never handed to a different person later. Subvolumes, backups and
//! shell histories all outlive the container; a recycled UID would silently
//! hand them to the next user.

mod models;

pub use models::{UserRecord, password_env_name};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, instrument};

use crate::config::HostConfig;
use crate::validate;

/// Database connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the registry database at `path`.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating registry directory: {}", parent.display()))?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .context("parsing registry URL")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connecting to registry")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Create an in-memory registry (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory registry URL")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("connecting to in-memory registry")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running registry migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Repository over the users table.
#[derive(Debug, Clone)]
pub struct UserRegistry {
    pool: SqlitePool,
}

impl UserRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a user and allocate their slot, UID and ports.
    ///
    /// The whole allocation happens in one transaction so two concurrent
    /// invocations cannot claim the same slot. `password_env` overrides the
    /// derived env var name for the user's initial password.
    #[instrument(skip(self, config))]
    pub async fn create(
        &self,
        username: &str,
        password_env: Option<&str>,
        config: &HostConfig,
    ) -> Result<UserRecord> {
        validate::validate_username(username).map_err(|msg| anyhow::anyhow!(msg))?;

        if self.get(username).await?.is_some() {
            anyhow::bail!("user '{username}' is already registered");
        }

        let active = self.count_active().await?;
        if active >= i64::from(config.users.max_users) {
            anyhow::bail!(
                "user limit reached ({} of {} users registered)",
                active,
                config.users.max_users
            );
        }

        let mut tx = self.pool.begin().await.context("starting transaction")?;

        // Retired slots count toward the maximum so deleting the newest user
        // cannot roll the counter back.
        let next_slot: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(slot), -1) + 1 FROM (
                SELECT slot FROM users
                UNION ALL
                SELECT slot FROM retired_slots
            )
            "#,
        )
        .fetch_one(&mut *tx)
        .await
        .context("allocating slot")?;

        let uid = i64::from(config.users.first_uid) + next_slot;
        if uid > i64::from(validate::UID_MAX) {
            anyhow::bail!(
                "slot {next_slot} would allocate UID {uid}, beyond the maximum {}",
                validate::UID_MAX
            );
        }

        let ports = config.ports.classes();
        for (class, base) in ports {
            let port = i64::from(base) + next_slot;
            if port > i64::from(validate::PORT_MAX) {
                anyhow::bail!(
                    "slot {next_slot} would allocate {class} port {port}, beyond 65535"
                );
            }
        }

        let record = UserRecord {
            username: username.to_string(),
            slot: next_slot,
            uid,
            ssh_port: i64::from(config.ports.ssh_base) + next_slot,
            vnc_port: i64::from(config.ports.vnc_base) + next_slot,
            rdp_port: i64::from(config.ports.rdp_base) + next_slot,
            novnc_port: i64::from(config.ports.novnc_base) + next_slot,
            password_env: password_env
                .map(str::to_string)
                .unwrap_or_else(|| password_env_name(username)),
            created_at: chrono::Utc::now().to_rfc3339(),
            is_active: true,
        };

        debug!("registering user {} in slot {}", username, next_slot);

        sqlx::query(
            r#"
            INSERT INTO users
                (username, slot, uid, ssh_port, vnc_port, rdp_port, novnc_port,
                 password_env, created_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.username)
        .bind(record.slot)
        .bind(record.uid)
        .bind(record.ssh_port)
        .bind(record.vnc_port)
        .bind(record.rdp_port)
        .bind(record.novnc_port)
        .bind(&record.password_env)
        .bind(&record.created_at)
        .bind(record.is_active)
        .execute(&mut *tx)
        .await
        .context("inserting user record")?;

        tx.commit().await.context("committing registration")?;

        Ok(record)
    }

    /// Look up a user by name.
    #[instrument(skip(self))]
    pub async fn get(&self, username: &str) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT username, slot, uid, ssh_port, vnc_port, rdp_port, novnc_port,
                   password_env, created_at, is_active
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("fetching user record")?;

        Ok(record)
    }

    /// All registered users ordered by slot.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<UserRecord>> {
        let records = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT username, slot, uid, ssh_port, vnc_port, rdp_port, novnc_port,
                   password_env, created_at, is_active
            FROM users
            ORDER BY slot
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("listing user records")?;

        Ok(records)
    }

    /// Active users only, ordered by slot. The compose generator works from
    /// this view.
    pub async fn list_active(&self) -> Result<Vec<UserRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.is_active)
            .collect())
    }

    /// Delete a user's record. The slot stays burned: MAX(slot) keeps
    /// counting upward because removal does not compact the table's history.
    #[instrument(skip(self))]
    pub async fn remove(&self, username: &str) -> Result<bool> {
        // Keep a tombstone of the slot so MAX(slot) survives deleting the
        // newest user too.
        let mut tx = self.pool.begin().await.context("starting transaction")?;

        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT username, slot, uid, ssh_port, vnc_port, rdp_port, novnc_port, password_env, created_at, is_active FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&mut *tx)
        .await
        .context("fetching user record")?;

        let Some(record) = record else {
            return Ok(false);
        };

        sqlx::query("INSERT OR IGNORE INTO retired_slots (slot, username) VALUES (?, ?)")
            .bind(record.slot)
            .bind(&record.username)
            .execute(&mut *tx)
            .await
            .context("retiring slot")?;

        sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(&mut *tx)
            .await
            .context("deleting user record")?;

        tx.commit().await.context("committing removal")?;
        Ok(true)
    }

    /// Mark a user active or inactive without touching their allocation.
    #[instrument(skip(self))]
    pub async fn set_active(&self, username: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE username = ?")
            .bind(active)
            .bind(username)
            .execute(&self.pool)
            .await
            .context("updating user record")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_active(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await
                .context("counting users")?;
        Ok(count)
    }
}
