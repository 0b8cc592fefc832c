//! SQLite persistence for operator accounts and packet history.
//!
//! Two tables back the relay. `users` holds username/password-digest
//! pairs checked by the USER command, `data` holds every packet relayed
//! in either direction and feeds REPLAY.
//!
//! The server core depends on the `Storage` trait rather than the
//! concrete store, so tests can run against an in-memory database.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info};

use mcc_core::{Direction, Packet, PacketError};

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to prepare the database location on disk.
    #[error("failed to prepare database path {path}: {error}")]
    Setup { path: PathBuf, error: String },

    /// The database rejected an operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row does not decode into a valid packet.
    #[error("stored packet is invalid: {0}")]
    Corrupt(#[from] PacketError),
}

/// Hashes a plaintext password into the digest form held in the users
/// table. Clients send this digest as the password field of USER.
pub fn digest_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Persistence operations the relay depends on.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Checks a username/digest pair against the users table.
    async fn validate_credentials(
        &self,
        username: &str,
        password_digest: &str,
    ) -> Result<bool, StorageError>;

    /// Records a relayed packet.
    async fn record(&self, packet: &Packet, direction: Direction) -> Result<(), StorageError>;

    /// Returns the most recent `count` received packets, oldest first.
    async fn recent_inbound(&self, count: usize) -> Result<Vec<Packet>, StorageError>;
}

/// SQLite-backed store for users and packet history.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Opens or creates a database at the given path.
    ///
    /// Creates the file and tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Setup {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        info!(db = %path.display(), "Packet database opened");
        Ok(storage)
    }

    /// Creates an in-memory database (for testing).
    ///
    /// The pool is pinned to a single connection so every query sees
    /// the same in-memory database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initializes the database schema.
    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                uid INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS data (
                pid INTEGER PRIMARY KEY AUTOINCREMENT,
                time INTEGER NOT NULL,
                dir TEXT NOT NULL,
                source INTEGER NOT NULL,
                dest INTEGER NOT NULL,
                sport INTEGER NOT NULL,
                dport INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_data_dir_time ON data(dir, time)")
            .execute(&self.pool)
            .await?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Creates a user, or replaces the password of an existing one.
    pub async fn add_user(
        &self,
        username: &str,
        password_digest: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO users (username, password) VALUES (?, ?)
            ON CONFLICT(username) DO UPDATE SET password = excluded.password
            "#,
        )
        .bind(username)
        .bind(password_digest)
        .execute(&self.pool)
        .await?;

        info!(user = %username, "User stored");
        Ok(())
    }

    /// Returns the number of stored packets in one direction (for testing).
    #[cfg(test)]
    pub async fn packet_count(&self, direction: Direction) -> Result<i64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data WHERE dir = ?")
            .bind(direction.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn validate_credentials(
        &self,
        username: &str,
        password_digest: &str,
    ) -> Result<bool, StorageError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ? AND password = ?")
                .bind(username)
                .bind(password_digest)
                .fetch_one(&self.pool)
                .await?;

        Ok(count == 1)
    }

    async fn record(&self, packet: &Packet, direction: Direction) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO data (time, dir, source, dest, sport, dport, data)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(packet.timestamp())
        .bind(direction.as_str())
        .bind(packet.source())
        .bind(packet.dest())
        .bind(packet.sport())
        .bind(packet.dport())
        .bind(packet.payload_hex())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_inbound(&self, count: usize) -> Result<Vec<Packet>, StorageError> {
        // Latest `count` received packets, flipped back to oldest-first
        // so replay preserves the original arrival order.
        let rows = sqlx::query(
            r#"
            SELECT time, source, dest, sport, dport, data
            FROM (
                SELECT time, source, dest, sport, dport, data
                FROM data WHERE dir = ? ORDER BY time DESC LIMIT ?
            )
            ORDER BY time ASC
            "#,
        )
        .bind(Direction::In.as_str())
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut packets = Vec::with_capacity(rows.len());
        for row in rows {
            let payload_hex: String = row.try_get("data")?;
            let payload = hex::decode(&payload_hex)
                .map_err(|_| PacketError::malformed("stored payload is not hex"))?;

            let packet = Packet::from_parts(
                row.try_get::<u8, _>("source")?,
                row.try_get::<u8, _>("sport")?,
                row.try_get::<u8, _>("dest")?,
                row.try_get::<u8, _>("dport")?,
                payload,
                row.try_get::<i64, _>("time")?,
            )?;
            packets.push(packet);
        }

        Ok(packets)
    }
}
