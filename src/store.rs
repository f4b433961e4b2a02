// ABOUTME: SQLite persistence for sync tokens, registered services, and poll bookkeeping.
// ABOUTME: Implements the core NextBatchStore, ServiceDirectory, and PollTimeStore traits.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use relaybot_core::{NextBatchStore, PollTimeStore, ServiceDirectory, ServiceRecord};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Database {
    db: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file, creating parent directories as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let database = Self::from_connection(conn)?;
        tracing::info!(db = %path.display(), "Database initialized");
        Ok(database)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS next_batch (
                user_id TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS services (
                service_id TEXT PRIMARY KEY,
                service_type TEXT NOT NULL,
                owner_user_id TEXT NOT NULL,
                config_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS poll_state (
                service_id TEXT PRIMARY KEY,
                next_poll_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }

    // =========================================================================
    // Sync tokens
    // =========================================================================

    pub fn save_next_batch(&self, user_id: &str, token: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO next_batch (user_id, token, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET token = ?2, updated_at = ?3",
            params![user_id, token, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_next_batch(&self, user_id: &str) -> Result<Option<String>> {
        let db = self.conn()?;
        let token = db.query_row(
            "SELECT token FROM next_batch WHERE user_id = ?1",
            params![user_id],
            |row| row.get::<_, String>(0),
        );
        match token {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Insert a service or replace its type, owner, and config.
    pub fn upsert_service(&self, service: &ServiceRecord) -> Result<()> {
        let config_json = serde_json::to_string(&service.config)
            .context("Failed to serialize service config")?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO services (service_id, service_type, owner_user_id, config_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(service_id) DO UPDATE SET
                service_type = ?2,
                owner_user_id = ?3,
                config_json = ?4,
                updated_at = ?5",
            params![
                service.service_id,
                service.service_type,
                service.owner_user_id,
                config_json,
                Utc::now().to_rfc3339()
            ],
        )?;
        tracing::debug!(service_id = %service.service_id, "Service saved");
        Ok(())
    }

    pub fn get_service(&self, service_id: &str) -> Result<Option<ServiceRecord>> {
        let db = self.conn()?;
        let row = db.query_row(
            "SELECT service_id, service_type, owner_user_id, config_json
             FROM services WHERE service_id = ?1",
            params![service_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        );
        match row {
            Ok(fields) => Ok(Some(service_from_row(fields)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_services(&self) -> Result<Vec<ServiceRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT service_id, service_type, owner_user_id, config_json
             FROM services ORDER BY service_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(service_from_row).collect()
    }

    /// Remove a service and its poll bookkeeping. Returns whether it existed.
    pub fn delete_service(&self, service_id: &str) -> Result<bool> {
        let db = self.conn()?;
        db.execute(
            "DELETE FROM poll_state WHERE service_id = ?1",
            params![service_id],
        )?;
        let deleted = db.execute(
            "DELETE FROM services WHERE service_id = ?1",
            params![service_id],
        )?;
        Ok(deleted > 0)
    }

    // =========================================================================
    // Poll bookkeeping
    // =========================================================================

    pub fn set_next_poll(&self, service_id: &str, at: DateTime<Utc>) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO poll_state (service_id, next_poll_at) VALUES (?1, ?2)
             ON CONFLICT(service_id) DO UPDATE SET next_poll_at = ?2",
            params![service_id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn next_poll_at(&self, service_id: &str) -> Result<Option<DateTime<Utc>>> {
        let db = self.conn()?;
        let raw = db.query_row(
            "SELECT next_poll_at FROM poll_state WHERE service_id = ?1",
            params![service_id],
            |row| row.get::<_, String>(0),
        );
        match raw {
            Ok(s) => {
                let at = DateTime::parse_from_rfc3339(&s)
                    .with_context(|| format!("Invalid next_poll_at for {}: {}", service_id, s))?;
                Ok(Some(at.with_timezone(&Utc)))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn service_from_row(
    (service_id, service_type, owner_user_id, config_json): (String, String, String, String),
) -> Result<ServiceRecord> {
    let config = serde_json::from_str(&config_json)
        .with_context(|| format!("Invalid config JSON for service {}", service_id))?;
    Ok(ServiceRecord {
        service_id,
        service_type,
        owner_user_id,
        config,
    })
}

impl NextBatchStore for Database {
    fn save(&self, user_id: &str, token: &str) {
        if let Err(e) = self.save_next_batch(user_id, token) {
            tracing::error!(user_id = %user_id, error = %e, "Failed to persist next_batch token");
        }
    }

    fn load(&self, user_id: &str) -> String {
        match self.load_next_batch(user_id) {
            Ok(token) => token.unwrap_or_default(),
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to load next_batch token, starting from initial sync"
                );
                String::new()
            }
        }
    }
}

impl ServiceDirectory for Database {
    fn list_services(&self) -> Result<Vec<ServiceRecord>> {
        Database::list_services(self)
    }
}

impl PollTimeStore for Database {
    fn record_next_poll(&self, service_id: &str, at: DateTime<Utc>) {
        if let Err(e) = self.set_next_poll(service_id, at) {
            tracing::warn!(service_id = %service_id, error = %e, "Failed to record next poll time");
        }
    }
}
