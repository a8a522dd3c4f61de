// Credential persistence in a SQLite database

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::store::CredentialStore;
use super::types::TokenPair;
use crate::error::StoreError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    saved_at TEXT NOT NULL
)";

/// Credential store backed by a single-row SQLite table
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the credential database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::debug!("Opening credential database: {}", path.display());
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests and throwaway sessions
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self) -> Result<Option<(TokenPair, String)>, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT access_token, refresh_token, saved_at FROM credentials WHERE id = 1",
                [],
                |row| {
                    Ok((
                        TokenPair::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    fn load_logged(&self) -> Option<TokenPair> {
        match self.load() {
            Ok(row) => row.map(|(pair, _)| pair),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read credentials from SQLite");
                None
            }
        }
    }

    /// When the stored pair was last written
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        let (_, saved_at) = self.load().ok().flatten()?;
        DateTime::parse_from_rfc3339(&saved_at)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn save_tokens(&self, tokens: &TokenPair) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO credentials (id, access_token, refresh_token, saved_at)
             VALUES (1, ?1, ?2, ?3)",
            params![
                tokens.access_token,
                tokens.refresh_token,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        tracing::debug!("Credentials saved to SQLite");
        Ok(())
    }

    async fn access_token(&self) -> Option<String> {
        self.load_logged().map(|pair| pair.access_token)
    }

    async fn refresh_token(&self) -> Option<String> {
        self.load_logged().map(|pair| pair.refresh_token)
    }

    async fn delete_tokens(&self) -> Result<(), StoreError> {
        self.conn().execute("DELETE FROM credentials", [])?;
        tracing::debug!("Credentials removed from SQLite");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        assert!(store.access_token().await.is_none());

        store.save_tokens(&TokenPair::new("A1", "R1")).await.unwrap();
        assert_eq!(store.access_token().await.as_deref(), Some("A1"));
        assert_eq!(store.refresh_token().await.as_deref(), Some("R1"));
        assert!(store.saved_at().is_some());
    }

    #[tokio::test]
    async fn test_save_replaces_single_row() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.save_tokens(&TokenPair::new("A1", "R1")).await.unwrap();
        store.save_tokens(&TokenPair::new("A2", "R2")).await.unwrap();

        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.access_token().await.as_deref(), Some("A2"));
        assert_eq!(store.refresh_token().await.as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_delete_tokens() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.save_tokens(&TokenPair::new("A1", "R1")).await.unwrap();
        store.delete_tokens().await.unwrap();

        assert!(store.access_token().await.is_none());
        assert!(store.refresh_token().await.is_none());
        assert!(store.saved_at().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.db");

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.save_tokens(&TokenPair::new("A1", "R1")).await.unwrap();
        }

        let store = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(store.refresh_token().await.as_deref(), Some("R1"));
    }
}
