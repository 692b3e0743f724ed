//! SQLite-backed credential store.
//!
//! Timestamps are stored as RFC3339 text. Statements are short and local,
//! so they run inline under a connection mutex. The same database also
//! holds pending OAuth states, so a connect flow can span processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use drivelink_common::{CredentialId, Error, Result, UserId};

use crate::record::{CredentialRecord, HealthStatus, TokenUpdate};
use crate::state_cache::StateBackend;
use crate::store::CredentialStore;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS credentials (
        id TEXT PRIMARY KEY,
        owner_user_id TEXT NOT NULL,
        provider TEXT NOT NULL,
        access_token_cipher TEXT NOT NULL,
        refresh_token_cipher TEXT,
        expires_at TEXT,
        disabled INTEGER NOT NULL DEFAULT 0,
        health_status TEXT NOT NULL,
        external_account_id TEXT NOT NULL DEFAULT '',
        email TEXT NOT NULL DEFAULT '',
        display_name TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_credentials_owner ON credentials(owner_user_id);

    CREATE TABLE IF NOT EXISTS oauth_states (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        expires_at_ms INTEGER NOT NULL
    );
"#;

const COLUMNS: &str = "id, owner_user_id, provider, access_token_cipher, refresh_token_cipher, \
    expires_at, disabled, health_status, external_account_id, email, display_name, \
    created_at, updated_at, deleted_at";

fn store_error(err: rusqlite::Error) -> Error {
    Error::Store(err.to_string())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("Invalid timestamp '{}': {}", value, e)))
}

fn parse_optional_time(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}

/// Row as stored, before validation.
struct StoredRow {
    id: String,
    owner_user_id: String,
    provider: String,
    access_token_cipher: String,
    refresh_token_cipher: Option<String>,
    expires_at: Option<String>,
    disabled: bool,
    health_status: String,
    external_account_id: String,
    email: String,
    display_name: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_user_id: row.get(1)?,
            provider: row.get(2)?,
            access_token_cipher: row.get(3)?,
            refresh_token_cipher: row.get(4)?,
            expires_at: row.get(5)?,
            disabled: row.get::<_, i32>(6)? != 0,
            health_status: row.get(7)?,
            external_account_id: row.get(8)?,
            email: row.get(9)?,
            display_name: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            deleted_at: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            id: CredentialId::new(self.id)?,
            owner_user_id: UserId::new(self.owner_user_id)?,
            provider: self.provider,
            access_token_cipher: self.access_token_cipher,
            refresh_token_cipher: self.refresh_token_cipher,
            expires_at: parse_optional_time(self.expires_at)?,
            disabled: self.disabled,
            health_status: self.health_status.parse()?,
            external_account_id: self.external_account_id,
            email: self.email,
            display_name: self.display_name,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            deleted_at: parse_optional_time(self.deleted_at)?,
        })
    }
}

/// Credential store persisted in a SQLite database.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Create or open a credential database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(store_error)?;
        conn.execute_batch(SCHEMA).map_err(store_error)?;

        info!(path = %db_path.as_ref().display(), "Credential store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("Credential store connection poisoned".to_string()))
    }

    fn query_one(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<CredentialRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(sql, args, StoredRow::read)
            .optional()
            .map_err(store_error)?;
        row.map(StoredRow::into_record).transpose()
    }

    fn touch(affected: usize, id: &CredentialId) -> Result<()> {
        if affected == 0 {
            return Err(Error::IntegrationNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn insert_credential(&self, record: CredentialRecord) -> Result<()> {
        debug!(credential_id = %record.id, provider = %record.provider, "Inserting credential");
        let conn = self.conn()?;

        let result = conn.execute(
            &format!(
                "INSERT INTO credentials ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                COLUMNS
            ),
            params![
                record.id.as_str(),
                record.owner_user_id.as_str(),
                record.provider,
                record.access_token_cipher,
                record.refresh_token_cipher,
                record.expires_at.map(|t| t.to_rfc3339()),
                record.disabled as i32,
                record.health_status.as_str(),
                record.external_account_id,
                record.email,
                record.display_name,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.deleted_at.map(|t| t.to_rfc3339()),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::AlreadyExists(format!("Credential {}", record.id)))
            }
            Err(e) => Err(store_error(e)),
        }
    }

    async fn find_credential(
        &self,
        id: &CredentialId,
        owner: &UserId,
    ) -> Result<Option<CredentialRecord>> {
        self.query_one(
            &format!(
                "SELECT {} FROM credentials WHERE id = ?1 AND owner_user_id = ?2 AND deleted_at IS NULL",
                COLUMNS
            ),
            &[&id.as_str(), &owner.as_str()],
        )
    }

    async fn get_credential(&self, id: &CredentialId) -> Result<Option<CredentialRecord>> {
        self.query_one(
            &format!(
                "SELECT {} FROM credentials WHERE id = ?1 AND deleted_at IS NULL",
                COLUMNS
            ),
            &[&id.as_str()],
        )
    }

    async fn list_credentials(&self, owner: &UserId) -> Result<Vec<CredentialRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM credentials WHERE owner_user_id = ?1 AND deleted_at IS NULL \
                 ORDER BY created_at, id",
                COLUMNS
            ))
            .map_err(store_error)?;

        let rows = stmt
            .query_map([owner.as_str()], StoredRow::read)
            .map_err(store_error)?;

        let records = rows
            .map(|row| row.map_err(store_error)?.into_record())
            .collect::<Result<Vec<_>>>();
        records
    }

    async fn update_credential_tokens(
        &self,
        id: &CredentialId,
        update: &TokenUpdate,
    ) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn
            .execute(
                "UPDATE credentials SET access_token_cipher = ?2, refresh_token_cipher = ?3, \
                 expires_at = ?4, health_status = ?5, updated_at = ?6 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    id.as_str(),
                    update.access_token_cipher,
                    update.refresh_token_cipher,
                    update.expires_at.map(|t| t.to_rfc3339()),
                    HealthStatus::Healthy.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_error)?;
        Self::touch(affected, id)
    }

    async fn set_health(&self, id: &CredentialId, status: HealthStatus) -> Result<()> {
        let conn = self.conn()?;
        let affected = conn
            .execute(
                "UPDATE credentials SET health_status = ?2, updated_at = ?3 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.as_str(), status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(store_error)?;
        Self::touch(affected, id)
    }

    async fn soft_delete(&self, id: &CredentialId, owner: &UserId) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        let affected = conn
            .execute(
                "UPDATE credentials SET deleted_at = ?3, updated_at = ?3 \
                 WHERE id = ?1 AND owner_user_id = ?2 AND deleted_at IS NULL",
                params![id.as_str(), owner.as_str(), now],
            )
            .map_err(store_error)?;
        Self::touch(affected, id)
    }
}

#[async_trait]
impl StateBackend for SqliteCredentialStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = Utc::now().timestamp_millis().saturating_add(ttl_ms);
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM oauth_states WHERE expires_at_ms <= ?1",
            [Utc::now().timestamp_millis()],
        )
        .map_err(store_error)?;
        conn.execute(
            "INSERT OR REPLACE INTO oauth_states (key, value, expires_at_ms) VALUES (?1, ?2, ?3)",
            params![key, value, expires_at_ms],
        )
        .map_err(store_error)?;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let taken = conn
            .query_row(
                "DELETE FROM oauth_states WHERE key = ?1 RETURNING value, expires_at_ms",
                [key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(store_error)?;

        let now_ms = Utc::now().timestamp_millis();
        Ok(taken
            .filter(|(_, expires_at_ms)| *expires_at_ms > now_ms)
            .map(|(value, _)| value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use drivelink_common::ErrorKind;
    use tempfile::TempDir;

    fn id(s: &str) -> CredentialId {
        CredentialId::new(s).unwrap()
    }

    fn user(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    fn record(cred: &str, owner: &str) -> CredentialRecord {
        let mut record =
            CredentialRecord::new(id(cred), user(owner), "dropbox", "cipher-a", Utc::now());
        record.refresh_token_cipher = Some("cipher-r".to_string());
        record.expires_at = Some(Utc::now() + Duration::hours(1));
        record.email = "ada@example.com".to_string();
        record
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = SqliteCredentialStore::in_memory().unwrap();
        let original = record("c1", "alice");
        store.insert_credential(original.clone()).await.unwrap();

        let found = store
            .find_credential(&id("c1"), &user("alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.email, "ada@example.com");
        assert_eq!(found.refresh_token_cipher.as_deref(), Some("cipher-r"));
        assert_eq!(
            found.expires_at.map(|t| t.timestamp()),
            original.expires_at.map(|t| t.timestamp())
        );

        assert!(store
            .find_credential(&id("c1"), &user("bob"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = SqliteCredentialStore::in_memory().unwrap();
        store.insert_credential(record("c1", "alice")).await.unwrap();

        let err = store
            .insert_credential(record("c1", "alice"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_update_tokens_and_soft_delete() {
        let store = SqliteCredentialStore::in_memory().unwrap();
        store.insert_credential(record("c1", "alice")).await.unwrap();
        store
            .set_health(&id("c1"), HealthStatus::Degraded)
            .await
            .unwrap();

        store
            .update_credential_tokens(
                &id("c1"),
                &TokenUpdate {
                    access_token_cipher: "cipher-b".to_string(),
                    refresh_token_cipher: Some("cipher-r2".to_string()),
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        let updated = store.get_credential(&id("c1")).await.unwrap().unwrap();
        assert_eq!(updated.access_token_cipher, "cipher-b");
        assert_eq!(updated.expires_at, None);
        assert_eq!(updated.health_status, HealthStatus::Healthy);

        store.soft_delete(&id("c1"), &user("alice")).await.unwrap();
        assert!(store.get_credential(&id("c1")).await.unwrap().is_none());
        assert!(store
            .list_credentials(&user("alice"))
            .await
            .unwrap()
            .is_empty());

        let err = store
            .set_health(&id("c1"), HealthStatus::Healthy)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrationNotFound);
    }

    #[tokio::test]
    async fn test_state_survives_reopen_and_is_single_use() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.db");

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store
                .set("oauth_state:dropbox:s1", "alice", std::time::Duration::from_secs(600))
                .await
                .unwrap();
            store
                .set("oauth_state:dropbox:s2", "bob", std::time::Duration::ZERO)
                .await
                .unwrap();
        }

        let store = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(
            store.take("oauth_state:dropbox:s1").await.unwrap().as_deref(),
            Some("alice")
        );
        assert!(store.take("oauth_state:dropbox:s1").await.unwrap().is_none());
        assert!(store.take("oauth_state:dropbox:s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_records_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.db");

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.insert_credential(record("c1", "alice")).await.unwrap();
            store.insert_credential(record("c2", "alice")).await.unwrap();
        }

        let store = SqliteCredentialStore::open(&path).unwrap();
        let listed = store.list_credentials(&user("alice")).await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}
