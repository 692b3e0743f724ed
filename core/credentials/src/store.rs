//! Credential store abstraction.
//!
//! The store is plain persistence: it never decrypts, refreshes or decides
//! anything. Soft-deleted records are invisible to every lookup.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use drivelink_common::{CredentialId, Error, Result, UserId};

use crate::record::{CredentialRecord, HealthStatus, TokenUpdate};

/// Durable storage for [`CredentialRecord`]s.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new record.
    ///
    /// # Errors
    /// - `AlreadyExists` if the id is taken
    async fn insert_credential(&self, record: CredentialRecord) -> Result<()>;

    /// Live record with this id owned by `owner`.
    async fn find_credential(
        &self,
        id: &CredentialId,
        owner: &UserId,
    ) -> Result<Option<CredentialRecord>>;

    /// Live record with this id, regardless of owner.
    async fn get_credential(&self, id: &CredentialId) -> Result<Option<CredentialRecord>>;

    /// Live records of `owner`, oldest first.
    async fn list_credentials(&self, owner: &UserId) -> Result<Vec<CredentialRecord>>;

    /// Persist refreshed tokens and mark the record healthy.
    ///
    /// # Errors
    /// - `IntegrationNotFound` if no live record exists
    async fn update_credential_tokens(&self, id: &CredentialId, update: &TokenUpdate)
        -> Result<()>;

    /// Record the observed health of a credential.
    async fn set_health(&self, id: &CredentialId, status: HealthStatus) -> Result<()>;

    /// Mark a record deleted. The row is kept.
    ///
    /// # Errors
    /// - `IntegrationNotFound` if `owner` has no live record with this id
    async fn soft_delete(&self, id: &CredentialId, owner: &UserId) -> Result<()>;
}

/// In-memory credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<CredentialId, CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn insert_credential(&self, record: CredentialRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(Error::AlreadyExists(format!("Credential {}", record.id)));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find_credential(
        &self,
        id: &CredentialId,
        owner: &UserId,
    ) -> Result<Option<CredentialRecord>> {
        Ok(self
            .get_credential(id)
            .await?
            .filter(|r| &r.owner_user_id == owner))
    }

    async fn get_credential(&self, id: &CredentialId) -> Result<Option<CredentialRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(id)
            .filter(|r| !r.is_deleted())
            .cloned())
    }

    async fn list_credentials(&self, owner: &UserId) -> Result<Vec<CredentialRecord>> {
        let mut found: Vec<CredentialRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| &r.owner_user_id == owner && !r.is_deleted())
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn update_credential_tokens(
        &self,
        id: &CredentialId,
        update: &TokenUpdate,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| Error::IntegrationNotFound(id.to_string()))?;
        record.apply_tokens(update, Utc::now());
        Ok(())
    }

    async fn set_health(&self, id: &CredentialId, status: HealthStatus) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| Error::IntegrationNotFound(id.to_string()))?;
        record.health_status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn soft_delete(&self, id: &CredentialId, owner: &UserId) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .filter(|r| !r.is_deleted() && &r.owner_user_id == owner)
            .ok_or_else(|| Error::IntegrationNotFound(id.to_string()))?;
        let now = Utc::now();
        record.deleted_at = Some(now);
        record.updated_at = now;
        Ok(())
    }
}
