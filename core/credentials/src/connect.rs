//! Connecting and disconnecting drive accounts.

use chrono::{Duration as TimeDelta, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use drivelink_common::{CredentialId, Error, Result, UserId};
use drivelink_crypto::TokenCipher;
use drivelink_storage::{AuthRequest, ProviderRegistry};

use crate::record::CredentialRecord;
use crate::state_cache::EphemeralStateCache;
use crate::store::CredentialStore;

/// Lifetime of an anti-forgery state token, in seconds.
pub const OAUTH_STATE_TTL: u64 = 600;

/// Runs the authorization handshake and records the resulting credential.
pub struct ConnectService {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn CredentialStore>,
    cipher: Arc<dyn TokenCipher>,
    states: EphemeralStateCache,
    state_ttl_secs: u64,
}

impl ConnectService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn CredentialStore>,
        cipher: Arc<dyn TokenCipher>,
        states: EphemeralStateCache,
    ) -> Self {
        Self {
            registry,
            store,
            cipher,
            states,
            state_ttl_secs: OAUTH_STATE_TTL,
        }
    }

    /// Override how long a pending authorization stays valid.
    pub fn with_state_ttl(mut self, ttl_secs: u64) -> Self {
        self.state_ttl_secs = ttl_secs;
        self
    }

    /// Start connecting `provider` for `owner`.
    ///
    /// # Errors
    /// - `ProviderNotFound` for unknown providers
    /// - `NotConfigured` if the provider has no client credentials
    pub async fn begin(&self, provider: &str, owner: &UserId) -> Result<AuthRequest> {
        let adapter = self.registry.get(provider)?;
        let request = adapter.begin_auth()?;

        self.states
            .put(&state_key(provider, &request.state), owner.as_str(), self.state_ttl_secs)
            .await;

        info!(provider, owner = %owner, "Authorization started");
        Ok(request)
    }

    /// Finish the handshake and store the new credential.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if the state is unknown, expired or reused,
    ///   or the provider rejects the code
    pub async fn complete(&self, provider: &str, state: &str, code: &str) -> Result<CredentialRecord> {
        let adapter = self.registry.get(provider)?;

        let owner = match self.states.take_once(&state_key(provider, state)).await {
            Ok(owner) => UserId::new(owner)?,
            Err(_) => {
                warn!(provider, "Authorization callback with invalid state");
                return Err(Error::AuthenticationFailed(
                    "invalid or expired state".to_string(),
                ));
            }
        };

        let result = adapter.exchange_code(code).await?;
        let now = Utc::now();

        let mut record = CredentialRecord::new(
            CredentialId::new(Uuid::new_v4().to_string())?,
            owner,
            provider,
            self.cipher.encrypt(result.access_token.expose())?,
            now,
        );
        if !result.refresh_token.is_empty() {
            record.refresh_token_cipher = Some(self.cipher.encrypt(result.refresh_token.expose())?);
        }
        record.expires_at = result
            .expires_in_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| now.checked_add_signed(delta));
        record.external_account_id = result.external_account_id;
        record.email = result.email;
        record.display_name = result.display_name;

        self.store.insert_credential(record.clone()).await?;

        info!(
            credential_id = %record.id,
            provider,
            owner = %record.owner_user_id,
            "Credential connected"
        );
        Ok(record)
    }

    /// Soft-delete a credential owned by `owner`.
    pub async fn disconnect(&self, id: &CredentialId, owner: &UserId) -> Result<()> {
        self.store.soft_delete(id, owner).await?;
        info!(credential_id = %id, "Credential disconnected");
        Ok(())
    }
}

/// States are scoped per provider so a state issued for one cannot
/// complete another.
fn state_key(provider: &str, state: &str) -> String {
    format!("oauth_state:{}:{}", provider, state)
}
