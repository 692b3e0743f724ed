//! Token lifecycle management.
//!
//! The refresh decision is a pure function of the stored record and the
//! current time ([`plan`]). [`TokenLifecycleManager`] wraps it with the
//! store, the cipher and a per-credential lock so concurrent callers for
//! the same credential trigger at most one provider refresh.

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use drivelink_common::{CredentialId, Error, Result, SecretString};
use drivelink_crypto::TokenCipher;
use drivelink_storage::{AuthResult, ProviderRegistry};

use crate::record::{CredentialRecord, HealthStatus, TokenUpdate};
use crate::store::CredentialStore;

/// Token lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound on a single provider refresh call.
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    /// Treat tokens expiring within this window as already expired.
    #[serde(default)]
    pub expiry_skew_secs: u64,
}

fn default_refresh_timeout() -> u64 {
    30
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            refresh_timeout_secs: default_refresh_timeout(),
            expiry_skew_secs: 0,
        }
    }
}

impl LifecycleConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn expiry_skew(&self) -> TimeDelta {
        i64::try_from(self.expiry_skew_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or_else(TimeDelta::zero)
    }
}

/// What to do with a stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPlan {
    /// The stored access token is still valid.
    UseStored,
    /// The access token expired; refresh with this stored refresh token.
    Refresh { refresh_token_cipher: String },
    /// The access token expired and there is no refresh token.
    Reauth,
    /// The credential is disabled.
    Disabled,
}

/// Decide how to obtain an access token for `record` at `now`.
///
/// A token expiring at or before `now + skew` counts as expired; a record
/// without `expires_at` never expires.
pub fn plan(record: &CredentialRecord, now: DateTime<Utc>, skew: TimeDelta) -> TokenPlan {
    if record.disabled {
        return TokenPlan::Disabled;
    }

    let expired = match record.expires_at {
        None => false,
        Some(expires_at) => now
            .checked_add_signed(skew)
            .is_none_or(|limit| expires_at <= limit),
    };

    if !expired {
        return TokenPlan::UseStored;
    }

    match record.refresh_token_cipher.as_deref() {
        Some(cipher) if !cipher.is_empty() => TokenPlan::Refresh {
            refresh_token_cipher: cipher.to_string(),
        },
        _ => TokenPlan::Reauth,
    }
}

/// Build the token update for a successful refresh.
///
/// An empty refresh token in `result` keeps the stored one. A missing
/// `expires_in_seconds` clears the expiry.
pub fn refreshed_tokens(
    record: &CredentialRecord,
    result: &AuthResult,
    cipher: &dyn TokenCipher,
    now: DateTime<Utc>,
) -> Result<TokenUpdate> {
    let refresh_token_cipher = if result.refresh_token.is_empty() {
        record.refresh_token_cipher.clone()
    } else {
        Some(cipher.encrypt(result.refresh_token.expose())?)
    };

    let expires_at = result
        .expires_in_seconds
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta));

    Ok(TokenUpdate {
        access_token_cipher: cipher.encrypt(result.access_token.expose())?,
        refresh_token_cipher,
        expires_at,
    })
}

type RefreshLocks = HashMap<CredentialId, Arc<Mutex<()>>>;

/// A caller's share of a credential's refresh lock.
///
/// Dropping it (on return or cancellation) removes the map entry once
/// nobody else shares it.
struct LockLease<'a> {
    locks: &'a StdMutex<RefreshLocks>,
    id: CredentialId,
    lock: Arc<Mutex<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this lease still hold it.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.id);
        }
    }
}

/// Hands out valid access tokens for stored credentials.
pub struct TokenLifecycleManager {
    store: Arc<dyn CredentialStore>,
    registry: Arc<ProviderRegistry>,
    cipher: Arc<dyn TokenCipher>,
    config: LifecycleConfig,
    /// Per-credential refresh locks, pruned once no caller holds them.
    /// Never held across an await.
    refresh_locks: StdMutex<RefreshLocks>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        registry: Arc<ProviderRegistry>,
        cipher: Arc<dyn TokenCipher>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            registry,
            cipher,
            config,
            refresh_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Get a valid access token, refreshing and persisting it if expired.
    ///
    /// Calls for the same credential are serialized; a caller that waited
    /// on a refresh observes the refreshed token without refreshing again.
    ///
    /// # Errors
    /// - `IntegrationNotFound` if no live record exists
    /// - `IntegrationDisabled` if the record is disabled
    /// - `ReauthRequired` if the token expired without a refresh token
    /// - `TokenRefreshFailed` (tagged with the provider) if the refresh is rejected
    /// - `Timeout` if the refresh exceeds the configured bound
    #[instrument(skip(self), fields(credential_id = %id))]
    pub async fn get_access_token(&self, id: &CredentialId) -> Result<SecretString> {
        let lease = self.lease(id);
        let _guard = lease.lock.lock().await;
        self.check_and_refresh(id).await
    }

    fn locks(&self) -> MutexGuard<'_, RefreshLocks> {
        self.refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lease(&self, id: &CredentialId) -> LockLease<'_> {
        let lock = self
            .locks()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        LockLease {
            locks: &self.refresh_locks,
            id: id.clone(),
            lock,
        }
    }

    /// Must run under the credential's refresh lock.
    async fn check_and_refresh(&self, id: &CredentialId) -> Result<SecretString> {
        let record = self
            .store
            .get_credential(id)
            .await?
            .ok_or_else(|| Error::IntegrationNotFound(id.to_string()))?;

        match plan(&record, Utc::now(), self.config.expiry_skew()) {
            TokenPlan::UseStored => {
                debug!("Stored access token is valid");
                Ok(SecretString::new(
                    self.cipher.decrypt(&record.access_token_cipher)?,
                ))
            }
            TokenPlan::Disabled => Err(Error::IntegrationDisabled(id.to_string())),
            TokenPlan::Reauth => {
                warn!(provider = %record.provider, "Token expired without refresh token");
                if let Err(e) = self.store.set_health(id, HealthStatus::NeedsReauth).await {
                    warn!(error = %e, "Failed to record needs-reauth health");
                }
                Err(Error::ReauthRequired(id.to_string()))
            }
            TokenPlan::Refresh {
                refresh_token_cipher,
            } => self.refresh(&record, &refresh_token_cipher).await,
        }
    }

    async fn refresh(
        &self,
        record: &CredentialRecord,
        refresh_token_cipher: &str,
    ) -> Result<SecretString> {
        let provider = self.registry.get(&record.provider)?;
        let refresh_token = SecretString::new(self.cipher.decrypt(refresh_token_cipher)?);

        info!(provider = %record.provider, "Access token expired, refreshing");

        let result = match timeout(
            self.config.refresh_timeout(),
            provider.refresh(refresh_token.expose()),
        )
        .await
        {
            Ok(result) => result.inspect_err(|e| {
                warn!(error = %e, "Token refresh failed");
            })?,
            Err(_) => {
                warn!("Token refresh timed out");
                return Err(Error::Timeout(format!(
                    "Token refresh for credential {}",
                    record.id
                ))
                .in_provider(provider.name(), "refresh"));
            }
        };

        let now = Utc::now();
        let update = refreshed_tokens(record, &result, self.cipher.as_ref(), now)?;
        self.store.update_credential_tokens(&record.id, &update).await?;

        debug!(expires_at = ?update.expires_at, "Refreshed token persisted");
        Ok(result.access_token)
    }
}
