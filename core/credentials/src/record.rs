//! Stored credential records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use drivelink_common::{CredentialId, Error, Result, UserId};

/// Health of a stored credential as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    NeedsReauth,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::NeedsReauth => "needs-reauth",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "needs-reauth" => Ok(HealthStatus::NeedsReauth),
            other => Err(Error::InvalidInput(format!(
                "Unknown health status: {}",
                other
            ))),
        }
    }
}

/// One connected drive account.
///
/// Token fields hold ciphertext only. They change solely through a
/// successful refresh ([`CredentialRecord::apply_tokens`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: CredentialId,
    pub owner_user_id: UserId,
    /// Registry identifier of the adapter.
    pub provider: String,
    pub access_token_cipher: String,
    pub refresh_token_cipher: Option<String>,
    /// `None` means the token does not expire or the expiry is unknown.
    pub expires_at: Option<DateTime<Utc>>,
    pub disabled: bool,
    pub health_status: HealthStatus,
    pub external_account_id: String,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Create a healthy, enabled record with no identity details.
    pub fn new(
        id: CredentialId,
        owner_user_id: UserId,
        provider: impl Into<String>,
        access_token_cipher: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_user_id,
            provider: provider.into(),
            access_token_cipher: access_token_cipher.into(),
            refresh_token_cipher: None,
            expires_at: None,
            disabled: false,
            health_status: HealthStatus::Healthy,
            external_account_id: String::new(),
            email: String::new(),
            display_name: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether a non-empty refresh token is stored.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token_cipher
            .as_deref()
            .is_some_and(|c| !c.is_empty())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Apply refreshed token material and mark the record healthy.
    pub fn apply_tokens(&mut self, update: &TokenUpdate, now: DateTime<Utc>) {
        self.access_token_cipher = update.access_token_cipher.clone();
        self.refresh_token_cipher = update.refresh_token_cipher.clone();
        self.expires_at = update.expires_at;
        self.health_status = HealthStatus::Healthy;
        self.updated_at = now;
    }
}

/// Token material persisted after a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUpdate {
    pub access_token_cipher: String,
    pub refresh_token_cipher: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}
