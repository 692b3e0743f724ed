//! CLI configuration: a JSON file plus environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use drivelink_credentials::{LifecycleConfig, OAUTH_STATE_TTL};
use drivelink_crypto::TokenKey;
use drivelink_media::ResolverConfig;
use drivelink_storage::{DropboxConfig, GDriveConfig, OAuthClientConfig};

/// Everything the `drivelink` binary needs to wire the services together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gdrive: GDriveConfig,
    #[serde(default)]
    pub dropbox: DropboxConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Credential database; defaults to the user data directory.
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Base64 token encryption key.
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub state_ttl_secs: Option<u64>,
}

impl AppConfig {
    /// Load from `path` when given, otherwise start from defaults, then
    /// apply `DRIVELINK_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => AppConfig::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_auth(&mut self.gdrive.auth, "DRIVELINK_GDRIVE", &lookup);
        override_auth(&mut self.dropbox.auth, "DRIVELINK_DROPBOX", &lookup);

        if let Some(key) = lookup("DRIVELINK_ENCRYPTION_KEY") {
            self.encryption_key = Some(key);
        }
        if let Some(path) = lookup("DRIVELINK_DATABASE") {
            self.database = Some(PathBuf::from(path));
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir().context("No data directory; set DRIVELINK_DATABASE")?;
        Ok(data_dir.join("drivelink").join("credentials.db"))
    }

    pub fn token_key(&self) -> Result<TokenKey> {
        let encoded = self
            .encryption_key
            .as_deref()
            .context("No encryption key; run `drivelink keygen` and set DRIVELINK_ENCRYPTION_KEY")?;
        TokenKey::from_base64(encoded).context("Invalid encryption key")
    }

    pub fn state_ttl(&self) -> u64 {
        self.state_ttl_secs.unwrap_or(OAUTH_STATE_TTL)
    }
}

fn override_auth(
    auth: &mut OAuthClientConfig,
    prefix: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = lookup(&format!("{}_CLIENT_ID", prefix)) {
        auth.client_id = Some(v);
    }
    if let Some(v) = lookup(&format!("{}_CLIENT_SECRET", prefix)) {
        auth.client_secret = Some(v);
    }
    if let Some(v) = lookup(&format!("{}_REDIRECT_URL", prefix)) {
        auth.redirect_url = Some(v);
    }
}
