//! Provider configuration shared by the adapters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OAuth2 client credentials for one provider.
///
/// Any absent field leaves the provider unconfigured; the adapter still
/// constructs so the application can start without every provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl OAuthClientConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            redirect_url: Some(redirect_url.into()),
        }
    }

    /// Whether id, secret and redirect URL are all present and non-empty.
    pub fn is_complete(&self) -> bool {
        [&self.client_id, &self.client_secret, &self.redirect_url]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

/// HTTP client settings applied to every provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Deadline for a metadata request. Downloads are only bounded by
    /// this per connect and per read, so a slow transfer that keeps
    /// making progress completes.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("drivelink/{}", env!("CARGO_PKG_VERSION"))
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_oauth_config() {
        assert!(!OAuthClientConfig::default().is_complete());

        let partial = OAuthClientConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("".to_string()),
            redirect_url: Some("http://localhost/cb".to_string()),
        };
        assert!(!partial.is_complete());

        assert!(OAuthClientConfig::new("id", "secret", "http://localhost/cb").is_complete());
    }

    #[test]
    fn test_http_config_defaults_from_empty_json() {
        let config: HttpConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.user_agent.starts_with("drivelink/"));
    }
}
