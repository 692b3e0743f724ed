//! OAuth2 authorization-code and refresh flows shared by the adapters.

use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, ErrorResponse, RedirectUrl, RefreshToken, RequestTokenError,
    Scope, TokenResponse, TokenUrl,
};
use tracing::debug;

use drivelink_common::{Error, Result, SecretString};

use crate::config::{HttpConfig, OAuthClientConfig};
use crate::provider::AuthRequest;

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Authorization and token endpoints of a provider.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
}

/// Tokens returned by the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_in_seconds: Option<u64>,
}

/// OAuth2 client for one provider.
///
/// Built even when client credentials are missing; in that case every
/// flow fails with `NotConfigured`.
pub struct OAuthClient {
    provider: &'static str,
    client: Option<ConfiguredClient>,
    http: oauth2::reqwest::Client,
    scopes: Vec<String>,
    extra_params: Vec<(&'static str, &'static str)>,
}

impl OAuthClient {
    /// Create a new OAuth client.
    ///
    /// # Errors
    /// - Invalid endpoint or redirect URL
    /// - HTTP client construction failure
    pub fn new(
        provider: &'static str,
        config: &OAuthClientConfig,
        endpoints: &OAuthEndpoints,
        http_config: &HttpConfig,
    ) -> Result<Self> {
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .timeout(http_config.timeout())
            .user_agent(http_config.user_agent.clone())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        let client = match (&config.client_id, &config.client_secret, &config.redirect_url) {
            (Some(id), Some(secret), Some(redirect)) if config.is_complete() => Some(
                BasicClient::new(ClientId::new(id.clone()))
                    .set_client_secret(ClientSecret::new(secret.clone()))
                    .set_auth_uri(
                        AuthUrl::new(endpoints.auth_url.clone())
                            .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
                    )
                    .set_token_uri(
                        TokenUrl::new(endpoints.token_url.clone())
                            .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
                    )
                    .set_redirect_uri(RedirectUrl::new(redirect.clone()).map_err(|e| {
                        Error::InvalidInput(format!("Invalid redirect URL: {}", e))
                    })?),
            ),
            _ => {
                debug!(provider, "OAuth client credentials absent, provider unconfigured");
                None
            }
        };

        Ok(Self {
            provider,
            client,
            http,
            scopes: Vec::new(),
            extra_params: Vec::new(),
        })
    }

    /// Add a scope requested during authorization.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Add an extra query parameter to the authorization URL.
    pub fn with_auth_param(mut self, name: &'static str, value: &'static str) -> Self {
        self.extra_params.push((name, value));
        self
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    fn configured(&self) -> Result<&ConfiguredClient> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::NotConfigured(self.provider.to_string()))
    }

    /// Generate the authorization URL and CSRF state.
    pub fn authorization_url(&self) -> Result<AuthRequest> {
        let client = self.configured()?;

        let mut request = client.authorize_url(CsrfToken::new_random);
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        for (name, value) in &self.extra_params {
            request = request.add_extra_param(*name, *value);
        }
        let (url, csrf_token) = request.url();

        Ok(AuthRequest {
            authorization_url: url.to_string(),
            state: csrf_token.secret().clone(),
        })
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// - `NotConfigured` without client credentials
    /// - `AuthenticationFailed` if the provider rejects the code
    /// - `Network` on transport failure
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        let client = self.configured()?;

        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| token_error(e, "Token exchange failed", Error::AuthenticationFailed))?;

        let access_token = response.access_token().secret().clone();
        if access_token.is_empty() {
            return Err(Error::AuthenticationFailed(
                "Token response contained no access token".to_string(),
            ));
        }

        Ok(TokenGrant {
            access_token: SecretString::new(access_token),
            refresh_token: response
                .refresh_token()
                .map(|t| SecretString::new(t.secret().clone())),
            expires_in_seconds: response.expires_in().map(|d| d.as_secs()),
        })
    }

    /// Refresh an access token.
    ///
    /// # Errors
    /// - `MissingRefreshToken` if `refresh_token` is empty
    /// - `NotConfigured` without client credentials
    /// - `TokenRefreshFailed` if the provider rejects the refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        if refresh_token.is_empty() {
            return Err(Error::MissingRefreshToken);
        }
        let client = self.configured()?;

        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| token_error(e, "Token refresh failed", Error::TokenRefreshFailed))?;

        let access_token = response.access_token().secret().clone();
        if access_token.is_empty() {
            return Err(Error::TokenRefreshFailed(
                "Token response contained no access token".to_string(),
            ));
        }

        Ok(TokenGrant {
            access_token: SecretString::new(access_token),
            refresh_token: response
                .refresh_token()
                .map(|t| SecretString::new(t.secret().clone())),
            expires_in_seconds: response.expires_in().map(|d| d.as_secs()),
        })
    }
}

fn token_error<RE, T>(
    err: RequestTokenError<RE, T>,
    context: &str,
    rejected: fn(String) -> Error,
) -> Error
where
    RE: std::error::Error + 'static,
    T: ErrorResponse + 'static,
{
    match err {
        RequestTokenError::Request(e) => Error::Network(format!("{}: {}", context, e)),
        other => rejected(format!("{}: {}", context, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(base: &str) -> OAuthEndpoints {
        OAuthEndpoints {
            auth_url: format!("{}/authorize", base),
            token_url: format!("{}/token", base),
        }
    }

    fn client(base: &str) -> OAuthClient {
        OAuthClient::new(
            "test",
            &OAuthClientConfig::new("test_id", "test_secret", "http://localhost:8080/callback"),
            &endpoints(base),
            &HttpConfig::default(),
        )
        .unwrap()
        .with_scope("files.read")
        .with_auth_param("access_type", "offline")
    }

    #[test]
    fn test_authorization_url_generation() {
        let request = client("https://auth.example.com").authorization_url().unwrap();

        assert!(request.authorization_url.starts_with("https://auth.example.com/authorize"));
        assert!(request.authorization_url.contains("client_id=test_id"));
        assert!(request.authorization_url.contains("scope=files.read"));
        assert!(request.authorization_url.contains("access_type=offline"));
        assert!(request
            .authorization_url
            .contains(&format!("state={}", request.state)));
        assert!(!request.state.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_per_call() {
        let client = OAuthClient::new(
            "test",
            &OAuthClientConfig::default(),
            &endpoints("https://auth.example.com"),
            &HttpConfig::default(),
        )
        .unwrap();

        assert!(!client.is_configured());
        assert!(matches!(client.authorization_url(), Err(Error::NotConfigured(_))));
        assert!(matches!(
            client.exchange_code("code").await,
            Err(Error::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at-1","token_type":"bearer","expires_in":3600,"refresh_token":"rt-1"}"#,
            )
            .create_async()
            .await;

        let grant = client(&server.url()).exchange_code("code-123").await.unwrap();

        mock.assert_async().await;
        assert_eq!(grant.access_token.expose(), "at-1");
        assert_eq!(grant.refresh_token.unwrap().expose(), "rt-1");
        assert_eq!(grant.expires_in_seconds, Some(3600));
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let result = client(&server.url()).exchange_code("bad").await;
        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let result = client(&server.url()).refresh("revoked").await;
        assert!(matches!(result, Err(Error::TokenRefreshFailed(_))));
    }

    #[tokio::test]
    async fn test_refresh_without_token() {
        let result = client("https://auth.example.com").refresh("").await;
        assert!(matches!(result, Err(Error::MissingRefreshToken)));
    }
}
