//! Dropbox storage provider implementation.

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use drivelink_common::{Error, ProviderContext, Result, SecretString};

use crate::config::{HttpConfig, OAuthClientConfig};
use crate::http::{body_stream, build_client};
use crate::oauth::{OAuthClient, OAuthEndpoints};
use crate::provider::{
    mime_from_name, AuthRequest, AuthResult, Capabilities, Download, FileList, FileMetadata,
    StorageProvider, StorageQuota, Thumbnail,
};

use super::client::{
    to_direct_link, DropboxClient, DropboxEntry, ListFolderResponse, SearchResponse,
    DROPBOX_API_BASE, DROPBOX_CONTENT_BASE,
};

/// Provider identifier.
pub const PROVIDER_NAME: &str = "dropbox";

const DROPBOX_AUTH_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const DROPBOX_TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";

const SCOPES: [&str; 4] = [
    "account_info.read",
    "files.metadata.read",
    "files.content.read",
    "sharing.write",
];

/// MIME type reported for folders.
const FOLDER_MIME: &str = "inode/directory";

const BATCH_CONCURRENCY: usize = 8;

/// Dropbox provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropboxConfig {
    #[serde(default)]
    pub auth: OAuthClientConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_content_base")]
    pub content_base: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_api_base() -> String {
    DROPBOX_API_BASE.to_string()
}

fn default_content_base() -> String {
    DROPBOX_CONTENT_BASE.to_string()
}

fn default_auth_url() -> String {
    DROPBOX_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    DROPBOX_TOKEN_URL.to_string()
}

impl Default for DropboxConfig {
    fn default() -> Self {
        Self {
            auth: OAuthClientConfig::default(),
            http: HttpConfig::default(),
            api_base: default_api_base(),
            content_base: default_content_base(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
        }
    }
}

/// Dropbox storage provider.
///
/// Supports public-link creation; has no export and no shared drives.
pub struct DropboxProvider {
    oauth: OAuthClient,
    client: DropboxClient,
}

impl DropboxProvider {
    /// Create a new Dropbox provider.
    ///
    /// # Errors
    /// - Invalid endpoint URLs
    /// - HTTP client construction failure
    pub fn new(config: DropboxConfig) -> Result<Self> {
        let endpoints = OAuthEndpoints {
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
        };

        let oauth = SCOPES.iter().fold(
            OAuthClient::new(PROVIDER_NAME, &config.auth, &endpoints, &config.http)?,
            |client, scope| client.with_scope(*scope),
        );
        let oauth = oauth.with_auth_param("token_access_type", "offline");

        let client = DropboxClient::new(
            build_client(&config.http)?,
            config.api_base,
            config.content_base,
        )
        .with_request_timeout(config.http.timeout());

        Ok(Self { oauth, client })
    }

    /// Normalize an entry; deleted entries have no metadata.
    fn to_metadata(entry: DropboxEntry) -> Option<FileMetadata> {
        match entry {
            DropboxEntry::File(file) => Some(FileMetadata {
                mime_type: mime_from_name(&file.name).to_string(),
                modified_time: file
                    .server_modified
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
                size_bytes: file.size,
                is_folder: false,
                path: file.path_display,
                id: file.id,
                name: file.name,
            }),
            DropboxEntry::Folder(folder) => Some(FileMetadata {
                id: folder.id,
                name: folder.name,
                mime_type: FOLDER_MIME.to_string(),
                size_bytes: 0,
                modified_time: String::new(),
                is_folder: true,
                path: folder.path_display,
            }),
            DropboxEntry::Deleted(_) => None,
        }
    }

    fn folder_page(response: ListFolderResponse) -> FileList {
        FileList {
            files: response
                .entries
                .into_iter()
                .filter_map(Self::to_metadata)
                .collect(),
            next_page_token: response.has_more.then_some(response.cursor),
        }
    }

    fn search_page(response: SearchResponse) -> FileList {
        FileList {
            files: response
                .matches
                .into_iter()
                .filter_map(|m| Self::to_metadata(m.metadata.metadata))
                .collect(),
            next_page_token: if response.has_more {
                response.cursor
            } else {
                None
            },
        }
    }

    async fn fetch(&self, token: &str, file_id: &str) -> Result<FileMetadata> {
        let entry = self.client.get_metadata(token, file_id).await?;
        Self::to_metadata(entry).ok_or_else(|| Error::FileNotFound(file_id.to_string()))
    }

    async fn exchange(&self, code: &str) -> Result<AuthResult> {
        let grant = self.oauth.exchange_code(code).await?;
        let token = grant.access_token.expose();

        let account = self
            .client
            .current_account(token)
            .await
            .map_err(|e| Error::AuthenticationFailed(format!("Identity lookup failed: {}", e)))?;

        let quota = match self.client.space_usage(token).await {
            Ok(usage) => Some(StorageQuota {
                used_bytes: usage.used,
                total_bytes: usage.allocation.allocated,
            }),
            Err(e) => {
                warn!(error = %e, "Quota lookup failed, continuing without quota");
                None
            }
        };

        Ok(AuthResult {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or_else(|| SecretString::new("")),
            expires_in_seconds: grant.expires_in_seconds,
            external_account_id: account.account_id,
            email: account.email,
            display_name: account.name.display_name,
            quota,
        })
    }

    async fn download_file(&self, token: &str, file_id: &str) -> Result<Download> {
        let content = self.client.download(token, file_id).await?;
        let filename = content
            .filename
            .unwrap_or_else(|| file_id.trim_start_matches("id:").to_string());

        Ok(Download {
            mime_type: mime_from_name(&filename).to_string(),
            filename,
            stream: body_stream(content.response),
        })
    }

    async fn public_link(&self, token: &str, file_id: &str) -> Result<String> {
        let shared = self.client.shared_link(token, file_id).await?;
        debug!(file_id, "Shared link obtained");
        to_direct_link(&shared)
    }
}

#[async_trait]
impl StorageProvider for DropboxProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        self.oauth.is_configured()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            thumbnail: true,
            batch_metadata: true,
            shared_drives: false,
            export: false,
            public_link: true,
        }
    }

    fn begin_auth(&self) -> Result<AuthRequest> {
        self.oauth
            .authorization_url()
            .provider_context(PROVIDER_NAME, "begin_auth")
    }

    async fn exchange_code(&self, code: &str) -> Result<AuthResult> {
        self.exchange(code)
            .await
            .provider_context(PROVIDER_NAME, "exchange_code")
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResult> {
        // Dropbox refresh responses never rotate the refresh token.
        let grant = self
            .oauth
            .refresh(refresh_token)
            .await
            .provider_context(PROVIDER_NAME, "refresh")?;

        Ok(AuthResult {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or_else(|| SecretString::new("")),
            expires_in_seconds: grant.expires_in_seconds,
            external_account_id: String::new(),
            email: String::new(),
            display_name: String::new(),
            quota: None,
        })
    }

    async fn list_files(
        &self,
        access_token: &str,
        folder: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FileList> {
        let response = match page_token {
            Some(cursor) => self.client.list_folder_continue(access_token, cursor).await,
            None => self.client.list_folder(access_token, folder.unwrap_or("")).await,
        };

        response
            .map(Self::folder_page)
            .provider_context(PROVIDER_NAME, "list_files")
    }

    async fn get_file(&self, access_token: &str, file_id: &str) -> Result<FileMetadata> {
        self.fetch(access_token, file_id)
            .await
            .provider_context(PROVIDER_NAME, "get_file")
    }

    async fn download(&self, access_token: &str, file_id: &str) -> Result<Download> {
        self.download_file(access_token, file_id)
            .await
            .map(|download| download.in_provider(PROVIDER_NAME, "download"))
            .provider_context(PROVIDER_NAME, "download")
    }

    async fn get_download_url(
        &self,
        access_token: &str,
        file_id: &str,
        _expires_in_seconds: Option<u64>,
    ) -> Result<String> {
        // Temporary links have a fixed lifetime.
        self.client
            .temporary_link(access_token, file_id)
            .await
            .provider_context(PROVIDER_NAME, "get_download_url")
    }

    async fn search(
        &self,
        access_token: &str,
        query: &str,
        folder: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FileList> {
        let response = match page_token {
            Some(cursor) => self.client.search_continue(access_token, cursor).await,
            None => self.client.search(access_token, query, folder).await,
        };

        response
            .map(Self::search_page)
            .provider_context(PROVIDER_NAME, "search")
    }

    async fn thumbnail(&self, access_token: &str, file_id: &str) -> Result<Thumbnail> {
        let data = self
            .client
            .thumbnail(access_token, file_id)
            .await
            .provider_context(PROVIDER_NAME, "thumbnail")?;

        Ok(Thumbnail::Inline {
            mime_type: "image/jpeg".to_string(),
            data,
        })
    }

    async fn batch_metadata(
        &self,
        access_token: &str,
        file_ids: &[String],
    ) -> Result<Vec<FileMetadata>> {
        let lookups: Vec<_> = file_ids
            .iter()
            .map(|id| self.fetch(access_token, id))
            .collect();

        stream::iter(lookups)
            .buffered(BATCH_CONCURRENCY)
            .try_collect::<Vec<_>>()
            .await
            .provider_context(PROVIDER_NAME, "batch_metadata")
    }

    async fn create_public_link(&self, access_token: &str, file_id: &str) -> Result<String> {
        self.public_link(access_token, file_id)
            .await
            .provider_context(PROVIDER_NAME, "create_public_link")
    }
}
