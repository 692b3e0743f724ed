//! Google Drive storage provider implementation.

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use drivelink_common::{Error, ProviderContext, Result, SecretString};

use crate::config::{HttpConfig, OAuthClientConfig};
use crate::http::build_client;
use crate::oauth::{OAuthClient, OAuthEndpoints};
use crate::provider::{
    AuthRequest, AuthResult, Capabilities, Download, FileList, FileMetadata, SharedDrive,
    SharedDriveList, StorageProvider, StorageQuota, Thumbnail,
};

use super::client::{escape_query_literal, DriveClient, DriveFile, DRIVE_API_BASE};

/// Provider identifier.
pub const PROVIDER_NAME: &str = "gdrive";

/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Read-only Drive scope.
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Concurrent requests used for batch metadata.
const BATCH_CONCURRENCY: usize = 8;

/// Google Drive provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GDriveConfig {
    #[serde(default)]
    pub auth: OAuthClientConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_api_base() -> String {
    DRIVE_API_BASE.to_string()
}

fn default_auth_url() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

impl Default for GDriveConfig {
    fn default() -> Self {
        Self {
            auth: OAuthClientConfig::default(),
            http: HttpConfig::default(),
            api_base: default_api_base(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
        }
    }
}

/// Export target for a Google-native document: (MIME type, file extension).
pub fn export_format(native_mime: &str) -> Option<(&'static str, &'static str)> {
    match native_mime {
        "application/vnd.google-apps.document" => Some(("application/pdf", "pdf")),
        "application/vnd.google-apps.presentation" => Some(("application/pdf", "pdf")),
        "application/vnd.google-apps.spreadsheet" => Some((
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "xlsx",
        )),
        "application/vnd.google-apps.drawing" => Some(("image/png", "png")),
        _ => None,
    }
}

/// Google Drive storage provider.
///
/// Supports export and shared drives; has no native public-link creation.
pub struct GDriveProvider {
    oauth: OAuthClient,
    client: DriveClient,
}

impl GDriveProvider {
    /// Create a new Google Drive provider.
    ///
    /// Missing client credentials do not fail construction; see
    /// [`StorageProvider::is_configured`].
    ///
    /// # Errors
    /// - Invalid endpoint URLs
    /// - HTTP client construction failure
    pub fn new(config: GDriveConfig) -> Result<Self> {
        let endpoints = OAuthEndpoints {
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
        };

        let oauth = OAuthClient::new(PROVIDER_NAME, &config.auth, &endpoints, &config.http)?
            .with_scope(DRIVE_SCOPE)
            .with_auth_param("access_type", "offline")
            .with_auth_param("prompt", "consent");

        let client = DriveClient::new(build_client(&config.http)?, config.api_base)
            .with_request_timeout(config.http.timeout());

        Ok(Self { oauth, client })
    }

    /// Convert DriveFile to normalized metadata.
    fn to_metadata(file: DriveFile) -> FileMetadata {
        FileMetadata {
            size_bytes: file.size_bytes().unwrap_or(0),
            is_folder: file.is_folder(),
            modified_time: file
                .modified_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            path: None,
        }
    }

    async fn fetch(&self, token: &str, file_id: &str) -> Result<DriveFile> {
        let file = self.client.get_file(token, file_id).await?;
        if file.trashed {
            return Err(Error::FileNotFound(file_id.to_string()));
        }
        Ok(file)
    }

    async fn exchange(&self, code: &str) -> Result<AuthResult> {
        let grant = self.oauth.exchange_code(code).await?;

        let about = self
            .client
            .about(grant.access_token.expose())
            .await
            .map_err(|e| Error::AuthenticationFailed(format!("Identity lookup failed: {}", e)))?;

        let quota = about.storage_quota.map(|q| StorageQuota {
            used_bytes: q.usage.and_then(|u| u.parse().ok()).unwrap_or(0),
            total_bytes: q.limit.and_then(|l| l.parse().ok()),
        });

        Ok(AuthResult {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or_else(|| SecretString::new("")),
            expires_in_seconds: grant.expires_in_seconds,
            external_account_id: about.user.permission_id,
            email: about.user.email_address,
            display_name: about.user.display_name,
            quota,
        })
    }

    async fn download_file(&self, token: &str, file_id: &str) -> Result<Download> {
        let file = self.fetch(token, file_id).await?;

        if file.is_folder() {
            return Err(Error::InvalidInput(format!("{} is a folder", file_id)));
        }

        if file.is_native_document() {
            let (mime_type, ext) = export_format(&file.mime_type).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{} ({}) has no downloadable content",
                    file_id, file.mime_type
                ))
            })?;
            debug!(file_id, mime_type, "Exporting native document for download");
            return self.export_file(token, &file, mime_type, ext).await;
        }

        let stream = self.client.download_stream(token, file_id).await?;
        Ok(Download {
            stream,
            filename: file.name,
            mime_type: file.mime_type,
        })
    }

    async fn export_file(
        &self,
        token: &str,
        file: &DriveFile,
        mime_type: &str,
        ext: &str,
    ) -> Result<Download> {
        let stream = self.client.export_stream(token, &file.id, mime_type).await?;
        Ok(Download {
            stream,
            filename: format!("{}.{}", file.name, ext),
            mime_type: mime_type.to_string(),
        })
    }

    fn page(response: super::client::FileListResponse) -> FileList {
        FileList {
            files: response.files.into_iter().map(Self::to_metadata).collect(),
            next_page_token: response.next_page_token,
        }
    }
}

#[async_trait]
impl StorageProvider for GDriveProvider {
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
            shared_drives: true,
            export: true,
            public_link: false,
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
        let folder = folder.unwrap_or("root");
        let query = format!(
            "'{}' in parents and trashed = false",
            escape_query_literal(folder)
        );

        self.client
            .query_files(access_token, &query, page_token)
            .await
            .map(Self::page)
            .provider_context(PROVIDER_NAME, "list_files")
    }

    async fn get_file(&self, access_token: &str, file_id: &str) -> Result<FileMetadata> {
        self.fetch(access_token, file_id)
            .await
            .map(Self::to_metadata)
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
        // Drive links do not expire; the expiry hint is ignored.
        let file = self
            .fetch(access_token, file_id)
            .await
            .provider_context(PROVIDER_NAME, "get_download_url")?;

        match file.web_content_link {
            Some(link) => Ok(link),
            None => self
                .client
                .media_url(&file.id)
                .provider_context(PROVIDER_NAME, "get_download_url"),
        }
    }

    async fn search(
        &self,
        access_token: &str,
        query: &str,
        folder: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FileList> {
        let mut q = format!(
            "name contains '{}' and trashed = false",
            escape_query_literal(query)
        );
        if let Some(folder) = folder {
            q.push_str(&format!(" and '{}' in parents", escape_query_literal(folder)));
        }

        self.client
            .query_files(access_token, &q, page_token)
            .await
            .map(Self::page)
            .provider_context(PROVIDER_NAME, "search")
    }

    async fn thumbnail(&self, access_token: &str, file_id: &str) -> Result<Thumbnail> {
        let file = self
            .fetch(access_token, file_id)
            .await
            .provider_context(PROVIDER_NAME, "thumbnail")?;

        file.thumbnail_link.map(Thumbnail::Url).ok_or_else(|| {
            Error::NotFound(format!("No thumbnail for {}", file_id))
                .in_provider(PROVIDER_NAME, "thumbnail")
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
            .map_ok(Self::to_metadata)
            .try_collect::<Vec<_>>()
            .await
            .provider_context(PROVIDER_NAME, "batch_metadata")
    }

    async fn list_shared_drives(
        &self,
        access_token: &str,
        page_token: Option<&str>,
    ) -> Result<SharedDriveList> {
        let response = self
            .client
            .list_drives(access_token, page_token)
            .await
            .provider_context(PROVIDER_NAME, "list_shared_drives")?;

        Ok(SharedDriveList {
            drives: response
                .drives
                .into_iter()
                .map(|d| SharedDrive {
                    id: d.id,
                    name: d.name,
                })
                .collect(),
            next_page_token: response.next_page_token,
        })
    }

    async fn export(&self, access_token: &str, file_id: &str, mime_type: &str) -> Result<Download> {
        let result: Result<Download> = async {
            let file = self.fetch(access_token, file_id).await?;
            let ext = match export_format(&file.mime_type) {
                Some((native_target, ext)) if native_target == mime_type => ext,
                _ => {
                    warn!(file_id, mime_type, "Export target not in default table");
                    mime_type.rsplit('/').next().unwrap_or("bin")
                }
            };
            self.export_file(access_token, &file, mime_type, ext).await
        }
        .await;

        result
            .map(|download| download.in_provider(PROVIDER_NAME, "export"))
            .provider_context(PROVIDER_NAME, "export")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivelink_common::ErrorKind;
    use mockito::Matcher;

    fn config(base: &str) -> GDriveConfig {
        GDriveConfig {
            auth: OAuthClientConfig::new("test_client", "test_secret", "http://localhost/cb"),
            http: HttpConfig::default(),
            api_base: base.to_string(),
            auth_url: format!("{}/auth", base),
            token_url: format!("{}/token", base),
        }
    }

    async fn collect(download: Download) -> Vec<u8> {
        let chunks: Vec<bytes::Bytes> = download.stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[test]
    fn test_unconfigured_provider_constructs() {
        let provider = GDriveProvider::new(GDriveConfig::default()).unwrap();

        assert_eq!(provider.name(), "gdrive");
        assert!(!provider.is_configured());
        let err = provider.begin_auth().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConfigured);
    }

    #[test]
    fn test_capabilities() {
        let provider = GDriveProvider::new(GDriveConfig::default()).unwrap();
        let caps = provider.capabilities();

        assert!(caps.export && caps.shared_drives);
        assert!(!caps.public_link);
    }

    #[test]
    fn test_begin_auth_requests_offline_access() {
        let provider = GDriveProvider::new(config("https://accounts.example.com")).unwrap();
        let request = provider.begin_auth().unwrap();

        assert!(request.authorization_url.contains("access_type=offline"));
        assert!(request.authorization_url.contains("prompt=consent"));
        assert!(request.authorization_url.contains("drive.readonly"));
    }

    #[test]
    fn test_to_metadata_normalizes() {
        let json = r#"{
            "id": "file_id",
            "name": "photo.jpg",
            "mimeType": "image/jpeg",
            "size": "2048",
            "modifiedTime": "2024-03-01T10:00:00Z"
        }"#;
        let file: DriveFile = serde_json::from_str(json).unwrap();
        let meta = GDriveProvider::to_metadata(file);

        assert_eq!(meta.id, "file_id");
        assert_eq!(meta.size_bytes, 2048);
        assert_eq!(meta.modified_time, "2024-03-01T10:00:00+00:00");
        assert!(!meta.is_folder);
        assert_eq!(meta.path, None);
    }

    #[tokio::test]
    async fn test_get_file_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/files/missing")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error":{"code":404}}"#)
            .create_async()
            .await;

        let provider = GDriveProvider::new(config(&server.url())).unwrap();
        let err = provider.get_file("token", "missing").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert!(err.to_string().starts_with("gdrive get_file"));
    }

    #[tokio::test]
    async fn test_list_files_defaults_to_root() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "q".into(),
                    "'root' in parents and trashed = false".into(),
                ),
                Matcher::UrlEncoded("pageToken".into(), "opaque-1".into()),
            ]))
            .match_header("authorization", "Bearer token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"files":[{"id":"a","name":"A","mimeType":"application/vnd.google-apps.folder"}],"nextPageToken":"opaque-2"}"#,
            )
            .create_async()
            .await;

        let provider = GDriveProvider::new(config(&server.url())).unwrap();
        let page = provider
            .list_files("token", None, Some("opaque-1"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(page.files.len(), 1);
        assert!(page.files[0].is_folder);
        assert_eq!(page.next_page_token.as_deref(), Some("opaque-2"));
    }

    #[tokio::test]
    async fn test_download_exports_native_document() {
        let mut server = mockito::Server::new_async().await;
        let _meta = server
            .mock("GET", "/files/doc1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"doc1","name":"Plan","mimeType":"application/vnd.google-apps.document"}"#)
            .create_async()
            .await;
        let export = server
            .mock("GET", "/files/doc1/export")
            .match_query(Matcher::UrlEncoded("mimeType".into(), "application/pdf".into()))
            .with_status(200)
            .with_body("%PDF-1.4")
            .create_async()
            .await;

        let provider = GDriveProvider::new(config(&server.url())).unwrap();
        let download = provider.download("token", "doc1").await.unwrap();

        assert_eq!(download.filename, "Plan.pdf");
        assert_eq!(download.mime_type, "application/pdf");
        assert_eq!(collect(download).await, b"%PDF-1.4");
        export.assert_async().await;
    }

    #[tokio::test]
    async fn test_batch_metadata_keeps_input_order() {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = Vec::new();
        for (id, name) in [("b1", "second.png"), ("a1", "first.jpg")] {
            let mock = server
                .mock("GET", format!("/files/{}", id).as_str())
                .match_query(Matcher::Any)
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(format!(
                    r#"{{"id":"{}","name":"{}","mimeType":"image/jpeg"}}"#,
                    id, name
                ))
                .create_async()
                .await;
            mocks.push(mock);
        }

        let provider = GDriveProvider::new(config(&server.url())).unwrap();
        let ids = vec!["a1".to_string(), "b1".to_string()];
        let files = provider.batch_metadata("token", &ids).await.unwrap();

        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["first.jpg", "second.png"]);
    }

    #[tokio::test]
    async fn test_slow_download_outlives_request_timeout() {
        use std::io::Write;

        let mut server = mockito::Server::new_async().await;
        let _meta = server
            .mock("GET", "/files/vid1")
            .match_query(Matcher::Regex("fields=".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"vid1","name":"clip.mp4","mimeType":"video/mp4","size":"30"}"#)
            .create_async()
            .await;
        let _media = server
            .mock("GET", "/files/vid1")
            .match_query(Matcher::UrlEncoded("alt".into(), "media".into()))
            .with_status(200)
            .with_chunked_body(|w| {
                for _ in 0..3 {
                    w.write_all(b"0123456789")?;
                    w.flush()?;
                    std::thread::sleep(std::time::Duration::from_millis(600));
                }
                Ok(())
            })
            .create_async()
            .await;

        let mut config = config(&server.url());
        config.http.timeout_secs = 1;
        let provider = GDriveProvider::new(config).unwrap();

        let download = provider.download("token", "vid1").await.unwrap();
        assert_eq!(collect(download).await.len(), 30);
    }

    #[tokio::test]
    async fn test_exchange_code_fetches_identity() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at","token_type":"Bearer","expires_in":3599,"refresh_token":"rt"}"#,
            )
            .create_async()
            .await;
        let _about = server
            .mock("GET", "/about")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer at")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"user":{"displayName":"Ada","emailAddress":"ada@example.com","permissionId":"p-1"},
                    "storageQuota":{"usage":"100","limit":"1000"}}"#,
            )
            .create_async()
            .await;

        let provider = GDriveProvider::new(config(&server.url())).unwrap();
        let result = provider.exchange_code("code").await.unwrap();

        assert_eq!(result.access_token.expose(), "at");
        assert_eq!(result.refresh_token.expose(), "rt");
        assert_eq!(result.expires_in_seconds, Some(3599));
        assert_eq!(result.external_account_id, "p-1");
        assert_eq!(result.email, "ada@example.com");
        assert_eq!(
            result.quota,
            Some(StorageQuota {
                used_bytes: 100,
                total_bytes: Some(1000)
            })
        );
    }

    #[tokio::test]
    async fn test_public_link_not_supported() {
        let provider = GDriveProvider::new(GDriveConfig::default()).unwrap();
        let err = provider.create_public_link("token", "f1").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CapabilityNotSupported);
        assert!(err.to_string().contains("public-link-creation"));
    }
}
