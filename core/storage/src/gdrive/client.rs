//! Google Drive API client.

use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use drivelink_common::{Error, Result};

use crate::config::HttpConfig;
use crate::http::{body_stream, check_status, read_json, transport_error};
use crate::provider::ByteStream;

/// Google Drive API base URL.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Folder MIME type.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Fields requested for every file resource.
const FILE_FIELDS: &str =
    "id,name,mimeType,size,modifiedTime,parents,trashed,thumbnailLink,webContentLink";

/// Page size for listing and search.
const PAGE_SIZE: &str = "100";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// File size in bytes, sent as a string (absent for folders and native docs).
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub thumbnail_link: Option<String>,
    #[serde(default)]
    pub web_content_link: Option<String>,
}

impl DriveFile {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    /// Whether this is a Google-native document that has no binary content.
    pub fn is_native_document(&self) -> bool {
        self.mime_type.starts_with("application/vnd.google-apps.") && !self.is_folder()
    }

    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListResponse {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Response from listing shared drives.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveListResponse {
    #[serde(default)]
    pub drives: Vec<DriveSummary>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutUser {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub permission_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutQuota {
    /// Absent for unlimited plans.
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
}

/// Response from the `about` endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    #[serde(default)]
    pub user: AboutUser,
    #[serde(default)]
    pub storage_quota: Option<AboutQuota>,
}

/// Google Drive API client.
///
/// Stateless apart from the HTTP connection pool; every call carries the
/// caller's access token.
pub struct DriveClient {
    http: Client,
    api_base: String,
    request_timeout: Duration,
}

impl DriveClient {
    pub fn new(http: Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            request_timeout: HttpConfig::default().timeout(),
        }
    }

    /// Deadline for metadata calls; streams are not bounded by it.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    /// `{api_base}/files/{file_id}/{tail..}` with the id as one encoded segment.
    fn file_url(&self, file_id: &str, tail: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| Error::InvalidInput(format!("Invalid API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("Invalid API base: {}", self.api_base)))?
            .pop_if_empty()
            .push("files")
            .push(file_id)
            .extend(tail);
        Ok(url)
    }

    /// Account identity and quota.
    pub async fn about(&self, token: &str) -> Result<About> {
        let url = format!("{}/about", self.api_base);

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, Self::bearer(token))
            .timeout(self.request_timeout)
            .query(&[(
                "fields",
                "user(displayName,emailAddress,permissionId),storageQuota(limit,usage)",
            )])
            .send()
            .await
            .map_err(|e| transport_error("Failed to fetch account", e))?;

        read_json(response, "about").await
    }

    /// Get file metadata by ID.
    pub async fn get_file(&self, token: &str, file_id: &str) -> Result<DriveFile> {
        let url = self.file_url(file_id, &[])?;

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, Self::bearer(token))
            .timeout(self.request_timeout)
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .send()
            .await
            .map_err(|e| transport_error("Failed to get file", e))?;

        read_json(response, file_id).await
    }

    /// Run a files query and return one page.
    pub async fn query_files(
        &self,
        token: &str,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileListResponse> {
        let url = format!("{}/files", self.api_base);
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);

        let mut request = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, Self::bearer(token))
            .timeout(self.request_timeout)
            .query(&[
                ("q", query),
                ("fields", fields.as_str()),
                ("pageSize", PAGE_SIZE),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("Failed to list files", e))?;

        read_json(response, "files").await
    }

    /// List one page of shared drives.
    pub async fn list_drives(
        &self,
        token: &str,
        page_token: Option<&str>,
    ) -> Result<DriveListResponse> {
        let url = format!("{}/drives", self.api_base);

        let mut request = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, Self::bearer(token))
            .timeout(self.request_timeout)
            .query(&[("pageSize", PAGE_SIZE)]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("Failed to list drives", e))?;

        read_json(response, "drives").await
    }

    /// URL serving the raw file content (requires a bearer token).
    pub fn media_url(&self, file_id: &str) -> Result<String> {
        let mut url = self.file_url(file_id, &[])?;
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url.into())
    }

    /// Download file as a stream.
    pub async fn download_stream(&self, token: &str, file_id: &str) -> Result<ByteStream> {
        let url = self.file_url(file_id, &[])?;

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, Self::bearer(token))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await
            .map_err(|e| transport_error("Failed to start download", e))?;

        let response = check_status(response, file_id).await?;
        Ok(body_stream(response))
    }

    /// Export a native document as a stream.
    pub async fn export_stream(
        &self,
        token: &str,
        file_id: &str,
        mime_type: &str,
    ) -> Result<ByteStream> {
        let url = self.file_url(file_id, &["export"])?;

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, Self::bearer(token))
            .query(&[("mimeType", mime_type)])
            .send()
            .await
            .map_err(|e| transport_error("Failed to start export", e))?;

        let response = check_status(response, file_id).await?;
        Ok(body_stream(response))
    }
}

/// Escape a literal for inclusion in a Drive query string.
pub fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_is_one_path_segment() {
        let client = DriveClient::new(Client::new(), "https://drive.example/drive/v3/");

        let url = client.file_url("a/b?c#d", &["export"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://drive.example/drive/v3/files/a%2Fb%3Fc%23d/export"
        );
        assert_eq!(
            client.media_url("plain-id").unwrap(),
            "https://drive.example/drive/v3/files/plain-id?alt=media"
        );
    }

    fn file(mime_type: &str, size: Option<&str>) -> DriveFile {
        DriveFile {
            id: "1".to_string(),
            name: "item".to_string(),
            mime_type: mime_type.to_string(),
            size: size.map(String::from),
            modified_time: None,
            parents: vec![],
            trashed: false,
            thumbnail_link: None,
            web_content_link: None,
        }
    }

    #[test]
    fn test_drive_file_kinds() {
        assert!(file(FOLDER_MIME, None).is_folder());
        assert!(!file(FOLDER_MIME, None).is_native_document());
        assert!(file("application/vnd.google-apps.document", None).is_native_document());
        assert!(!file("image/png", Some("10")).is_native_document());
    }

    #[test]
    fn test_drive_file_size_bytes() {
        assert_eq!(file("text/plain", Some("12345")).size_bytes(), Some(12345));
        assert_eq!(file(FOLDER_MIME, None).size_bytes(), None);
    }

    #[test]
    fn test_drive_file_sparse_json() {
        let parsed: DriveFile = serde_json::from_str(r#"{"id":"abc"}"#).unwrap();
        assert_eq!(parsed.id, "abc");
        assert_eq!(parsed.name, "");
        assert!(parsed.parents.is_empty());
    }

    #[test]
    fn test_escape_query_literal() {
        assert_eq!(escape_query_literal("it's"), "it\\'s");
        assert_eq!(escape_query_literal(r"a\b"), r"a\\b");
    }
}
