//! Dropbox API v2 client.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

use drivelink_common::{Error, Result};

use crate::config::HttpConfig;
use crate::http::{check_status, transport_error};

/// RPC endpoint base.
pub const DROPBOX_API_BASE: &str = "https://api.dropboxapi.com/2";
/// Content (upload/download) endpoint base.
pub const DROPBOX_CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Header carrying the JSON argument of content endpoints.
const API_ARG_HEADER: &str = "Dropbox-API-Arg";
/// Header carrying the JSON result of content endpoints.
const API_RESULT_HEADER: &str = "dropbox-api-result";

/// Listing page size.
const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub server_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeletedEntry {
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
}

/// Metadata entry, tagged by `.tag`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum DropboxEntry {
    File(FileEntry),
    Folder(FolderEntry),
    Deleted(DeletedEntry),
}

#[derive(Debug, Deserialize)]
pub struct ListFolderResponse {
    #[serde(default)]
    pub entries: Vec<DropboxEntry>,
    pub cursor: String,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchMatchMetadata {
    pub metadata: DropboxEntry,
}

#[derive(Debug, Deserialize)]
pub struct SearchMatch {
    pub metadata: SearchMatchMetadata,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub matches: Vec<SearchMatch>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemporaryLink {
    link: String,
}

#[derive(Debug, Deserialize)]
struct SharedLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SharedLinkList {
    #[serde(default)]
    links: Vec<SharedLink>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountName {
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: AccountName,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpaceAllocation {
    #[serde(default)]
    pub allocated: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SpaceUsage {
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub allocation: SpaceAllocation,
}

/// Downloaded content with the file name the provider reported.
pub struct ContentResponse {
    pub filename: Option<String>,
    pub response: Response,
}

/// Dropbox API client.
pub struct DropboxClient {
    http: Client,
    api_base: String,
    content_base: String,
    request_timeout: Duration,
}

impl DropboxClient {
    pub fn new(http: Client, api_base: impl Into<String>, content_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            content_base: content_base.into().trim_end_matches('/').to_string(),
            request_timeout: HttpConfig::default().timeout(),
        }
    }

    /// Deadline for RPC calls; content downloads are not bounded by it.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    /// Call an RPC endpoint and decode its JSON result.
    async fn rpc<T: DeserializeOwned>(
        &self,
        token: &str,
        endpoint: &str,
        body: &Value,
        subject: &str,
    ) -> Result<T> {
        let response = self.rpc_raw(token, endpoint, body).await?;
        let response = check_dropbox_status(response, subject).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    }

    async fn rpc_raw(&self, token: &str, endpoint: &str, body: &Value) -> Result<Response> {
        let url = format!("{}/{}", self.api_base, endpoint);

        self.http
            .post(&url)
            .header(header::AUTHORIZATION, Self::bearer(token))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&format!("Request to {} failed", endpoint), e))
    }

    /// Call a content endpoint, passing the argument in the API-Arg header.
    async fn content(
        &self,
        token: &str,
        endpoint: &str,
        arg: &Value,
        subject: &str,
    ) -> Result<ContentResponse> {
        let url = format!("{}/{}", self.content_base, endpoint);

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, Self::bearer(token))
            .header(API_ARG_HEADER, header_safe_json(arg)?)
            .send()
            .await
            .map_err(|e| transport_error(&format!("Request to {} failed", endpoint), e))?;

        let response = check_dropbox_status(response, subject).await?;

        let filename = response
            .headers()
            .get(API_RESULT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| serde_json::from_str::<Value>(v).ok())
            .and_then(|v| v.get("name").and_then(Value::as_str).map(String::from));

        Ok(ContentResponse { filename, response })
    }

    pub async fn current_account(&self, token: &str) -> Result<Account> {
        self.rpc(token, "users/get_current_account", &Value::Null, "account")
            .await
    }

    pub async fn space_usage(&self, token: &str) -> Result<SpaceUsage> {
        self.rpc(token, "users/get_space_usage", &Value::Null, "space usage")
            .await
    }

    /// List a folder; `""` is the root.
    pub async fn list_folder(&self, token: &str, path: &str) -> Result<ListFolderResponse> {
        self.rpc(
            token,
            "files/list_folder",
            &json!({ "path": path, "limit": PAGE_LIMIT }),
            path,
        )
        .await
    }

    pub async fn list_folder_continue(
        &self,
        token: &str,
        cursor: &str,
    ) -> Result<ListFolderResponse> {
        self.rpc(
            token,
            "files/list_folder/continue",
            &json!({ "cursor": cursor }),
            "cursor",
        )
        .await
    }

    pub async fn get_metadata(&self, token: &str, path: &str) -> Result<DropboxEntry> {
        self.rpc(token, "files/get_metadata", &json!({ "path": path }), path)
            .await
    }

    pub async fn search(
        &self,
        token: &str,
        query: &str,
        path: Option<&str>,
    ) -> Result<SearchResponse> {
        let mut options = json!({ "max_results": PAGE_LIMIT });
        if let Some(path) = path {
            options["path"] = json!(path);
        }

        self.rpc(
            token,
            "files/search_v2",
            &json!({ "query": query, "options": options }),
            query,
        )
        .await
    }

    pub async fn search_continue(&self, token: &str, cursor: &str) -> Result<SearchResponse> {
        self.rpc(
            token,
            "files/search/continue_v2",
            &json!({ "cursor": cursor }),
            "cursor",
        )
        .await
    }

    /// Short-lived (four hour) direct download link.
    pub async fn temporary_link(&self, token: &str, path: &str) -> Result<String> {
        let link: TemporaryLink = self
            .rpc(token, "files/get_temporary_link", &json!({ "path": path }), path)
            .await?;
        Ok(link.link)
    }

    /// Create a public shared link, or return the one that already exists.
    pub async fn shared_link(&self, token: &str, path: &str) -> Result<String> {
        let body = json!({
            "path": path,
            "settings": { "requested_visibility": "public", "audience": "public", "access": "viewer" }
        });

        let response = self
            .rpc_raw(token, "sharing/create_shared_link_with_settings", &body)
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let text = response.text().await.unwrap_or_default();
            let error: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            let summary = error_summary(&error);

            if !summary.starts_with("shared_link_already_exists") {
                return Err(conflict_error(&summary, path));
            }

            if let Some(url) = error
                .pointer("/error/shared_link_already_exists/metadata/url")
                .and_then(Value::as_str)
            {
                return Ok(url.to_string());
            }

            debug!(path, "Shared link exists, listing existing links");
            let list: SharedLinkList = self
                .rpc(
                    token,
                    "sharing/list_shared_links",
                    &json!({ "path": path, "direct_only": true }),
                    path,
                )
                .await?;
            return list
                .links
                .into_iter()
                .next()
                .map(|l| l.url)
                .ok_or_else(|| Error::NotFound(format!("No shared link for {}", path)));
        }

        let response = check_dropbox_status(response, path).await?;
        let link: SharedLink = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))?;
        Ok(link.url)
    }

    pub async fn download(&self, token: &str, path: &str) -> Result<ContentResponse> {
        self.content(token, "files/download", &json!({ "path": path }), path)
            .await
    }

    pub async fn thumbnail(&self, token: &str, path: &str) -> Result<Bytes> {
        let arg = json!({
            "resource": { ".tag": "path", "path": path },
            "format": "jpeg",
            "size": "w256h256"
        });

        let content = self
            .content(token, "files/get_thumbnail_v2", &arg, path)
            .await?;
        content
            .response
            .bytes()
            .await
            .map_err(|e| transport_error("Failed to read thumbnail", e))
    }
}

fn error_summary(error: &Value) -> String {
    error
        .get("error_summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn conflict_error(summary: &str, subject: &str) -> Error {
    if summary.contains("not_found") {
        Error::FileNotFound(subject.to_string())
    } else {
        Error::InvalidInput(format!("API error: 409 - {}", summary))
    }
}

/// Dropbox reports endpoint-specific failures as 409 with an error summary.
async fn check_dropbox_status(response: Response, subject: &str) -> Result<Response> {
    if response.status() == StatusCode::CONFLICT {
        let text = response.text().await.unwrap_or_default();
        let error: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        return Err(conflict_error(&error_summary(&error), subject));
    }
    check_status(response, subject).await
}

/// Serialize a header argument, escaping non-ASCII as `\uXXXX`.
fn header_safe_json(value: &Value) -> Result<String> {
    let raw = serde_json::to_string(value)?;
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(out)
}

/// Turn a shared-link page URL into a link that serves the raw file.
pub fn to_direct_link(shared_url: &str) -> Result<String> {
    let mut url = Url::parse(shared_url)
        .map_err(|e| Error::InvalidInput(format!("Invalid shared link: {}", e)))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "dl" && k != "raw")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("raw", "1");

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_tagging() {
        let file: DropboxEntry = serde_json::from_str(
            r#"{".tag":"file","id":"id:1","name":"a.png","size":5,"server_modified":"2024-01-02T03:04:05Z"}"#,
        )
        .unwrap();
        assert!(matches!(file, DropboxEntry::File(ref f) if f.size == 5));

        let folder: DropboxEntry =
            serde_json::from_str(r#"{".tag":"folder","id":"id:2","name":"Pics"}"#).unwrap();
        assert!(matches!(folder, DropboxEntry::Folder(_)));
    }

    #[test]
    fn test_header_safe_json_escapes_non_ascii() {
        let arg = header_safe_json(&json!({ "path": "/café/😀.jpg" })).unwrap();
        assert!(arg.is_ascii());
        assert!(arg.contains("caf\\u00e9"));
        assert!(arg.contains("\\ud83d\\ude00"));
    }

    #[test]
    fn test_to_direct_link() {
        assert_eq!(
            to_direct_link("https://www.dropbox.com/s/abc/photo.jpg?dl=0").unwrap(),
            "https://www.dropbox.com/s/abc/photo.jpg?raw=1"
        );
        assert_eq!(
            to_direct_link("https://www.dropbox.com/scl/fi/x/a.mp4?rlkey=k&dl=0").unwrap(),
            "https://www.dropbox.com/scl/fi/x/a.mp4?rlkey=k&raw=1"
        );
        assert!(to_direct_link("not a url").is_err());
    }

    #[test]
    fn test_conflict_error_mapping() {
        assert!(matches!(
            conflict_error("path/not_found/..", "id:1"),
            Error::FileNotFound(_)
        ));
        assert!(matches!(
            conflict_error("path/restricted_content/", "id:1"),
            Error::InvalidInput(_)
        ));
    }
}
