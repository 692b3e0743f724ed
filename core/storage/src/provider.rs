//! Storage provider trait definition.
//!
//! Every backing drive service implements [`StorageProvider`]. The required
//! operations are uniform across adapters; optional extensions are declared
//! up front through [`Capabilities`] and default to a
//! `CapabilityNotSupported` error, so a caller that skips the capability
//! check still gets a typed failure.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

use drivelink_common::{Error, Result, SecretString};

/// Normalized metadata for a remote file or folder.
///
/// Every adapter produces this exact shape. Fields a provider does not
/// report default to an empty string or zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Provider-specific file identifier.
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Last modification time as RFC3339, empty when unknown.
    pub modified_time: String,
    pub is_folder: bool,
    /// Display path within the drive, when the provider exposes one.
    pub path: Option<String>,
}

/// One page of a listing or search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileList {
    pub files: Vec<FileMetadata>,
    /// Opaque provider token for the next page. Pass back unmodified.
    pub next_page_token: Option<String>,
}

/// A shared (team) drive visible to the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedDrive {
    pub id: String,
    pub name: String,
}

/// One page of shared drives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedDriveList {
    pub drives: Vec<SharedDrive>,
    pub next_page_token: Option<String>,
}

/// Byte stream type for downloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A file body being streamed from the provider.
pub struct Download {
    pub stream: ByteStream,
    pub filename: String,
    pub mime_type: String,
}

impl Download {
    /// Tag errors raised while reading the body with the adapter and
    /// operation, like errors from the call that opened it.
    pub fn in_provider(self, provider: impl Into<String>, operation: &'static str) -> Self {
        let provider = provider.into();
        let stream = self
            .stream
            .map(move |chunk| chunk.map_err(|e| e.in_provider(provider.clone(), operation)));
        Self {
            stream: Box::pin(stream),
            ..self
        }
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// Thumbnail as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thumbnail {
    /// Provider-hosted thumbnail link.
    Url(String),
    /// Thumbnail bytes returned inline.
    Inline { mime_type: String, data: Bytes },
}

/// Storage quota reported at connect time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageQuota {
    pub used_bytes: u64,
    /// Total allocation; `None` for unlimited plans.
    pub total_bytes: Option<u64>,
}

/// First leg of the OAuth handshake.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub authorization_url: String,
    /// Anti-forgery state token to verify on callback.
    pub state: String,
}

/// Tokens and identity returned by a code exchange or refresh.
///
/// Identity fields are only populated by `exchange_code`; a refresh
/// leaves them empty.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub access_token: SecretString,
    /// Empty when the provider did not issue (or rotate) a refresh token.
    pub refresh_token: SecretString,
    pub expires_in_seconds: Option<u64>,
    pub external_account_id: String,
    pub email: String,
    pub display_name: String,
    pub quota: Option<StorageQuota>,
}

/// An optional adapter capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Search,
    Thumbnail,
    BatchMetadata,
    SharedDrives,
    Export,
    PublicLink,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Search => "search",
            Capability::Thumbnail => "thumbnail",
            Capability::BatchMetadata => "batch-metadata",
            Capability::SharedDrives => "shared-drive-listing",
            Capability::Export => "export",
            Capability::PublicLink => "public-link-creation",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional capabilities an adapter supports, fixed at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub search: bool,
    pub thumbnail: bool,
    pub batch_metadata: bool,
    pub shared_drives: bool,
    pub export: bool,
    pub public_link: bool,
}

impl Capabilities {
    /// Check a single capability.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Search => self.search,
            Capability::Thumbnail => self.thumbnail,
            Capability::BatchMetadata => self.batch_metadata,
            Capability::SharedDrives => self.shared_drives,
            Capability::Export => self.export,
            Capability::PublicLink => self.public_link,
        }
    }

    /// List the supported capabilities.
    pub fn enabled(&self) -> Vec<Capability> {
        [
            Capability::Search,
            Capability::Thumbnail,
            Capability::BatchMetadata,
            Capability::SharedDrives,
            Capability::Export,
            Capability::PublicLink,
        ]
        .into_iter()
        .filter(|c| self.supports(*c))
        .collect()
    }
}

/// Storage provider trait for remote drive backends.
///
/// Access tokens are passed per call; the adapter holds no account state.
/// Every error an implementation returns is tagged with the adapter name
/// and the operation (see [`Error::in_provider`]).
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider identifier (e.g., "gdrive", "dropbox").
    fn name(&self) -> &str;

    /// Whether client credentials are configured for the OAuth calls.
    ///
    /// An unconfigured adapter still constructs; only the auth operations
    /// fail, with `NotConfigured`.
    fn is_configured(&self) -> bool;

    /// Optional capabilities this adapter implements.
    fn capabilities(&self) -> Capabilities;

    /// Build the authorization URL and anti-forgery state.
    ///
    /// # Errors
    /// - `NotConfigured` when client id, secret or redirect are absent
    fn begin_auth(&self) -> Result<AuthRequest>;

    /// Exchange an authorization code for tokens and account identity.
    ///
    /// # Errors
    /// - `AuthenticationFailed` on any non-2xx response or missing access token
    async fn exchange_code(&self, code: &str) -> Result<AuthResult>;

    /// Obtain a new access token from a refresh token.
    ///
    /// # Errors
    /// - `MissingRefreshToken` if `refresh_token` is empty
    /// - `TokenRefreshFailed` if the provider rejects it
    async fn refresh(&self, refresh_token: &str) -> Result<AuthResult>;

    /// List one page of a folder. `None` means the provider root.
    async fn list_files(
        &self,
        access_token: &str,
        folder: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FileList>;

    /// Get normalized metadata for one file.
    ///
    /// # Errors
    /// - `FileNotFound` when the provider reports the file missing
    async fn get_file(&self, access_token: &str, file_id: &str) -> Result<FileMetadata>;

    /// Stream the file contents.
    async fn download(&self, access_token: &str, file_id: &str) -> Result<Download>;

    /// Get a URL the file can be fetched from.
    async fn get_download_url(
        &self,
        access_token: &str,
        file_id: &str,
        expires_in_seconds: Option<u64>,
    ) -> Result<String>;

    /// Search by name. Requires [`Capability::Search`].
    async fn search(
        &self,
        _access_token: &str,
        _query: &str,
        _folder: Option<&str>,
        _page_token: Option<&str>,
    ) -> Result<FileList> {
        Err(Error::unsupported(self.name(), Capability::Search))
    }

    /// Fetch a thumbnail. Requires [`Capability::Thumbnail`].
    async fn thumbnail(&self, _access_token: &str, _file_id: &str) -> Result<Thumbnail> {
        Err(Error::unsupported(self.name(), Capability::Thumbnail))
    }

    /// Metadata for many files, in input order. Requires [`Capability::BatchMetadata`].
    async fn batch_metadata(
        &self,
        _access_token: &str,
        _file_ids: &[String],
    ) -> Result<Vec<FileMetadata>> {
        Err(Error::unsupported(self.name(), Capability::BatchMetadata))
    }

    /// List shared drives. Requires [`Capability::SharedDrives`].
    async fn list_shared_drives(
        &self,
        _access_token: &str,
        _page_token: Option<&str>,
    ) -> Result<SharedDriveList> {
        Err(Error::unsupported(self.name(), Capability::SharedDrives))
    }

    /// Export a provider-native document. Requires [`Capability::Export`].
    async fn export(
        &self,
        _access_token: &str,
        _file_id: &str,
        _mime_type: &str,
    ) -> Result<Download> {
        Err(Error::unsupported(self.name(), Capability::Export))
    }

    /// Create (or reuse) a permanent public URL. Requires [`Capability::PublicLink`].
    async fn create_public_link(&self, _access_token: &str, _file_id: &str) -> Result<String> {
        Err(Error::unsupported(self.name(), Capability::PublicLink))
    }
}

/// Fail with `CapabilityNotSupported` unless the provider declares `capability`.
pub fn require_capability(provider: &dyn StorageProvider, capability: Capability) -> Result<()> {
    if provider.capabilities().supports(capability) {
        Ok(())
    } else {
        Err(Error::unsupported(provider.name(), capability))
    }
}

/// Guess a MIME type from a file name's extension.
///
/// Used by adapters whose API does not report content types.
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_supports() {
        let caps = Capabilities {
            public_link: true,
            search: true,
            ..Default::default()
        };

        assert!(caps.supports(Capability::PublicLink));
        assert!(!caps.supports(Capability::Export));
        assert_eq!(caps.enabled(), vec![Capability::Search, Capability::PublicLink]);
    }

    #[test]
    fn test_capability_names() {
        assert_eq!(Capability::SharedDrives.to_string(), "shared-drive-listing");
        assert_eq!(Capability::PublicLink.as_str(), "public-link-creation");
    }

    #[test]
    fn test_mime_from_name() {
        assert_eq!(mime_from_name("holiday.JPG"), "image/jpeg");
        assert_eq!(mime_from_name("clip.mov"), "video/quicktime");
        assert_eq!(mime_from_name("README"), "application/octet-stream");
        assert_eq!(mime_from_name("archive.tar.unknown"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_download_tags_stream_errors() {
        let download = Download {
            stream: Box::pin(futures::stream::iter(vec![
                Ok(Bytes::from_static(b"abc")),
                Err(Error::Network("Connection reset".to_string())),
            ])),
            filename: "a.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
        }
        .in_provider("gdrive", "download");

        let mut stream = download.stream;
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("gdrive download: "));
    }

    #[test]
    fn test_metadata_defaults_are_empty_not_null() {
        let meta = FileMetadata::default();
        assert_eq!(meta.name, "");
        assert_eq!(meta.size_bytes, 0);
        assert_eq!(meta.modified_time, "");
    }
}
