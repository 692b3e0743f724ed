//! In-memory storage provider for testing.
//!
//! Holds a flat file table and counts the calls that matter to higher
//! layers (refreshes, downloads, public links). Failures can be injected
//! per file so pipelines can be exercised without a network.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use drivelink_common::{Error, Result, SecretString};

use crate::provider::{
    AuthRequest, AuthResult, ByteStream, Capabilities, Capability, Download, FileList,
    FileMetadata, StorageProvider, Thumbnail,
};

/// Outcome returned by [`MemoryProvider::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Issue `refreshed-{n}` access tokens, `n` counting refreshes.
    Grant {
        refresh_token: String,
        expires_in_seconds: Option<u64>,
    },
    /// The refresh token is rejected.
    Reject,
    /// Transport failure.
    Unavailable,
}

impl Default for RefreshOutcome {
    fn default() -> Self {
        RefreshOutcome::Grant {
            refresh_token: String::new(),
            expires_in_seconds: Some(3600),
        }
    }
}

/// How a download of a given file misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadFault {
    /// First chunk arrives, then the stream errors.
    Interrupted,
    /// First chunk arrives, then the stream never yields again.
    Stalled,
}

#[derive(Debug, Clone)]
struct MemoryFile {
    metadata: FileMetadata,
    parent: Option<String>,
    data: Bytes,
}

/// In-memory storage provider.
pub struct MemoryProvider {
    name: String,
    capabilities: Capabilities,
    files: RwLock<HashMap<String, MemoryFile>>,
    download_faults: HashMap<String, DownloadFault>,
    failing_public_links: HashSet<String>,
    refresh_outcome: RefreshOutcome,
    refresh_delay: Duration,
    refresh_calls: AtomicUsize,
    download_calls: AtomicUsize,
    public_link_calls: AtomicUsize,
}

impl MemoryProvider {
    /// Create an empty provider with no optional capabilities.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Capabilities::default(),
            files: RwLock::new(HashMap::new()),
            download_faults: HashMap::new(),
            failing_public_links: HashSet::new(),
            refresh_outcome: RefreshOutcome::default(),
            refresh_delay: Duration::ZERO,
            refresh_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
            public_link_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Add a file at the root, MIME type derived from the name.
    pub fn with_file(self, id: &str, name: &str, data: impl Into<Bytes>) -> Self {
        let mime_type = crate::provider::mime_from_name(name);
        self.with_typed_file(id, name, mime_type, None, data)
    }

    /// Add a file with an explicit MIME type and parent folder.
    pub fn with_typed_file(
        mut self,
        id: &str,
        name: &str,
        mime_type: &str,
        parent: Option<&str>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        let file = MemoryFile {
            metadata: FileMetadata {
                id: id.to_string(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                size_bytes: data.len() as u64,
                modified_time: "2024-01-01T00:00:00+00:00".to_string(),
                is_folder: false,
                path: Some(format!("/{}", name)),
            },
            parent: parent.map(String::from),
            data,
        };
        self.files.get_mut().insert(id.to_string(), file);
        self
    }

    /// Downloads of `id` fail after the first chunk.
    pub fn with_interrupted_download(mut self, id: &str) -> Self {
        self.download_faults
            .insert(id.to_string(), DownloadFault::Interrupted);
        self
    }

    /// Downloads of `id` hang after the first chunk.
    pub fn with_stalled_download(mut self, id: &str) -> Self {
        self.download_faults
            .insert(id.to_string(), DownloadFault::Stalled);
        self
    }

    /// Public-link creation for `id` fails with a network error.
    pub fn with_failing_public_link(mut self, id: &str) -> Self {
        self.failing_public_links.insert(id.to_string());
        self
    }

    pub fn with_refresh_outcome(mut self, outcome: RefreshOutcome) -> Self {
        self.refresh_outcome = outcome;
        self
    }

    /// Delay every refresh, widening race windows in tests.
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn public_link_calls(&self) -> usize {
        self.public_link_calls.load(Ordering::SeqCst)
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.capabilities.supports(capability) {
            Ok(())
        } else {
            Err(Error::unsupported(&self.name, capability))
        }
    }

    async fn file(&self, file_id: &str) -> Result<MemoryFile> {
        self.files
            .read()
            .await
            .get(file_id)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(file_id.to_string()))
    }

    fn body(&self, file: &MemoryFile) -> ByteStream {
        let data = file.data.clone();
        match self.download_faults.get(&file.metadata.id) {
            None => Box::pin(stream::iter(vec![Ok(data)])),
            Some(DownloadFault::Interrupted) => {
                let half = data.slice(..data.len() / 2);
                Box::pin(stream::iter(vec![
                    Ok(half),
                    Err(Error::Network("Connection reset".to_string())),
                ]))
            }
            Some(DownloadFault::Stalled) => {
                let half = data.slice(..data.len() / 2);
                Box::pin(futures::StreamExt::chain(
                    stream::iter(vec![Ok(half)]),
                    stream::pending(),
                ))
            }
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn begin_auth(&self) -> Result<AuthRequest> {
        let state = Uuid::new_v4().to_string();
        Ok(AuthRequest {
            authorization_url: format!("memory://{}/authorize?state={}", self.name, state),
            state,
        })
    }

    async fn exchange_code(&self, code: &str) -> Result<AuthResult> {
        if code.is_empty() {
            return Err(Error::AuthenticationFailed("Empty authorization code".to_string())
                .in_provider(&self.name, "exchange_code"));
        }

        Ok(AuthResult {
            access_token: SecretString::new(format!("access-{}", code)),
            refresh_token: SecretString::new(format!("refresh-{}", code)),
            expires_in_seconds: Some(3600),
            external_account_id: format!("account-{}", code),
            email: format!("{}@memory.test", code),
            display_name: "Memory User".to_string(),
            quota: None,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResult> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }

        if refresh_token.is_empty() {
            return Err(Error::MissingRefreshToken.in_provider(&self.name, "refresh"));
        }

        match self.refresh_outcome.clone() {
            RefreshOutcome::Grant {
                refresh_token,
                expires_in_seconds,
            } => Ok(AuthResult {
                access_token: SecretString::new(format!("refreshed-{}", n)),
                refresh_token: SecretString::new(refresh_token),
                expires_in_seconds,
                external_account_id: String::new(),
                email: String::new(),
                display_name: String::new(),
                quota: None,
            }),
            RefreshOutcome::Reject => Err(Error::TokenRefreshFailed(
                "invalid_grant".to_string(),
            )
            .in_provider(&self.name, "refresh")),
            RefreshOutcome::Unavailable => Err(Error::Network(
                "Token endpoint unreachable".to_string(),
            )
            .in_provider(&self.name, "refresh")),
        }
    }

    async fn list_files(
        &self,
        _access_token: &str,
        folder: Option<&str>,
        _page_token: Option<&str>,
    ) -> Result<FileList> {
        let files = self.files.read().await;
        let mut listed: Vec<FileMetadata> = files
            .values()
            .filter(|f| f.parent.as_deref() == folder)
            .map(|f| f.metadata.clone())
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(FileList {
            files: listed,
            next_page_token: None,
        })
    }

    async fn get_file(&self, _access_token: &str, file_id: &str) -> Result<FileMetadata> {
        self.file(file_id)
            .await
            .map(|f| f.metadata)
            .map_err(|e| e.in_provider(&self.name, "get_file"))
    }

    async fn download(&self, _access_token: &str, file_id: &str) -> Result<Download> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        let file = self
            .file(file_id)
            .await
            .map_err(|e| e.in_provider(&self.name, "download"))?;

        Ok(Download {
            stream: self.body(&file),
            filename: file.metadata.name,
            mime_type: file.metadata.mime_type,
        }
        .in_provider(&self.name, "download"))
    }

    async fn get_download_url(
        &self,
        _access_token: &str,
        file_id: &str,
        _expires_in_seconds: Option<u64>,
    ) -> Result<String> {
        self.file(file_id)
            .await
            .map_err(|e| e.in_provider(&self.name, "get_download_url"))?;
        Ok(format!("memory://{}/download/{}", self.name, file_id))
    }

    async fn search(
        &self,
        _access_token: &str,
        query: &str,
        folder: Option<&str>,
        _page_token: Option<&str>,
    ) -> Result<FileList> {
        self.require(Capability::Search)?;

        let query = query.to_lowercase();
        let files = self.files.read().await;
        let mut found: Vec<FileMetadata> = files
            .values()
            .filter(|f| folder.is_none() || f.parent.as_deref() == folder)
            .filter(|f| f.metadata.name.to_lowercase().contains(&query))
            .map(|f| f.metadata.clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(FileList {
            files: found,
            next_page_token: None,
        })
    }

    async fn thumbnail(&self, _access_token: &str, file_id: &str) -> Result<Thumbnail> {
        self.require(Capability::Thumbnail)?;
        self.file(file_id)
            .await
            .map_err(|e| e.in_provider(&self.name, "thumbnail"))?;
        Ok(Thumbnail::Url(format!(
            "memory://{}/thumbnail/{}",
            self.name, file_id
        )))
    }

    async fn batch_metadata(
        &self,
        access_token: &str,
        file_ids: &[String],
    ) -> Result<Vec<FileMetadata>> {
        self.require(Capability::BatchMetadata)?;

        let mut out = Vec::with_capacity(file_ids.len());
        for id in file_ids {
            out.push(self.get_file(access_token, id).await?);
        }
        Ok(out)
    }

    async fn create_public_link(&self, _access_token: &str, file_id: &str) -> Result<String> {
        self.require(Capability::PublicLink)?;
        self.public_link_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_public_links.contains(file_id) {
            return Err(Error::Network("Sharing endpoint unavailable".to_string())
                .in_provider(&self.name, "create_public_link"));
        }

        self.file(file_id)
            .await
            .map_err(|e| e.in_provider(&self.name, "create_public_link"))?;
        Ok(format!("https://{}.example/public/{}", self.name, file_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivelink_common::ErrorKind;
    use futures::TryStreamExt;

    fn provider() -> MemoryProvider {
        MemoryProvider::new("mem")
            .with_typed_file("f1", "clip.mp4", "video/mp4", Some("dir"), "0123456789")
            .with_file("f2", "photo.png", "png-bytes")
    }

    #[tokio::test]
    async fn test_list_by_folder() {
        let provider = provider();

        let root = provider.list_files("t", None, None).await.unwrap();
        assert_eq!(root.files.len(), 1);
        assert_eq!(root.files[0].mime_type, "image/png");

        let dir = provider.list_files("t", Some("dir"), None).await.unwrap();
        assert_eq!(dir.files[0].id, "f1");
        assert_eq!(dir.files[0].size_bytes, 10);
    }

    #[tokio::test]
    async fn test_download_and_missing_file() {
        let provider = provider();

        let download = provider.download("t", "f1").await.unwrap();
        let chunks: Vec<Bytes> = download.stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"0123456789");
        assert_eq!(provider.download_calls(), 1);

        let err = provider.download("t", "nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert!(err.to_string().starts_with("mem download"));
    }

    #[tokio::test]
    async fn test_interrupted_download_errors_mid_stream() {
        let provider = provider().with_interrupted_download("f1");

        let download = provider.download("t", "f1").await.unwrap();
        let result: Result<Vec<Bytes>> = download.stream.try_collect().await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("mem download: "));
    }

    #[tokio::test]
    async fn test_optional_operations_gated_by_capabilities() {
        let provider = provider();
        let err = provider.search("t", "clip", None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityNotSupported);

        let provider = provider.with_capabilities(Capabilities {
            search: true,
            public_link: true,
            ..Capabilities::default()
        });
        let found = provider.search("t", "CLIP", None, None).await.unwrap();
        assert_eq!(found.files.len(), 1);

        let link = provider.create_public_link("t", "f2").await.unwrap();
        assert_eq!(link, "https://mem.example/public/f2");
        assert_eq!(provider.public_link_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_outcomes() {
        let provider = provider();

        let result = provider.refresh("rt").await.unwrap();
        assert_eq!(result.access_token.expose(), "refreshed-1");
        assert!(result.refresh_token.is_empty());

        assert_eq!(provider.refresh_calls(), 1);

        let rejecting = MemoryProvider::new("mem").with_refresh_outcome(RefreshOutcome::Reject);
        let err = rejecting.refresh("rt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenRefreshFailed);
    }
}
