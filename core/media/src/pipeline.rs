//! Media resolution pipeline.
//!
//! References are resolved in input order. The batch is all or nothing:
//! the first failing reference aborts it, and local copies made for earlier
//! references are deleted before the error reaches the caller.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use drivelink_common::{CredentialId, Error, Result, UserId};
use drivelink_credentials::TokenLifecycleManager;
use drivelink_storage::{mime_from_name, StorageProvider};

use crate::artifacts::{ArtifactBatch, CleanupHandle, ScratchFile};
use crate::reference::{MediaKind, MediaReference, MediaSource};

/// Longest file name kept from the provider when naming local copies.
const MAX_NAME_LEN: usize = 100;

/// Directories used by the download-and-copy fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Process-local location for in-progress downloads.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Directory served publicly; local copies land here.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("drivelink")
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public").join("uploads")
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            public_dir: default_public_dir(),
        }
    }
}

/// Output of a successful batch.
#[derive(Debug)]
pub struct ResolvedMedia {
    /// References in input order, rewritten where resolution applied.
    pub references: Vec<MediaReference>,
    /// Deletes the local copies once the post has been published.
    pub cleanup: CleanupHandle,
}

/// Resolves media references for publishing.
pub struct MediaResolver {
    lifecycle: Arc<TokenLifecycleManager>,
    config: ResolverConfig,
}

impl MediaResolver {
    pub fn new(lifecycle: Arc<TokenLifecycleManager>, config: ResolverConfig) -> Self {
        Self { lifecycle, config }
    }

    /// Resolve a batch of references owned by `owner`.
    ///
    /// External references pass through unchanged. Storage references are
    /// published through a provider public link when possible, otherwise
    /// through a local copy in the public directory.
    ///
    /// # Errors
    /// - `IntegrationNotFound` if a referenced credential is not a live
    ///   credential of `owner`
    /// - any token lifecycle, provider or filesystem error; the batch is
    ///   rolled back first
    #[instrument(skip(self, references), fields(owner = %owner, count = references.len()))]
    pub async fn resolve_media(
        &self,
        references: Vec<MediaReference>,
        owner: &UserId,
    ) -> Result<ResolvedMedia> {
        let mut batch = ArtifactBatch::new();
        let mut resolved = Vec::with_capacity(references.len());

        for reference in references {
            let reference = match reference.source() {
                MediaSource::External => reference,
                MediaSource::StorageBacked {
                    credential_id,
                    file_id,
                } => {
                    self.resolve_stored(reference, &credential_id, &file_id, owner, &mut batch)
                        .await?
                }
            };
            resolved.push(reference);
        }

        info!(local_copies = batch.len(), "Media batch resolved");
        Ok(ResolvedMedia {
            references: resolved,
            cleanup: batch.into_cleanup(),
        })
    }

    async fn resolve_stored(
        &self,
        mut reference: MediaReference,
        credential_id: &CredentialId,
        file_id: &str,
        owner: &UserId,
        batch: &mut ArtifactBatch,
    ) -> Result<MediaReference> {
        let record = self
            .lifecycle
            .store()
            .find_credential(credential_id, owner)
            .await?
            .ok_or_else(|| Error::IntegrationNotFound(credential_id.to_string()))?;

        let provider = self.lifecycle.registry().get(&record.provider)?;
        let token = self.lifecycle.get_access_token(&record.id).await?;

        if provider.capabilities().public_link {
            match provider.create_public_link(token.expose(), file_id).await {
                Ok(url) => {
                    debug!(credential_id = %credential_id, file_id, "Resolved to public link");
                    reference.path = url;
                    reference.resolved_as_public_url = true;
                    return Ok(reference);
                }
                Err(e) => {
                    warn!(
                        credential_id = %credential_id,
                        file_id,
                        error = %e,
                        "Public link failed, falling back to local copy"
                    );
                }
            }
        }

        let (path, mime_type) = self
            .copy_to_public(provider.as_ref(), token.expose(), file_id, batch)
            .await?;

        reference.path = path.to_string_lossy().into_owned();
        reference.resolved_as_public_url = false;
        if reference.kind.is_none() {
            reference.kind = Some(MediaKind::from_mime(&mime_type));
        }
        Ok(reference)
    }

    /// Download into scratch, copy into the public directory and return the
    /// absolute path of the copy with the MIME type.
    async fn copy_to_public(
        &self,
        provider: &dyn StorageProvider,
        access_token: &str,
        file_id: &str,
        batch: &mut ArtifactBatch,
    ) -> Result<(PathBuf, String)> {
        let public_dir = std::path::absolute(&self.config.public_dir)?;
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;
        tokio::fs::create_dir_all(&public_dir).await?;

        let mut download = provider.download(access_token, file_id).await?;

        let id = Uuid::new_v4();
        let scratch = ScratchFile::new(self.config.scratch_dir.join(format!("{}.part", id)));
        let mut file = tokio::fs::File::create(scratch.path()).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = download.stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        let public_path = public_dir.join(format!("{}-{}", id, sanitize_filename(&download.filename)));
        batch.track(public_path.clone());
        tokio::fs::copy(scratch.path(), &public_path).await?;
        drop(scratch);

        let mime_type = if download.mime_type.is_empty()
            || download.mime_type == "application/octet-stream"
        {
            mime_from_name(&download.filename).to_string()
        } else {
            download.mime_type
        };

        debug!(file_id, bytes = written, path = %public_path.display(), "Copied to public directory");
        Ok((public_path, mime_type))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }
}

/// Keep a provider file name safe for use as a path component.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("my clip (1).mp4"), "my_clip__1_.mp4");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename(&"a".repeat(300)).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_default_config() {
        let config = ResolverConfig::default();
        assert!(config.scratch_dir.ends_with("drivelink"));
        assert!(config.public_dir.ends_with("uploads"));
    }
}
