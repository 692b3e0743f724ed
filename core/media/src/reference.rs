//! Post media references.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use drivelink_common::CredentialId;

/// Kind of media attached to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// `Video` for `video/*` MIME types, `Image` otherwise.
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// One media item as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReference {
    /// External URL, storage reference, or (after resolution) a local path.
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: Option<MediaKind>,
    /// Set when `path` must be fetched over HTTP rather than opened locally.
    #[serde(default)]
    pub resolved_as_public_url: bool,
}

impl MediaReference {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: None,
            resolved_as_public_url: false,
        }
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn source(&self) -> MediaSource {
        MediaSource::parse(&self.path)
    }
}

/// Where a reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Anything that is not a storage reference; passed through untouched.
    External,
    /// A file inside a connected drive.
    StorageBacked {
        credential_id: CredentialId,
        file_id: String,
    },
}

impl MediaSource {
    /// Parse `[/]integration/{credentialId}/file/{fileId}`.
    ///
    /// `credentialId` is one non-empty segment. `fileId` is the non-empty,
    /// percent-decoded remainder and may itself contain `/`.
    pub fn parse(path: &str) -> Self {
        let rest = path.strip_prefix('/').unwrap_or(path);

        let Some(rest) = rest.strip_prefix("integration/") else {
            return MediaSource::External;
        };
        let Some((credential, rest)) = rest.split_once('/') else {
            return MediaSource::External;
        };
        let Some(file) = rest.strip_prefix("file/") else {
            return MediaSource::External;
        };
        if file.is_empty() {
            return MediaSource::External;
        }
        let Ok(credential_id) = CredentialId::new(credential) else {
            return MediaSource::External;
        };

        MediaSource::StorageBacked {
            credential_id,
            file_id: percent_decode_str(file).decode_utf8_lossy().into_owned(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, MediaSource::External)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    use proptest::prelude::*;

    fn storage(credential: &str, file: &str) -> MediaSource {
        MediaSource::StorageBacked {
            credential_id: CredentialId::new(credential).unwrap(),
            file_id: file.to_string(),
        }
    }

    #[test]
    fn test_parse_storage_references() {
        assert_eq!(
            MediaSource::parse("integration/c1/file/abc"),
            storage("c1", "abc")
        );
        assert_eq!(
            MediaSource::parse("/integration/c1/file/id:xyz"),
            storage("c1", "id:xyz")
        );
        assert_eq!(
            MediaSource::parse("integration/c1/file/folder%2Fphoto%20one.jpg"),
            storage("c1", "folder/photo one.jpg")
        );
        assert_eq!(
            MediaSource::parse("integration/c1/file/a/b"),
            storage("c1", "a/b")
        );
    }

    #[test]
    fn test_parse_rejects_near_misses() {
        for path in [
            "https://cdn.example.com/y.jpg",
            "https://host/integration/c1/file/abc",
            "integration/c1/file/",
            "integration//file/abc",
            "integration/c1/files/abc",
            "integration/c1",
            "integrations/c1/file/abc",
            "//integration/c1/file/abc",
            "integration/ /file/abc",
            "",
        ] {
            assert!(MediaSource::parse(path).is_external(), "{path}");
        }
    }

    #[test]
    fn test_reference_json_shape() {
        let reference: MediaReference =
            serde_json::from_str(r#"{"path":"https://x/y.mp4","type":"video"}"#).unwrap();
        assert_eq!(reference.kind, Some(MediaKind::Video));
        assert!(!reference.resolved_as_public_url);

        let json = serde_json::to_value(MediaReference::new("p")).unwrap();
        assert_eq!(json["resolvedAsPublicUrl"], false);
        assert!(json["type"].is_null());
    }

    #[test]
    fn test_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("image/webp"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime(""), MediaKind::Image);
    }

    proptest! {
        #[test]
        fn prop_paths_without_prefix_are_external(path in "\\PC*") {
            prop_assume!(!path.trim_start_matches('/').starts_with("integration/"));
            prop_assert!(MediaSource::parse(&path).is_external());
        }

        #[test]
        fn prop_encoded_file_ids_survive_parsing(
            credential in "[A-Za-z0-9_-]{1,24}",
            file_id in "\\PC{1,40}",
            leading_slash in any::<bool>(),
        ) {
            let path = format!(
                "{}integration/{}/file/{}",
                if leading_slash { "/" } else { "" },
                credential,
                utf8_percent_encode(&file_id, NON_ALPHANUMERIC),
            );
            prop_assert_eq!(MediaSource::parse(&path), storage(&credential, &file_id));
        }
    }
}
