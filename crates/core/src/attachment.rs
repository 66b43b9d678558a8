//! Form and submission attachments.
//!
//! An [`Attachment`] only drives download decisions: it is parsed fresh from
//! each manifest or submission document and never persisted on its own.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::server::ProtocolError;
use crate::storage::{self, StorageError};
use crate::xml;

/// Hash algorithms a server may announce for an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    Md5,
    Sha256,
}

impl HashScheme {
    /// Split `scheme:digest`. Unknown or missing schemes yield `None`.
    pub fn split(hash: &str) -> Option<(HashScheme, &str)> {
        let (scheme, digest) = hash.trim().split_once(':')?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "md5" => HashScheme::Md5,
            "sha256" => HashScheme::Sha256,
            _ => return None,
        };
        if digest.is_empty() {
            return None;
        }
        Some((scheme, digest))
    }
}

/// One downloadable file attached to a form or a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    /// `scheme:hexdigest`, e.g. `md5:5d41...`
    pub hash: String,
    pub download_url: String,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        hash: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            hash: hash.into(),
            download_url: download_url.into(),
        }
    }

    /// Where this attachment lives inside `dir`.
    pub fn local_path(&self, dir: &Path) -> Result<PathBuf, StorageError> {
        storage::child_path(dir, &self.filename)
    }

    /// Whether the copy under `local_dir` is missing or stale.
    ///
    /// An unrecognised hash scheme, or any failure reading the local file,
    /// counts as stale.
    pub async fn needs_update(&self, local_dir: &Path) -> bool {
        let Ok(path) = self.local_path(local_dir) else {
            return true;
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return true;
        }
        let Some((scheme, expected)) = HashScheme::split(&self.hash) else {
            debug!(filename = %self.filename, hash = %self.hash, "Unrecognised hash scheme");
            return true;
        };
        match storage::hash_file(&path, scheme).await {
            Ok(actual) => !actual.eq_ignore_ascii_case(expected),
            Err(_) => true,
        }
    }
}

/// Parse the `<mediaFile>` entries of a manifest or submission document.
pub(crate) fn parse_media_files(
    document: &'static str,
    xml_text: &str,
) -> Result<Vec<Attachment>, ProtocolError> {
    xml::element_blocks(xml_text, "mediaFile")
        .into_iter()
        .map(|block| {
            let filename = xml::element_text(block, "filename")
                .filter(|f| !f.is_empty())
                .ok_or_else(|| ProtocolError::new(document, "mediaFile without filename"))?;
            let download_url = xml::element_text(block, "downloadUrl")
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    ProtocolError::new(document, format!("no downloadUrl for {filename}"))
                })?;
            let hash = xml::element_text(block, "hash").unwrap_or_default();
            Ok(Attachment {
                filename,
                hash,
                download_url,
            })
        })
        .collect()
}

/// Parse an OpenRosa `xformsManifest` document.
pub fn parse_manifest(xml_text: &str) -> Result<Vec<Attachment>, ProtocolError> {
    if !xml::has_root(xml_text, "manifest") {
        return Err(ProtocolError::new("manifest", "missing <manifest> root"));
    }
    parse_media_files("manifest", xml_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    async fn dir_with_hello() -> TempDir {
        let temp = TempDir::new().unwrap();
        storage::write_file(&temp.path().join("hello.txt"), b"hello")
            .await
            .unwrap();
        temp
    }

    #[test]
    fn test_hash_scheme_split() {
        assert_eq!(
            HashScheme::split("md5:abc"),
            Some((HashScheme::Md5, "abc"))
        );
        assert_eq!(
            HashScheme::split("SHA256:abc"),
            Some((HashScheme::Sha256, "abc"))
        );
        assert_eq!(HashScheme::split("crc32:abc"), None);
        assert_eq!(HashScheme::split("abc"), None);
        assert_eq!(HashScheme::split("md5:"), None);
    }

    #[tokio::test]
    async fn test_needs_update_false_for_matching_hash() {
        let temp = dir_with_hello().await;
        let attachment = Attachment::new("hello.txt", format!("md5:{HELLO_MD5}"), "http://x/1");
        assert!(!attachment.needs_update(temp.path()).await);
    }

    #[tokio::test]
    async fn test_needs_update_hash_is_case_insensitive() {
        let temp = dir_with_hello().await;
        let upper = format!("MD5:{}", HELLO_MD5.to_uppercase());
        let attachment = Attachment::new("hello.txt", upper, "http://x/1");
        assert!(!attachment.needs_update(temp.path()).await);
    }

    #[tokio::test]
    async fn test_needs_update_true_cases() {
        let temp = dir_with_hello().await;

        let missing = Attachment::new("other.txt", format!("md5:{HELLO_MD5}"), "http://x/1");
        assert!(missing.needs_update(temp.path()).await);

        let mismatch = Attachment::new("hello.txt", "md5:0000", "http://x/1");
        assert!(mismatch.needs_update(temp.path()).await);

        let unknown_scheme = Attachment::new("hello.txt", format!("crc:{HELLO_MD5}"), "http://x/1");
        assert!(unknown_scheme.needs_update(temp.path()).await);

        let no_scheme = Attachment::new("hello.txt", HELLO_MD5, "http://x/1");
        assert!(no_scheme.needs_update(temp.path()).await);

        let traversal = Attachment::new("../hello.txt", format!("md5:{HELLO_MD5}"), "http://x/1");
        assert!(traversal.needs_update(temp.path()).await);
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest xmlns="http://openrosa.org/xforms/xformsManifest">
  <mediaFile>
    <filename>logo.png</filename>
    <hash>md5:aaa</hash>
    <downloadUrl>https://agg.example.org/view/binaryData?blobKey=1&amp;x=2</downloadUrl>
  </mediaFile>
  <mediaFile>
    <filename>cities.csv</filename>
    <hash>md5:bbb</hash>
    <downloadUrl>https://agg.example.org/view/binaryData?blobKey=2</downloadUrl>
  </mediaFile>
</manifest>"#;
        let attachments = parse_manifest(manifest).unwrap();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename, "logo.png");
        assert_eq!(attachments[0].hash, "md5:aaa");
        assert_eq!(
            attachments[0].download_url,
            "https://agg.example.org/view/binaryData?blobKey=1&x=2"
        );
        assert_eq!(attachments[1].filename, "cities.csv");
    }

    #[test]
    fn test_parse_empty_manifest() {
        assert!(parse_manifest("<manifest/>").unwrap().is_empty());
    }

    #[test]
    fn test_parse_manifest_errors() {
        assert!(parse_manifest("<html></html>").is_err());
        let no_url = "<manifest><mediaFile><filename>a</filename></mediaFile></manifest>";
        let err = parse_manifest(no_url).unwrap_err();
        assert!(err.to_string().contains("no downloadUrl for a"));
    }
}
