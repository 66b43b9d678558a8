//! Local filesystem layout and file operations.
//!
//! ```text
//! <root>/forms/<form>/<form>.xml
//! <root>/forms/<form>/<form>-media/<attachment>
//! <root>/forms/<form>/instances/<instance>/submission.xml
//! <root>/forms/<form>/instances/<instance>/<attachment>
//! <root>/forms/<form>/last-cursor
//! ```
//!
//! Writes are create-or-truncate through a temporary file and a rename, so
//! writing the same content twice is harmless.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, BufReader};

use crate::attachment::HashScheme;
use crate::cursor::Cursor;
use crate::form::FormKey;

const BUFFER_SIZE: usize = 64 * 1024;

/// Distinguishes the temporary files of concurrent writes.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Errors that can occur during local storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to create destination directory.
    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("Failed to write file: {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a file.
    #[error("Failed to read file: {path}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File name would escape its directory.
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),
}

/// Paths of one form's local files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormLayout {
    form_dir: PathBuf,
    file_stem: String,
}

impl FormLayout {
    pub fn new(root: &Path, form: &FormKey) -> Self {
        let file_stem = sanitize_component(&form.name);
        Self {
            form_dir: root.join("forms").join(&file_stem),
            file_stem,
        }
    }

    pub fn form_dir(&self) -> &Path {
        &self.form_dir
    }

    pub fn form_file(&self) -> PathBuf {
        self.form_dir.join(format!("{}.xml", self.file_stem))
    }

    pub fn media_dir(&self) -> PathBuf {
        self.form_dir.join(format!("{}-media", self.file_stem))
    }

    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.form_dir
            .join("instances")
            .join(sanitize_component(instance_id))
    }

    pub fn submission_file(&self, instance_id: &str) -> PathBuf {
        self.instance_dir(instance_id).join("submission.xml")
    }

    pub fn cursor_file(&self) -> PathBuf {
        self.form_dir.join("last-cursor")
    }
}

/// Replace characters that are unsafe in a single path component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Join an untrusted file name onto `dir`, refusing anything that is not a
/// single plain path component.
pub fn child_path(dir: &Path, file_name: &str) -> Result<PathBuf, StorageError> {
    let invalid = file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name.contains('\0');
    if invalid {
        return Err(StorageError::InvalidFileName(file_name.to_string()));
    }
    Ok(dir.join(file_name))
}

/// Creates parent directories for a path.
async fn ensure_parent_dir(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    Ok(())
}

/// Create or truncate `path` with `contents`, creating parent directories.
///
/// Each call writes its own temporary file, so concurrent writes of the same
/// path never see each other's partial output.
pub async fn write_file(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    ensure_parent_dir(path).await?;

    let tmp_path = temp_path(path);
    let write_failed = |source| StorageError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Err(e) = fs::write(&tmp_path, contents).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(write_failed(e));
    }
    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        // Another writer already put the same bytes in place.
        if fs::read(path).await.is_ok_and(|current| current == contents) {
            return Ok(());
        }
        return Err(write_failed(e));
    }
    Ok(())
}

/// `<name>.<pid>-<seq>.part` next to `path`.
fn temp_path(path: &Path) -> PathBuf {
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}-{seq}.part", std::process::id()));
    path.with_file_name(name)
}

pub async fn read_bytes(path: &Path) -> Result<Vec<u8>, StorageError> {
    fs::read(path).await.map_err(|e| StorageError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Lowercase hex digest of the file at `path`.
pub async fn hash_file(path: &Path, scheme: HashScheme) -> Result<String, StorageError> {
    let read_failed = |source| StorageError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).await.map_err(read_failed)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    match scheme {
        HashScheme::Md5 => {
            let mut context = md5::Context::new();
            loop {
                let bytes_read = reader.read(&mut buffer).await.map_err(read_failed)?;
                if bytes_read == 0 {
                    break;
                }
                context.consume(&buffer[..bytes_read]);
            }
            Ok(format!("{:x}", context.compute()))
        }
        HashScheme::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let bytes_read = reader.read(&mut buffer).await.map_err(read_failed)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}

/// Cursor saved by the previous pull, if any.
pub async fn load_cursor(path: &Path) -> Result<Option<Cursor>, StorageError> {
    match fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(Cursor::parse(&raw))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persist the cursor verbatim for the next pull.
pub async fn save_cursor(path: &Path, cursor: &Cursor) -> Result<(), StorageError> {
    write_file(path, cursor.value().as_bytes()).await
}
