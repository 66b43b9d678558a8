//! Recorded-instance index: which submissions are already stored locally.
//!
//! The pull checks [`InstanceIndex::has`] before downloading a submission and
//! calls [`InstanceIndex::put`] once the submission and its attachments are
//! on disk. Both operations are idempotent.

mod memory;
mod sqlite;

pub use memory::MemoryInstanceIndex;
pub use sqlite::SqliteInstanceIndex;

use std::path::Path;

use thiserror::Error;

/// Errors for index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Key existence store for downloaded instance ids.
pub trait InstanceIndex: Send + Sync {
    /// Whether `instance_id` was already recorded.
    fn has(&self, instance_id: &str) -> Result<bool, IndexError>;

    /// Record `instance_id` as stored at `local_path`. Recording it again
    /// replaces the path.
    fn put(&self, instance_id: &str, local_path: &Path) -> Result<(), IndexError>;
}
