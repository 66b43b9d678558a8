//! In-process index, for tests and one-shot runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{IndexError, InstanceIndex};

#[derive(Debug, Default)]
pub struct MemoryInstanceIndex {
    entries: RwLock<HashMap<String, PathBuf>>,
}

impl MemoryInstanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index pre-populated with `ids`, as if pulled by an earlier run.
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = ids
            .into_iter()
            .map(|id| (id.into(), PathBuf::new()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Local path recorded for `instance_id`.
    pub fn path_of(&self, instance_id: &str) -> Option<PathBuf> {
        self.entries.read().ok()?.get(instance_id).cloned()
    }
}

impl InstanceIndex for MemoryInstanceIndex {
    fn has(&self, instance_id: &str) -> Result<bool, IndexError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| IndexError::Internal(e.to_string()))?;
        Ok(entries.contains_key(instance_id))
    }

    fn put(&self, instance_id: &str, local_path: &Path) -> Result<(), IndexError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| IndexError::Internal(e.to_string()))?;
        entries.insert(instance_id.to_string(), local_path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_then_has() {
        let index = MemoryInstanceIndex::new();
        assert!(!index.has("uuid:1").unwrap());

        index.put("uuid:1", Path::new("/tmp/a")).unwrap();
        index.put("uuid:1", Path::new("/tmp/b")).unwrap();

        assert!(index.has("uuid:1").unwrap());
        assert_eq!(index.len(), 1);
        assert_eq!(index.path_of("uuid:1"), Some(PathBuf::from("/tmp/b")));
    }

    #[test]
    fn test_with_ids() {
        let index = MemoryInstanceIndex::with_ids(["uuid:1", "uuid:2"]);
        assert!(index.has("uuid:2").unwrap());
        assert!(!index.has("uuid:3").unwrap());
    }
}
