//! Baseline manifests: per-file content hashes captured at workspace setup

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::tools::governor::SPILL_DIR;

/// Map of workspace-relative path -> content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineManifest {
    pub files: BTreeMap<String, String>,
}

impl BaselineManifest {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Relative paths present in `other` whose content differs from (or is
    /// absent in) this baseline.
    pub fn changed_since(&self, other: &BaselineManifest) -> Vec<String> {
        other
            .files
            .iter()
            .filter(|(path, hash)| self.files.get(*path) != Some(*hash))
            .map(|(path, _)| path.clone())
            .collect()
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash every regular file under `dir`, skipping the spill directory.
pub fn capture_baseline(dir: &Path) -> Result<BaselineManifest> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        if rel.starts_with(SPILL_DIR) {
            continue;
        }
        let bytes = std::fs::read(entry.path())?;
        files.insert(rel, hash_bytes(&bytes));
    }
    Ok(BaselineManifest { files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_changed_and_created_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("kept.txt"), "same").unwrap();
        std::fs::write(dir.path().join("edited.txt"), "before").unwrap();
        let baseline = capture_baseline(dir.path()).unwrap();

        std::fs::write(dir.path().join("edited.txt"), "after").unwrap();
        std::fs::write(dir.path().join("new.txt"), "created").unwrap();
        let current = capture_baseline(dir.path()).unwrap();

        let mut changed = baseline.changed_since(&current);
        changed.sort();
        assert_eq!(changed, vec!["edited.txt", "new.txt"]);
    }

    #[test]
    fn spill_directory_is_invisible() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(SPILL_DIR)).unwrap();
        std::fs::write(dir.path().join(SPILL_DIR).join("read-1.txt"), "x").unwrap();

        let manifest = capture_baseline(dir.path()).unwrap();
        assert!(manifest.is_empty());
    }
}
