//! Registers the indexer's embedding output directory with Git LFS by
//! appending a filter line to `.gitattributes`, the same "read, check if
//! present, append" shape the original embedding analyzer uses for
//! `.npy` files.

use std::path::Path;

use tracing::warn;

/// Ensure `repo_root/.gitattributes` declares `lfs_dir/*.npy` as an LFS
/// filter. A no-op if the line is already present.
pub fn ensure_lfs_pattern(repo_root: &Path, lfs_dir: &str) {
    let pattern = format!("{lfs_dir}/*.npy filter=lfs diff=lfs merge=lfs -text");
    let path = repo_root.join(".gitattributes");

    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    if existing.lines().any(|l| l.trim() == pattern) {
        return;
    }

    let mut new_content = existing.clone();
    if !new_content.is_empty() && !new_content.ends_with('\n') {
        new_content.push('\n');
    }
    new_content.push_str(&pattern);
    new_content.push('\n');

    if let Err(e) = std::fs::write(&path, new_content) {
        warn!(error = %e, path = %path.display(), "failed to update .gitattributes for LFS");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_gitattributes_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        ensure_lfs_pattern(dir.path(), "embeddings");
        let content = std::fs::read_to_string(dir.path().join(".gitattributes")).unwrap();
        assert!(content.contains("embeddings/*.npy filter=lfs"));
    }

    #[test]
    fn does_not_duplicate_existing_pattern() {
        let dir = tempfile::tempdir().unwrap();
        ensure_lfs_pattern(dir.path(), "embeddings");
        ensure_lfs_pattern(dir.path(), "embeddings");
        let content = std::fs::read_to_string(dir.path().join(".gitattributes")).unwrap();
        assert_eq!(content.matches("embeddings/*.npy").count(), 1);
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitattributes"), "*.bin filter=lfs\n").unwrap();
        ensure_lfs_pattern(dir.path(), "embeddings");
        let content = std::fs::read_to_string(dir.path().join(".gitattributes")).unwrap();
        assert!(content.contains("*.bin filter=lfs"));
        assert!(content.contains("embeddings/*.npy filter=lfs"));
    }
}
