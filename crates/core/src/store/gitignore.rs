//! Keeps the database's own files out of git without overriding a repo's
//! explicit decision to track them.
//!
//! Walks up from the database path looking for a `.git` directory to find
//! the repo root (falling back to the database's parent directory), then
//! appends whichever of the standard database-file patterns are not
//! already present. A pattern already covered by a negation rule
//! (`!pattern`, checked by exact line match against the pattern with its
//! leading `!` stripped) is skipped and logged, never re-added — adding it
//! back would silently override the repo's choice to track that file.

use std::path::{Path, PathBuf};

use tracing::warn;

const HEADER: &str = "# ScriptRAG database files";

fn find_repo_root(db_path: &Path) -> PathBuf {
    let mut dir = db_path.parent().unwrap_or(db_path).to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return dir;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return db_path.parent().unwrap_or(db_path).to_path_buf(),
        }
    }
}

fn patterns_for(db_path: &Path) -> Vec<String> {
    let stem = db_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("scriptrag.db")
        .to_owned();

    vec![
        stem.clone(),
        format!("{stem}-shm"),
        format!("{stem}-wal"),
        "*.db".to_owned(),
        "*.db-shm".to_owned(),
        "*.db-wal".to_owned(),
    ]
}

/// Ensure the repo's `.gitignore` covers `db_path`'s database files,
/// respecting any existing negation rules. Failures (permissions, missing
/// parent) are logged as warnings and otherwise ignored — this is a
/// best-effort convenience, never a hard requirement for `Store::open`.
pub fn update_gitignore(db_path: &Path) {
    let root = find_repo_root(db_path);
    let gitignore_path = root.join(".gitignore");

    let existing = std::fs::read_to_string(&gitignore_path).unwrap_or_default();
    let lines: Vec<&str> = existing.lines().collect();

    let is_present = |pattern: &str| {
        lines.iter().any(|l| l.trim() == pattern)
    };
    let is_negated = |pattern: &str| -> Option<&str> {
        let negated = format!("!{pattern}");
        lines.iter().find(|l| l.trim() == negated).copied()
    };

    let mut to_add = Vec::new();
    for pattern in patterns_for(db_path) {
        if is_present(&pattern) {
            continue;
        }
        if let Some(rule) = is_negated(&pattern) {
            warn!(
                pattern = %pattern,
                negation_rule = %rule,
                "Skipping pattern due to existing negation rule"
            );
            continue;
        }
        to_add.push(pattern);
    }

    if to_add.is_empty() {
        return;
    }

    let mut new_content = existing.clone();
    if !new_content.is_empty() && !new_content.ends_with('\n') {
        new_content.push('\n');
    }
    if !new_content.is_empty() {
        new_content.push('\n');
    }
    new_content.push_str(HEADER);
    new_content.push('\n');
    for pattern in &to_add {
        new_content.push_str(pattern);
        new_content.push('\n');
    }

    if let Err(e) = std::fs::write(&gitignore_path, new_content) {
        warn!(error = %e, path = %gitignore_path.display(), "Failed to update .gitignore");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_new_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("scriptrag.db");
        update_gitignore(&db);
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(content.contains("scriptrag.db"));
        assert!(content.contains("*.db-wal"));
    }

    #[test]
    fn appends_to_existing_without_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.pyc\nscriptrag.db\n").unwrap();
        let db = dir.path().join("scriptrag.db");
        update_gitignore(&db);
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.iter().filter(|l| **l == "scriptrag.db").count(), 1);
        assert!(content.contains("*.pyc"));
    }

    #[test]
    fn respects_negation_rule() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".gitignore"),
            "*.db\n!scriptrag.db\n",
        )
        .unwrap();
        let db = dir.path().join("scriptrag.db");
        update_gitignore(&db);
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.iter().filter(|l| **l == "scriptrag.db").count(), 0);
        assert!(content.contains("!scriptrag.db"));
    }

    #[test]
    fn finds_git_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let subdir = dir.path().join("subdir");
        std::fs::create_dir(&subdir).unwrap();
        let db = subdir.join("scriptrag.db");
        update_gitignore(&db);
        assert!(dir.path().join(".gitignore").exists());
        assert!(!subdir.join(".gitignore").exists());
    }

    #[test]
    fn no_changes_when_all_patterns_present() {
        let dir = tempfile::tempdir().unwrap();
        let content = "scriptrag.db\nscriptrag.db-shm\nscriptrag.db-wal\n*.db\n*.db-shm\n*.db-wal\n";
        std::fs::write(dir.path().join(".gitignore"), content).unwrap();
        let db = dir.path().join("scriptrag.db");
        update_gitignore(&db);
        let after = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(after, content);
    }
}
