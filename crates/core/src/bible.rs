//! The bible-parsing boundary.
//!
//! Bible auto-detection heuristics and markdown chunking rules are
//! explicitly out of scope (§1): this module defines the trait the
//! indexer's bible phase consumes, plus a deterministic stand-in used by
//! tests and by callers that have not wired in a real markdown chunker.

use std::path::Path;

use crate::model::{Bible, BibleChunk};

/// An opaque bible parser: a deterministic, pure function of a markdown
/// file's contents that chunks it into the §3 data model, preserving
/// heading nesting as `parent_chunk_id` references to earlier chunks.
pub trait BibleParser: Send + Sync {
    /// Parse the bible markdown file at `path` into a [`Bible`] with its
    /// `chunks` populated in document order, `chunk_number` 1-indexed and
    /// dense. Implementations must raise a single-line error message on
    /// failure.
    fn parse_bible(&self, path: &Path) -> crate::Result<Bible>;
}

/// Minimal markdown chunker: splits on ATX headings (`#`..`######`),
/// treating each heading and the text up to the next heading of equal or
/// lesser level as one chunk. A heading's parent is the nearest preceding
/// chunk with a strictly smaller level — by construction that chunk
/// always has a smaller `chunk_number`, so the resulting tree is acyclic.
pub struct StubBibleParser;

impl BibleParser for StubBibleParser {
    fn parse_bible(&self, path: &Path) -> crate::Result<Bible> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::ScreenplayParseError(format!("read {}: {e}", path.display())))?;

        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_owned();

        let file_hash = crate::hash::compute_content_hash(&raw);

        let mut bible = Bible {
            id: 0,
            script_id: 0,
            file_path: path.display().to_string(),
            title,
            file_hash,
            metadata: Default::default(),
            chunks: Vec::new(),
        };
        bible.chunks = chunk_markdown(&raw);
        Ok(bible)
    }
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = trimmed[level..].trim();
    if rest.is_empty() && !trimmed[level..].is_empty() {
        // A bare "#" with only whitespace following is still a heading
        // line, just with an empty title.
    }
    Some((level, rest))
}

fn chunk_markdown(raw: &str) -> Vec<BibleChunk> {
    struct Pending {
        heading: String,
        level: i64,
        body: String,
    }

    let mut chunks: Vec<BibleChunk> = Vec::new();
    // Stack of (level, chunk_number) for ancestors still in scope.
    let mut ancestors: Vec<(i64, i64)> = Vec::new();
    let mut pending: Option<Pending> = None;
    let mut next_number = 1i64;

    let mut flush = |pending: Option<Pending>, chunks: &mut Vec<BibleChunk>, ancestors: &mut Vec<(i64, i64)>| {
        let Some(p) = pending else { return };
        let content = p.body.trim().to_owned();
        let content_hash = crate::hash::compute_content_hash(&content);

        while ancestors.last().is_some_and(|(lvl, _)| *lvl >= p.level) {
            ancestors.pop();
        }
        let parent_chunk_id = ancestors.last().map(|(_, id)| *id);

        let number = next_number;
        next_number += 1;
        chunks.push(BibleChunk {
            id: 0,
            bible_id: 0,
            chunk_number: number,
            heading: p.heading,
            level: p.level,
            content,
            content_hash,
            parent_chunk_id,
            metadata: Default::default(),
        });
        ancestors.push((p.level, number));
    };

    for line in raw.lines() {
        if let Some((level, title)) = heading_level(line) {
            flush(pending.take(), &mut chunks, &mut ancestors);
            pending = Some(Pending {
                heading: title.to_owned(),
                level: level as i64,
                body: String::new(),
            });
        } else if let Some(p) = pending.as_mut() {
            p.body.push_str(line);
            p.body.push('\n');
        }
    }
    flush(pending.take(), &mut chunks, &mut ancestors);

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_nested_headings_with_parent_references() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bible.md");
        std::fs::write(
            &path,
            "# World\n\nOverview text.\n\n## Characters\n\nList.\n\n### Alice\n\nHer backstory.\n",
        )
        .unwrap();

        let parser = StubBibleParser;
        let bible = parser.parse_bible(&path).unwrap();
        assert_eq!(bible.chunks.len(), 3);
        assert_eq!(bible.chunks[0].parent_chunk_id, None);
        assert_eq!(bible.chunks[1].parent_chunk_id, Some(bible.chunks[0].chunk_number));
        assert_eq!(bible.chunks[2].parent_chunk_id, Some(bible.chunks[1].chunk_number));
    }

    #[test]
    fn sibling_headings_share_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bible.md");
        std::fs::write(
            &path,
            "# World\n\n## Alice\n\nText.\n\n## Bob\n\nText.\n",
        )
        .unwrap();

        let parser = StubBibleParser;
        let bible = parser.parse_bible(&path).unwrap();
        assert_eq!(bible.chunks.len(), 3);
        assert_eq!(bible.chunks[1].parent_chunk_id, Some(1));
        assert_eq!(bible.chunks[2].parent_chunk_id, Some(1));
    }

    #[test]
    fn chunk_numbers_are_dense_and_one_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bible.md");
        std::fs::write(&path, "# A\nx\n# B\ny\n# C\nz\n").unwrap();

        let parser = StubBibleParser;
        let bible = parser.parse_bible(&path).unwrap();
        let numbers: Vec<i64> = bible.chunks.iter().map(|c| c.chunk_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn file_hash_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bible.md");
        std::fs::write(&path, "# A\nsame content\n").unwrap();
        let parser = StubBibleParser;
        let a = parser.parse_bible(&path).unwrap();
        let b = parser.parse_bible(&path).unwrap();
        assert_eq!(a.file_hash, b.file_hash);
    }
}
