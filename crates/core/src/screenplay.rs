//! The screenplay-parser boundary.
//!
//! The Fountain surface-syntax parser is explicitly out of scope (§1):
//! this module only defines the trait the indexer consumes, plus the
//! `Script`/`Scene` shape it must produce. Concrete parsers are supplied
//! by the caller — typically a separate crate, or the
//! [`StubScreenplayParser`] below for tests and examples that need a
//! deterministic, dependency-free stand-in.

use crate::model::Script;

/// An opaque screenplay parser: a deterministic, pure function of a file's
/// contents that produces the §3 data model.
pub trait ScreenplayParser: Send + Sync {
    /// Parse the screenplay at `path`, returning a [`Script`] with its
    /// `scenes` populated (each scene's `original_text` set to its raw
    /// slice of the source so the indexer can hash/embed it faithfully).
    ///
    /// Implementations must raise a single-line error message on failure;
    /// they must not partially populate a `Script` on error.
    fn parse_screenplay(&self, path: &std::path::Path) -> crate::Result<Script>;
}

/// Minimal Fountain-ish parser used by tests and by callers that have not
/// wired in a real Fountain implementation. Recognizes a heading line
/// (`INT.`/`EXT.`/intercut forms) as a scene boundary and treats everything
/// up to the next heading as that scene's body.
pub struct StubScreenplayParser;

impl ScreenplayParser for StubScreenplayParser {
    fn parse_screenplay(&self, path: &std::path::Path) -> crate::Result<Script> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::ScreenplayParseError(format!("read {}: {e}", path.display())))?;

        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_owned();

        let mut script = Script::new(title, path.display().to_string());
        script.scenes = split_into_scenes(&raw);
        Ok(script)
    }
}

fn split_into_scenes(raw: &str) -> Vec<crate::model::Scene> {
    let mut scenes = Vec::new();
    let mut current_heading: Option<String> = None;
    let mut current_body = String::new();

    let flush = |heading: &Option<String>, body: &str, out: &mut Vec<crate::model::Scene>| {
        if let Some(h) = heading {
            let text = format!("{h}\n\n{}", body.trim());
            out.push(crate::model::Scene::from_parsed(h, &text, Some(text.clone())));
        }
    };

    for line in raw.lines() {
        if is_heading_line(line) {
            flush(&current_heading, &current_body, &mut scenes);
            current_heading = Some(line.trim().to_owned());
            current_body.clear();
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    flush(&current_heading, &current_body, &mut scenes);

    scenes
}

fn is_heading_line(line: &str) -> bool {
    let upper = line.trim().to_uppercase();
    upper.starts_with("INT.")
        || upper.starts_with("INT ")
        || upper.starts_with("EXT.")
        || upper.starts_with("EXT ")
        || upper.starts_with("INT./EXT.")
        || upper.starts_with("INT/EXT.")
        || upper.starts_with("I/E.")
        || upper.starts_with("I/E ")
}
