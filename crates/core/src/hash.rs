//! Content hashing and boneyard stripping.
//!
//! The boneyard is the screenplay-syntax convention of embedding
//! out-of-script notes between `/* ... */`; ScriptRAG uses the literal
//! delimiters `/* SCRIPTRAG-META-START` ... `SCRIPTRAG-META-END */` to carry
//! structured analyzer output. Stripping it before hashing and before
//! embedding is what makes re-annotating a scene a no-op for its identity.

use sha2::{Digest, Sha256};

const META_START: &str = "/* SCRIPTRAG-META-START";
const META_END: &str = "SCRIPTRAG-META-END */";

/// Remove every boneyard metadata region (and any immediately surrounding
/// whitespace) from `text`. Multiple regions are allowed; an unterminated
/// start marker is left untouched rather than silently truncating content.
pub fn strip_boneyard(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        let Some(start) = rest.find(META_START) else {
            result.push_str(rest);
            break;
        };

        let after_start = &rest[start + META_START.len()..];
        let Some(end_rel) = after_start.find(META_END) else {
            // No terminator: treat the rest of the text as plain content.
            result.push_str(rest);
            break;
        };

        let block_end = start + META_START.len() + end_rel + META_END.len();

        // Drop whitespace immediately preceding the block along with the block itself.
        result.push_str(rest[..start].trim_end_matches(|c: char| c.is_whitespace()));

        rest = &rest[block_end..];
        // Skip whitespace immediately following the closing delimiter.
        rest = rest.trim_start_matches(|c: char| c == ' ' || c == '\t');
        if rest.starts_with('\n') {
            rest = &rest[1..];
        }
    }

    result
}

/// Build the literal boneyard block for `metadata`, bit-exact with
/// `/* SCRIPTRAG-META-START\n{json}\nSCRIPTRAG-META-END */`.
pub fn format_boneyard(metadata: &serde_json::Value) -> crate::Result<String> {
    let json = serde_json::to_string_pretty(metadata)?;
    Ok(format!("{META_START}\n{json}\n{META_END}"))
}

/// Extract the boneyard metadata JSON from `text`, if any region is
/// present. Only the first well-formed region is returned — scenes carry
/// at most one analyzer-output block in practice, but multiple malformed
/// fragments must not abort parsing.
pub fn extract_boneyard(text: &str) -> Option<serde_json::Value> {
    let start = text.find(META_START)?;
    let after_start = &text[start + META_START.len()..];
    let end_rel = after_start.find(META_END)?;
    let json_str = after_start[..end_rel].trim();
    serde_json::from_str(json_str).ok()
}

/// SHA-256 of the boneyard-stripped, UTF-8-encoded scene text.
///
/// Returns the 16-hex-character truncated form (the stable "scene id" used
/// by caches and agents) when `truncate` is set, else the full 64-hex
/// digest.
pub fn compute_scene_hash(text: &str, truncate: bool) -> String {
    let stripped = strip_boneyard(text);
    let mut hasher = Sha256::new();
    hasher.update(stripped.as_bytes());
    let digest = hasher.finalize();
    let full = hex_encode(&digest);
    if truncate {
        full[..16].to_owned()
    } else {
        full
    }
}

/// SHA-256 of arbitrary content, full 64-hex digest. Used for bible
/// document hashes and the embedding content-cache key.
pub fn compute_content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String never fails");
    }
    s
}
