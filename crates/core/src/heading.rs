//! Scene heading parsing: `INT. OFFICE - DAY` → (type, location, time).

const TIME_INDICATORS: &[&str] = &[
    "DAY",
    "NIGHT",
    "MORNING",
    "AFTERNOON",
    "EVENING",
    "DUSK",
    "DAWN",
    "CONTINUOUS",
    "LATER",
    "MOMENTS LATER",
    "MIDNIGHT",
    "NOON",
    "SAME TIME",
    "SAME",
];

/// Recognized heading prefixes, longest-match-first so `INT./EXT.` is not
/// mistaken for a plain `INT.`.
const PREFIXES: &[(&str, &str)] = &[
    ("INT./EXT.", "INT/EXT"),
    ("INT/EXT.", "INT/EXT"),
    ("I/E.", "INT/EXT"),
    ("I/E ", "INT/EXT"),
    ("INT.", "INT"),
    ("INT ", "INT"),
    ("EXT.", "EXT"),
    ("EXT ", "EXT"),
];

/// Parse a scene heading into `(type, location, time)`.
///
/// `type` is one of `{"INT", "EXT", "INT/EXT", ""}`. If the remainder (after
/// the recognized prefix) splits on the rightmost `" - "`, the right side is
/// treated as a time indicator when it matches (case-insensitively) one of
/// [`TIME_INDICATORS`]; otherwise the whole remainder is the location.
/// Location keeps its original casing; type and time are uppercased.
pub fn parse_scene_heading(heading: &str) -> (String, Option<String>, Option<String>) {
    let trimmed = heading.trim();
    let upper = trimmed.to_uppercase();

    let mut scene_type = String::new();
    let mut remainder = trimmed;

    for (prefix, canonical) in PREFIXES {
        if upper.starts_with(prefix) {
            scene_type = canonical.to_string();
            remainder = trimmed[prefix.len()..].trim_start();
            break;
        }
    }

    if remainder.is_empty() {
        return (scene_type, None, None);
    }

    if let Some(split_at) = remainder.rfind(" - ") {
        let location = remainder[..split_at].trim();
        let time_candidate = remainder[split_at + 3..].trim();
        if TIME_INDICATORS.contains(&time_candidate.to_uppercase().as_str()) {
            let location = (!location.is_empty()).then(|| location.to_owned());
            return (scene_type, location, Some(time_candidate.to_uppercase()));
        }
    }

    (scene_type, Some(remainder.to_owned()), None)
}
