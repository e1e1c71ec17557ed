//! Parses a wait-time hint out of a rate-limited provider response: a
//! `Retry-After` header value if present, otherwise a `"wait N seconds"`
//! phrase in the response body (the shape GitHub Models' API uses).

/// A parsed rate-limit hint, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHint {
    pub retry_after_secs: u64,
}

/// Parse a `Retry-After` header value (seconds form only — HTTP-date
/// values are not used by any provider this module targets).
pub fn parse_retry_after_header(value: &str) -> Option<RateLimitHint> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| RateLimitHint { retry_after_secs: secs })
}

/// Parse a `"wait N seconds"` phrase out of a response body.
pub fn parse_wait_phrase(body: &str) -> Option<RateLimitHint> {
    let lower = body.to_ascii_lowercase();
    let idx = lower.find("wait ")?;
    let rest = &lower[idx + "wait ".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let after_digits = rest[digits.len()..].trim_start();
    if !after_digits.starts_with("seconds") && !after_digits.starts_with("second") {
        return None;
    }
    digits
        .parse::<u64>()
        .ok()
        .map(|secs| RateLimitHint { retry_after_secs: secs })
}

/// Try the header first, then the body.
pub fn parse_rate_limit(header: Option<&str>, body: &str) -> Option<RateLimitHint> {
    header
        .and_then(parse_retry_after_header)
        .or_else(|| parse_wait_phrase(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header() {
        let hint = parse_retry_after_header("30").unwrap();
        assert_eq!(hint.retry_after_secs, 30);
    }

    #[test]
    fn parses_wait_phrase() {
        let hint = parse_wait_phrase("Rate limited, please wait 42 seconds and retry").unwrap();
        assert_eq!(hint.retry_after_secs, 42);
    }

    #[test]
    fn parses_singular_second() {
        let hint = parse_wait_phrase("please wait 1 second").unwrap();
        assert_eq!(hint.retry_after_secs, 1);
    }

    #[test]
    fn no_hint_returns_none() {
        assert!(parse_wait_phrase("internal server error").is_none());
    }

    #[test]
    fn header_takes_priority_over_body() {
        let hint = parse_rate_limit(Some("10"), "wait 99 seconds").unwrap();
        assert_eq!(hint.retry_after_secs, 10);
    }

    #[test]
    fn falls_back_to_body_when_no_header() {
        let hint = parse_rate_limit(None, "wait 7 seconds").unwrap();
        assert_eq!(hint.retry_after_secs, 7);
    }
}
