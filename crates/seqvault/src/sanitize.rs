//! Helpers for sanitizing untrusted data before it enters log lines or
//! tracing span attributes.
//!
//! Client-supplied filenames are stored verbatim on the job record but must
//! never reach a log line unfiltered.

/// Returns a log-safe rendition of a client-supplied filename.
///
/// Control characters and anything outside a conservative allowlist are
/// replaced, and the result is truncated so a hostile name cannot flood logs.
pub fn redact_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(80)
        .collect();

    if cleaned.is_empty() {
        "<unnamed>".to_string()
    } else {
        cleaned
    }
}

/// Abbreviates a content hash for log lines.
pub fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
