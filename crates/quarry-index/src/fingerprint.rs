//! Content fingerprinting for change detection and chunk identity.
//!
//! Fingerprints are the only change-detection mechanism in the pipeline:
//! file modification timestamps do not survive copies and checkouts, so
//! nothing here ever looks at them.

use uuid::Uuid;

/// Normalize text for fingerprinting: line endings become `\n` and
/// trailing whitespace is stripped per line. Indentation is preserved;
/// it is semantically significant in at least Python and Markdown.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        out.push_str(line.trim_end());
        out.push('\n');
    }
    // A trailing newline is added even for input without one, so the
    // presence of a final newline does not change identity.
    if text.is_empty() {
        out.clear();
    }
    out
}

/// Stable digest of the normalized text, as lowercase hex.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    blake3::hash(normalize(text).as_bytes()).to_hex().to_string()
}

/// Deterministic chunk id from (file path, symbol path, fingerprint).
///
/// UUIDv5 keeps the id stable across re-index runs of unchanged content
/// while staying a valid vector-store point id. `discriminant` separates
/// chunks that share all three components, such as repeated identical
/// windows of one file.
#[must_use]
pub fn chunk_id(file_path: &str, symbol_path: &str, fingerprint: &str, discriminant: u32) -> String {
    let material = format!("{file_path}\x1f{symbol_path}\x1f{fingerprint}\x1f{discriminant}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes()).to_string()
}
