//! Contextualized embedding text generation.
//!
//! Embedding the raw slice alone retrieves poorly for conceptual queries.
//! Prepending file path, symbol path, and language tag anchors the vector
//! to where the code lives, not just what it says.

use crate::chunker::Chunk;

/// Text handed to the embedding model for a chunk. Not for display.
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk) -> String {
    let mut text = String::with_capacity(chunk.text.len() + 128);

    text.push_str("# ");
    text.push_str(&chunk.file_path);
    text.push('\n');

    if !chunk.symbol_path.is_empty() {
        text.push_str("# Symbol: ");
        text.push_str(&chunk.symbol_path);
        if let Some(name) = &chunk.name {
            text.push_str("::");
            text.push_str(name);
        }
        text.push('\n');
    } else if let Some(name) = &chunk.name {
        text.push_str("# Symbol: ");
        text.push_str(name);
        text.push('\n');
    }

    text.push_str("# Language: ");
    text.push_str(chunk.language.id());
    text.push('\n');

    text.push_str(&chunk.display_text());
    text
}

/// Short one-line label for logs and reports.
#[must_use]
pub fn chunk_display_header(chunk: &Chunk) -> String {
    let name = chunk
        .name
        .as_deref()
        .unwrap_or_else(|| chunk.kind.as_str());
    format!(
        "{} :: {} (lines {}-{})",
        chunk.file_path, name, chunk.start_line, chunk.end_line
    )
}
