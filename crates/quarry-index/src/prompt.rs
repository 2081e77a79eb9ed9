//! Deterministic prompt construction for code questions.

use std::fmt::Write;

use crate::retriever::Citation;

const SYSTEM_PREAMBLE: &str = "You are an expert code assistant. Answer questions about the \
codebase below accurately and concisely.\n\
Guidelines:\n\
- Base your answer only on the provided code context\n\
- Cite specific functions or classes when referring to them\n\
- If the context does not contain enough information, say so\n";

/// Render the selected chunks as a context block.
///
/// The rendering is a pure function of the citations: same selection,
/// same prompt.
#[must_use]
pub fn render_context(citations: &[Citation]) -> String {
    let mut out = String::new();
    for (i, citation) in citations.iter().enumerate() {
        let _ = writeln!(
            out,
            "### [{n}] {path}:{start}-{end} ({kind}, score {score:.3})",
            n = i + 1,
            path = citation.file_path,
            start = citation.start_line,
            end = citation.end_line,
            kind = citation.kind,
            score = citation.score,
        );
        let _ = writeln!(out, "```{}", citation.language);
        if let Some(header) = &citation.context_header {
            out.push_str(header);
            out.push('\n');
        }
        out.push_str(&citation.text);
        out.push_str("\n```\n\n");
    }
    out
}

/// Full generation prompt: preamble, context block, then the question.
#[must_use]
pub fn render_prompt(query: &str, citations: &[Citation]) -> String {
    format!(
        "{SYSTEM_PREAMBLE}\nContext (relevant code):\n{}Question: {query}\n",
        render_context(citations)
    )
}
