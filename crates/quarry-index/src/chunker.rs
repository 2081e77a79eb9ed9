//! Structure-aware source chunking.
//!
//! A parsed syntax tree supplies declaration boundaries; whatever the tree
//! does not cover is windowed into module fragments. Chunking never fails
//! on malformed input: it degrades to line windows and reports that.

use quarry_store::ChunkKind;
use tree_sitter::{Node, Parser};

use crate::fingerprint::{chunk_id, fingerprint};
use crate::languages::{Lang, LanguageProfile};

/// One retrievable unit of source text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub language: Lang,
    pub kind: ChunkKind,
    /// `::`-joined enclosing symbols; empty at module level. Split
    /// windows of one declaration also carry the declaration's own name.
    pub symbol_path: String,
    pub name: Option<String>,
    /// 1-based, inclusive, covering exactly `text`.
    pub start_line: usize,
    pub end_line: usize,
    /// Exact source slice for the line range.
    pub text: String,
    /// Synthesized enclosing signature for nested units.
    pub context_header: Option<String>,
    pub fingerprint: String,
}

impl Chunk {
    /// Chunk text as presented to embedding and prompts: the context
    /// header, when present, prepended to the source slice.
    #[must_use]
    pub fn display_text(&self) -> String {
        match &self.context_header {
            Some(header) => format!("{header}\n{}", self.text),
            None => self.text.clone(),
        }
    }
}

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Declarations longer than this split into overlapping windows.
    pub max_chunk_chars: usize,
    /// Window height in lines for fallback and fragment chunks.
    pub window_lines: usize,
    /// Overlap between consecutive windows, in lines. Kept below
    /// `window_lines`.
    pub overlap_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 2000,
            window_lines: 60,
            overlap_lines: 10,
        }
    }
}

impl ChunkerConfig {
    fn effective_overlap(&self) -> usize {
        self.overlap_lines.min(self.window_lines.saturating_sub(1))
    }
}

/// Result of chunking one file.
#[derive(Debug)]
pub struct ChunkOutcome {
    /// Chunks in source order.
    pub chunks: Vec<Chunk>,
    /// True when structural parsing was unavailable or partial and line
    /// windowing filled in.
    pub degraded: bool,
}

/// Declaration found in the tree, before sizing and id assignment.
struct Draft {
    kind: ChunkKind,
    name: Option<String>,
    symbol_path: String,
    context_header: Option<String>,
    start_line: usize,
    end_line: usize,
}

/// Chunk `source` into retrievable units.
///
/// Declarations come from the language's grammar profile; uncovered
/// regions and grammarless languages fall back to line windows.
#[must_use]
pub fn chunk_source(
    file_path: &str,
    source: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> ChunkOutcome {
    if source.trim().is_empty() {
        return ChunkOutcome {
            chunks: Vec::new(),
            degraded: false,
        };
    }

    let lines: Vec<&str> = source.lines().collect();

    let Some(profile) = lang.profile() else {
        return windowed_fallback(file_path, &lines, lang, config);
    };

    let mut parser = Parser::new();
    if parser.set_language(&profile.grammar).is_err() {
        return windowed_fallback(file_path, &lines, lang, config);
    }
    let Some(tree) = parser.parse(source, None) else {
        return windowed_fallback(file_path, &lines, lang, config);
    };

    let root = tree.root_node();
    let degraded = root.has_error();

    let mut drafts = Vec::new();
    collect_declarations(&profile, source, &lines, &root, &[], None, &mut drafts);

    // Everything the declarations do not cover becomes module fragments.
    let covered = merge_intervals(drafts.iter().map(|d| (d.start_line, d.end_line)).collect());
    for (gap_start, gap_end) in gaps(&covered, lines.len()) {
        for (start, end) in windows(gap_start, gap_end, config) {
            drafts.push(Draft {
                kind: ChunkKind::ModuleFragment,
                name: None,
                symbol_path: String::new(),
                context_header: None,
                start_line: start,
                end_line: end,
            });
        }
    }

    ChunkOutcome {
        chunks: finalize(file_path, &lines, lang, config, drafts),
        degraded,
    }
}

/// Whole-file line windowing for languages without a usable grammar.
fn windowed_fallback(
    file_path: &str,
    lines: &[&str],
    lang: Lang,
    config: &ChunkerConfig,
) -> ChunkOutcome {
    let drafts = windows(1, lines.len(), config)
        .into_iter()
        .map(|(start, end)| Draft {
            kind: ChunkKind::FallbackWindow,
            name: None,
            symbol_path: String::new(),
            context_header: None,
            start_line: start,
            end_line: end,
        })
        .collect();
    ChunkOutcome {
        chunks: finalize(file_path, lines, lang, config, drafts),
        degraded: true,
    }
}

fn collect_declarations(
    profile: &LanguageProfile,
    source: &str,
    lines: &[&str],
    parent: &Node,
    scope: &[String],
    context_header: Option<&str>,
    out: &mut Vec<Draft>,
) {
    let child_count = u32::try_from(parent.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..child_count {
        let Some(child) = parent.named_child(i) else {
            continue;
        };
        let kind = child.kind();

        if profile.classes.contains(&kind) {
            let name = entity_name(&child, source);
            out.push(Draft {
                kind: ChunkKind::Class,
                symbol_path: scope.join("::"),
                context_header: context_header.map(str::to_owned),
                start_line: child.start_position().row + 1,
                end_line: node_end_line(&child, lines.len()),
                name: name.clone(),
            });

            let mut inner_scope = scope.to_vec();
            inner_scope.push(name.unwrap_or_else(|| kind.to_owned()));
            let header = signature(&child, lines);
            collect_declarations(
                profile,
                source,
                lines,
                &child,
                &inner_scope,
                Some(&header),
                out,
            );
        } else if profile.functions.contains(&kind) {
            let chunk_kind = if scope.is_empty() {
                ChunkKind::Function
            } else {
                ChunkKind::Method
            };
            out.push(Draft {
                kind: chunk_kind,
                name: entity_name(&child, source),
                symbol_path: scope.join("::"),
                context_header: context_header.map(str::to_owned),
                start_line: child.start_position().row + 1,
                end_line: node_end_line(&child, lines.len()),
            });
        } else {
            // Transparent node (class body, decorator wrapper, export
            // statement, ERROR); declarations may sit below it.
            collect_declarations(profile, source, lines, &child, scope, context_header, out);
        }
    }
}

/// Size drafts, assign ids, and return chunks in source order.
fn finalize(
    file_path: &str,
    lines: &[&str],
    lang: Lang,
    config: &ChunkerConfig,
    drafts: Vec<Draft>,
) -> Vec<Chunk> {
    let mut sized = Vec::new();
    for draft in drafts {
        let text = slice_lines(lines, draft.start_line, draft.end_line);
        if text.trim().is_empty() {
            continue;
        }
        if text.chars().count() > config.max_chunk_chars && draft.kind != ChunkKind::ModuleFragment {
            // An oversized declaration becomes overlapping windows that
            // keep its header and symbol path.
            let mut window_symbol = draft.symbol_path.clone();
            if let Some(name) = &draft.name {
                if !window_symbol.is_empty() {
                    window_symbol.push_str("::");
                }
                window_symbol.push_str(name);
            }
            for (start, end) in windows(draft.start_line, draft.end_line, config) {
                let text = slice_lines(lines, start, end);
                if text.trim().is_empty() {
                    continue;
                }
                sized.push(Draft {
                    kind: ChunkKind::FallbackWindow,
                    name: draft.name.clone(),
                    symbol_path: window_symbol.clone(),
                    context_header: draft.context_header.clone(),
                    start_line: start,
                    end_line: end,
                });
            }
        } else {
            sized.push(draft);
        }
    }

    sized.sort_by(|a, b| {
        (a.start_line, a.end_line, &a.symbol_path).cmp(&(b.start_line, b.end_line, &b.symbol_path))
    });

    let mut seen: std::collections::HashMap<(String, String), u32> =
        std::collections::HashMap::new();
    sized
        .into_iter()
        .map(|draft| {
            let text = slice_lines(lines, draft.start_line, draft.end_line);
            let digest = fingerprint(&text);
            let occurrence = seen
                .entry((draft.symbol_path.clone(), digest.clone()))
                .or_insert(0);
            let id = chunk_id(file_path, &draft.symbol_path, &digest, *occurrence);
            *occurrence += 1;
            Chunk {
                id,
                file_path: file_path.to_owned(),
                language: lang,
                kind: draft.kind,
                symbol_path: draft.symbol_path,
                name: draft.name,
                start_line: draft.start_line,
                end_line: draft.end_line,
                text,
                context_header: draft.context_header,
                fingerprint: digest,
            }
        })
        .collect()
}

/// Exact source slice for 1-based inclusive line range.
fn slice_lines(lines: &[&str], start: usize, end: usize) -> String {
    lines[start - 1..end.min(lines.len())].join("\n")
}

/// Last line of a node, clamped: some grammars end a node at column 0 of
/// the following line.
fn node_end_line(node: &Node, total_lines: usize) -> usize {
    let end = node.end_position();
    let row = if end.column == 0 && end.row > node.start_position().row {
        end.row
    } else {
        end.row + 1
    };
    row.clamp(1, total_lines)
}

/// One-line signature of a declaration: its first source line, trimmed.
fn signature(node: &Node, lines: &[&str]) -> String {
    lines
        .get(node.start_position().row)
        .map(|line| line.trim_end().to_owned())
        .unwrap_or_default()
}

fn entity_name(node: &Node, source: &str) -> Option<String> {
    // tree-sitter-rust: impl_item uses the "type" field, most grammars "name"
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .map(|n| source[n.byte_range()].to_string())
}

/// Overlapping line windows covering `[start, end]`.
fn windows(start: usize, end: usize, config: &ChunkerConfig) -> Vec<(usize, usize)> {
    if end < start {
        return Vec::new();
    }
    let width = config.window_lines.max(1);
    let overlap = config.effective_overlap();
    let mut out = Vec::new();
    let mut window_start = start;
    loop {
        let window_end = (window_start + width - 1).min(end);
        out.push((window_start, window_end));
        if window_end == end {
            return out;
        }
        window_start = window_end + 1 - overlap;
    }
}

/// Merge possibly-nested intervals into disjoint covered ranges.
fn merge_intervals(mut intervals: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    intervals.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in intervals {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end + 1 => *last_end = end.max(*last_end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Uncovered line ranges inside `[1, total_lines]`.
fn gaps(covered: &[(usize, usize)], total_lines: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut next = 1;
    for &(start, end) in covered {
        if start > next {
            out.push((next, start - 1));
        }
        next = next.max(end + 1);
    }
    if next <= total_lines {
        out.push((next, total_lines));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    #[test]
    fn rust_single_function() {
        let source = "fn hello() {\n    println!(\"hello world\");\n}\n";
        let outcome = chunk_source("src/main.rs", source, Lang::Rust, &config());
        assert!(!outcome.degraded);
        assert_eq!(outcome.chunks.len(), 1);
        let chunk = &outcome.chunks[0];
        assert_eq!(chunk.kind, ChunkKind::Function);
        assert_eq!(chunk.name.as_deref(), Some("hello"));
        assert_eq!((chunk.start_line, chunk.end_line), (1, 3));
        assert!(chunk.context_header.is_none());
    }

    #[test]
    fn chunk_text_is_exact_source_slice() {
        let source = "use std::io;\n\nfn first() {\n    let x = 1;\n}\n\nfn second() {\n    let y = 2;\n}\n";
        let lines: Vec<&str> = source.lines().collect();
        let outcome = chunk_source("src/lib.rs", source, Lang::Rust, &config());
        for chunk in &outcome.chunks {
            assert!(chunk.start_line <= chunk.end_line);
            let expected = lines[chunk.start_line - 1..chunk.end_line].join("\n");
            assert_eq!(chunk.text, expected);
        }
    }

    #[test]
    fn python_class_with_methods() {
        let source = "class Greeter:\n    def hello(self):\n        print(\"hello\")\n\n    def goodbye(self):\n        print(\"bye\")\n";
        let outcome = chunk_source("app.py", source, Lang::Python, &config());
        let class: Vec<_> = outcome
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Class)
            .collect();
        let methods: Vec<_> = outcome
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Method)
            .collect();
        assert_eq!(class.len(), 1);
        assert_eq!(class[0].name.as_deref(), Some("Greeter"));
        assert_eq!(methods.len(), 2);
        for method in methods {
            assert_eq!(method.symbol_path, "Greeter");
            assert_eq!(method.context_header.as_deref(), Some("class Greeter:"));
            assert!(method.display_text().starts_with("class Greeter:\n"));
        }
    }

    #[test]
    fn rust_impl_methods_get_scope() {
        let source = "struct Foo;\n\nimpl Foo {\n    fn bar(&self) -> i32 {\n        42\n    }\n}\n";
        let outcome = chunk_source("src/foo.rs", source, Lang::Rust, &config());
        let method = outcome
            .chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Method)
            .unwrap();
        assert_eq!(method.symbol_path, "Foo");
        assert_eq!(method.name.as_deref(), Some("bar"));
        assert_eq!(method.context_header.as_deref(), Some("impl Foo {"));
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let outcome = chunk_source("empty.rs", "", Lang::Rust, &config());
        assert!(outcome.chunks.is_empty());
        assert!(!outcome.degraded);

        let outcome = chunk_source("blank.rs", "   \n\n  \n", Lang::Rust, &config());
        assert!(outcome.chunks.is_empty());
    }

    #[test]
    fn comments_only_file_is_one_module_fragment() {
        let source = "# overview\n# this file documents the build\n# nothing executable here\n";
        let outcome = chunk_source("notes.py", source, Lang::Python, &config());
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].kind, ChunkKind::ModuleFragment);
        assert!(!outcome.degraded);
    }

    #[test]
    fn imports_become_module_fragment() {
        let source = "import os\nimport sys\n\ndef main():\n    print(os.getcwd())\n";
        let outcome = chunk_source("main.py", source, Lang::Python, &config());
        let kinds: Vec<ChunkKind> = outcome.chunks.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ChunkKind::Function));
        assert!(kinds.contains(&ChunkKind::ModuleFragment));
        let fragment = outcome
            .chunks
            .iter()
            .find(|c| c.kind == ChunkKind::ModuleFragment)
            .unwrap();
        assert!(fragment.text.contains("import os"));
    }

    #[test]
    fn oversized_method_splits_into_windows_with_header() {
        let mut source = String::from("class Big:\n    def huge(self):\n");
        for i in 0..120 {
            source.push_str(&format!("        value_{i} = {i} * {i}\n"));
        }
        let cfg = ChunkerConfig {
            max_chunk_chars: 300,
            window_lines: 20,
            overlap_lines: 4,
        };
        let outcome = chunk_source("big.py", &source, Lang::Python, &cfg);

        let windows: Vec<_> = outcome
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::FallbackWindow && c.symbol_path == "Big::huge")
            .collect();
        assert!(windows.len() > 1, "expected a split, got {}", windows.len());
        for window in &windows {
            assert_eq!(window.context_header.as_deref(), Some("class Big:"));
        }
        // Consecutive windows overlap; together they cover the whole
        // method with no gap.
        let method_start = windows.iter().map(|c| c.start_line).min().unwrap();
        let method_end = windows.iter().map(|c| c.end_line).max().unwrap();
        assert_eq!(method_start, 2);
        assert_eq!(method_end, source.lines().count());
        for pair in windows.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line + 1);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let source = "fn a() { 1 }\n\nfn b() { 2 }\n";
        let first = chunk_source("src/lib.rs", source, Lang::Rust, &config());
        let second = chunk_source("src/lib.rs", source, Lang::Rust, &config());
        let ids1: Vec<_> = first.chunks.iter().map(|c| c.id.clone()).collect();
        let ids2: Vec<_> = second.chunks.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids1, ids2);
        let fps1: Vec<_> = first.chunks.iter().map(|c| c.fingerprint.clone()).collect();
        let fps2: Vec<_> = second.chunks.iter().map(|c| c.fingerprint.clone()).collect();
        assert_eq!(fps1, fps2);
    }

    #[test]
    fn identical_declarations_get_distinct_ids() {
        let source = "fn same() { 1 }\nfn same() { 1 }\n";
        let outcome = chunk_source("src/dup.rs", source, Lang::Rust, &config());
        assert_eq!(outcome.chunks.len(), 2);
        assert_eq!(outcome.chunks[0].fingerprint, outcome.chunks[1].fingerprint);
        assert_ne!(outcome.chunks[0].id, outcome.chunks[1].id);
    }

    #[test]
    fn chunks_emitted_in_source_order() {
        let source = "fn a() { 1 }\n\nfn b() { 2 }\n\nfn c() { 3 }\n";
        let outcome = chunk_source("src/lib.rs", source, Lang::Rust, &config());
        let starts: Vec<usize> = outcome.chunks.iter().map(|c| c.start_line).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn broken_syntax_degrades_but_still_chunks() {
        let source = "fn good() {\n    let x = 1;\n}\n\nfn broken( {{{\n";
        let outcome = chunk_source("src/bad.rs", source, Lang::Rust, &config());
        assert!(outcome.degraded);
        assert!(
            outcome
                .chunks
                .iter()
                .any(|c| c.text.contains("fn good")),
            "valid declarations survive a partial parse"
        );
    }

    #[test]
    fn toml_file_windows_into_fragments() {
        let source = "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n";
        let outcome = chunk_source("Cargo.toml", source, Lang::Toml, &config());
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].kind, ChunkKind::ModuleFragment);
        assert!(!outcome.degraded);
    }

    #[test]
    fn windows_cover_range_with_overlap() {
        let cfg = ChunkerConfig {
            max_chunk_chars: 100,
            window_lines: 10,
            overlap_lines: 3,
        };
        let spans = windows(1, 25, &cfg);
        assert_eq!(spans[0], (1, 10));
        assert_eq!(spans[1], (8, 17));
        assert!(spans.iter().any(|&(_, end)| end == 25));
        for pair in spans.windows(2) {
            assert!(pair[1].0 <= pair[0].1 + 1, "no gap between windows");
        }
    }

    #[test]
    fn windows_single_when_range_fits() {
        let spans = windows(5, 20, &config());
        assert_eq!(spans, vec![(5, 20)]);
    }

    #[test]
    fn overlap_clamped_below_window() {
        let cfg = ChunkerConfig {
            max_chunk_chars: 100,
            window_lines: 4,
            overlap_lines: 9,
        };
        // Must terminate despite overlap > window.
        let spans = windows(1, 20, &cfg);
        assert!(spans.len() > 1);
        assert_eq!(spans.last().unwrap().1, 20);
    }

    #[test]
    fn merge_intervals_handles_nesting_and_adjacency() {
        assert_eq!(
            merge_intervals(vec![(1, 10), (3, 6), (11, 12), (20, 25)]),
            vec![(1, 12), (20, 25)]
        );
    }

    #[test]
    fn gaps_between_covered_ranges() {
        assert_eq!(
            gaps(&[(3, 5), (9, 10)], 14),
            vec![(1, 2), (6, 8), (11, 14)]
        );
        assert_eq!(gaps(&[], 4), vec![(1, 4)]);
        assert_eq!(gaps(&[(1, 4)], 4), Vec::<(usize, usize)>::new());
    }

    mod window_properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn windows_cover_any_range_without_gaps(
                start in 1usize..50,
                len in 0usize..120,
                window_lines in 1usize..40,
                overlap_lines in 0usize..40,
            ) {
                let cfg = ChunkerConfig {
                    max_chunk_chars: 1000,
                    window_lines,
                    overlap_lines,
                };
                let end = start + len;
                let spans = windows(start, end, &cfg);
                prop_assert!(!spans.is_empty());
                prop_assert_eq!(spans[0].0, start);
                prop_assert_eq!(spans.last().unwrap().1, end);
                for pair in spans.windows(2) {
                    prop_assert!(pair[1].0 <= pair[0].1 + 1);
                    prop_assert!(pair[1].0 > pair[0].0, "windows must advance");
                }
            }
        }
    }
}
