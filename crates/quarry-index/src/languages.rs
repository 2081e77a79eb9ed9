//! Language detection and per-language grammar capabilities.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Supported language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Bash,
    Toml,
    Json,
    Markdown,
    /// Unrecognized language; chunked by line windowing only.
    Plain,
}

/// Everything the chunker needs to know about a grammar.
///
/// Languages without a profile (or with the grammar feature disabled) are
/// chunked by line windowing instead; the pipeline never branches on the
/// language name itself.
pub struct LanguageProfile {
    pub grammar: tree_sitter::Language,
    /// Node kinds chunked as standalone functions (methods when nested).
    pub functions: &'static [&'static str],
    /// Node kinds chunked as class-like units and recursed into for
    /// nested declarations.
    pub classes: &'static [&'static str],
}

impl Lang {
    /// Identifier used in index payloads and filters.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Bash => "bash",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Plain => "text",
        }
    }

    /// Grammar capability set, if the language feature is compiled in and
    /// the grammar distinguishes declarations worth chunking on.
    #[must_use]
    pub fn profile(self) -> Option<LanguageProfile> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(LanguageProfile {
                grammar: tree_sitter_rust::LANGUAGE.into(),
                functions: &["function_item"],
                classes: &[
                    "struct_item",
                    "enum_item",
                    "trait_item",
                    "impl_item",
                    "mod_item",
                ],
            }),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(LanguageProfile {
                grammar: tree_sitter_python::LANGUAGE.into(),
                functions: &["function_definition"],
                classes: &["class_definition"],
            }),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(LanguageProfile {
                grammar: tree_sitter_javascript::LANGUAGE.into(),
                functions: &[
                    "function_declaration",
                    "generator_function_declaration",
                    "method_definition",
                ],
                classes: &["class_declaration"],
            }),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(LanguageProfile {
                grammar: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
                functions: &[
                    "function_declaration",
                    "generator_function_declaration",
                    "method_definition",
                ],
                classes: &["class_declaration", "interface_declaration"],
            }),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(LanguageProfile {
                grammar: tree_sitter_go::LANGUAGE.into(),
                functions: &["function_declaration", "method_declaration"],
                classes: &["type_declaration"],
            }),
            // Config and prose grammars have no declaration-level units;
            // their whole content is windowed into module fragments.
            #[cfg(feature = "lang-config")]
            Self::Bash => Some(LanguageProfile {
                grammar: tree_sitter_bash::LANGUAGE.into(),
                functions: &["function_definition"],
                classes: &[],
            }),
            #[cfg(feature = "lang-config")]
            Self::Toml => Some(LanguageProfile {
                grammar: tree_sitter_toml_ng::LANGUAGE.into(),
                functions: &[],
                classes: &[],
            }),
            #[cfg(feature = "lang-config")]
            Self::Json => Some(LanguageProfile {
                grammar: tree_sitter_json::LANGUAGE.into(),
                functions: &[],
                classes: &[],
            }),
            #[cfg(feature = "lang-config")]
            Self::Markdown => Some(LanguageProfile {
                grammar: tree_sitter_md::LANGUAGE.into(),
                functions: &[],
                classes: &[],
            }),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        "sh" | "bash" | "zsh" => Some(Lang::Bash),
        "toml" => Some(Lang::Toml),
        "json" | "jsonc" => Some(Lang::Json),
        "md" | "markdown" => Some(Lang::Markdown),
        _ => None,
    }
}
