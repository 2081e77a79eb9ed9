//! Retrieval orchestration: search, merge, diversify, pack, generate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quarry_llm::{LlmError, LlmProvider};
use quarry_store::{ChunkKind, SearchFilter, SearchHit, VectorIndex};

use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::prompt;
use crate::source::SourceReader;

/// How the token budget is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetUnit {
    /// Raw characters of chunk text.
    Chars,
    /// Estimated model tokens (chars/4 heuristic).
    Tokens,
}

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Chunks aimed for in the final context.
    pub top_k: usize,
    /// Over-fetch factor: the index is asked for
    /// `top_k * candidate_multiplier` candidates to give re-ranking room.
    pub candidate_multiplier: usize,
    /// Minimum cosine similarity for a candidate to be considered at all.
    pub score_threshold: f32,
    /// Maximum chunks drawn from a single file.
    pub max_per_file: usize,
    /// Same-file chunks whose ranges overlap or sit within this many
    /// lines of each other merge into one contiguous chunk.
    pub merge_gap_lines: usize,
    pub budget_unit: BudgetUnit,
    pub generation_timeout: Duration,
    pub max_answer_tokens: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            candidate_multiplier: 5,
            score_threshold: 0.25,
            max_per_file: 3,
            merge_gap_lines: 2,
            budget_unit: BudgetUnit::Tokens,
            generation_timeout: Duration::from_secs(30),
            max_answer_tokens: 512,
        }
    }
}

/// A chunk that was actually placed in the prompt, with the score that
/// justified its selection.
#[derive(Debug, Clone)]
pub struct Citation {
    pub id: String,
    pub file_path: String,
    pub kind: ChunkKind,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub symbol_path: String,
    pub context_header: Option<String>,
    pub text: String,
    pub score: f32,
}

/// Selected context for one query. Ephemeral; never persisted.
#[derive(Debug)]
pub struct RetrievedContext {
    /// Selection order: descending score.
    pub citations: Vec<Citation>,
    pub budget_used: usize,
    pub token_budget: usize,
}

/// Outcome of a full answer request.
#[derive(Debug)]
pub enum Answer {
    /// Generated text plus exactly the chunks that were in the prompt.
    Generated {
        text: String,
        citations: Vec<Citation>,
    },
    /// Nothing scored above the similarity threshold; generation was
    /// never invoked.
    NoRelevantCode,
}

/// Estimate token count using the chars/4 heuristic.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Budget-aware retriever over an indexed tree.
pub struct CodeRetriever<P: LlmProvider> {
    index: Arc<dyn VectorIndex>,
    embedder: Embedder<P>,
    source: Option<Arc<dyn SourceReader>>,
    config: RetrievalConfig,
}

impl<P: LlmProvider> CodeRetriever<P> {
    #[must_use]
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Embedder<P>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            source: None,
            config,
        }
    }

    /// Attach a source reader so that near-miss ranges can be merged by
    /// re-slicing the file. Without one, only overlapping or adjacent
    /// ranges merge.
    #[must_use]
    pub fn with_source_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.source = Some(reader);
        self
    }

    /// Assemble a budget-bounded context for `query`.
    ///
    /// # Errors
    ///
    /// Fails if query embedding or the index search fails.
    pub async fn answer_context(
        &self,
        query: &str,
        token_budget: usize,
    ) -> Result<RetrievedContext> {
        self.answer_context_filtered(query, token_budget, None).await
    }

    /// Same as [`Self::answer_context`] with a metadata restriction
    /// (language, kind, or file).
    ///
    /// # Errors
    ///
    /// Fails if query embedding or the index search fails.
    pub async fn answer_context_filtered(
        &self,
        query: &str,
        token_budget: usize,
        filter: Option<SearchFilter>,
    ) -> Result<RetrievedContext> {
        let query_vector = self.embedder.embed_query(query).await?;

        let k_candidates = self.config.top_k * self.config.candidate_multiplier.max(1);
        let mut hits = self
            .index
            .search(query_vector, k_candidates, filter)
            .await?;
        hits.retain(|h| h.score >= self.config.score_threshold);

        if hits.is_empty() {
            return Ok(RetrievedContext {
                citations: Vec::new(),
                budget_used: 0,
                token_budget,
            });
        }

        let merged = self.merge_hits(hits).await?;
        let selected = self.pack(merged, token_budget);
        Ok(RetrievedContext {
            budget_used: selected
                .iter()
                .map(|c| self.cost(c))
                .sum(),
            citations: selected,
            token_budget,
        })
    }

    /// Answer `query` with generated text and citations.
    ///
    /// # Errors
    ///
    /// Fails with [`IndexError::GenerationTimeout`] when the backend does
    /// not answer in time; retrieval failures propagate unchanged.
    pub async fn answer(&self, query: &str, token_budget: usize) -> Result<Answer> {
        self.answer_filtered(query, token_budget, None).await
    }

    /// Same as [`Self::answer`] with a metadata restriction.
    ///
    /// # Errors
    ///
    /// See [`Self::answer`].
    pub async fn answer_filtered(
        &self,
        query: &str,
        token_budget: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Answer> {
        let context = self
            .answer_context_filtered(query, token_budget, filter)
            .await?;
        if context.citations.is_empty() {
            tracing::debug!("no chunk above similarity threshold, skipping generation");
            return Ok(Answer::NoRelevantCode);
        }

        let rendered = prompt::render_prompt(query, &context.citations);
        let generated = tokio::time::timeout(
            self.config.generation_timeout,
            self.embedder
                .provider()
                .generate(&rendered, self.config.max_answer_tokens),
        )
        .await;

        let text = match generated {
            Err(_) => return Err(IndexError::GenerationTimeout),
            Ok(Err(LlmError::Timeout)) => return Err(IndexError::GenerationTimeout),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(text)) => text,
        };

        Ok(Answer::Generated {
            text,
            citations: context.citations,
        })
    }

    fn cost(&self, citation: &Citation) -> usize {
        let header_len = citation
            .context_header
            .as_deref()
            .map_or(0, |h| h.chars().count() + 1);
        match self.config.budget_unit {
            BudgetUnit::Chars => citation.text.chars().count() + header_len,
            // +20 covers the per-chunk annotation line in the prompt.
            BudgetUnit::Tokens => {
                estimate_tokens(&citation.text) + header_len / 4 + 20
            }
        }
    }

    /// Merge same-file hits whose line ranges overlap or nearly touch.
    ///
    /// Overlapping and adjacent ranges stitch from the hit texts; small
    /// gaps are bridged by re-slicing the current file through the source
    /// reader. The merged chunk keeps the best constituent's score and id.
    async fn merge_hits(&self, hits: Vec<SearchHit>) -> Result<Vec<Citation>> {
        let mut by_file: HashMap<String, Vec<SearchHit>> = HashMap::new();
        for hit in hits {
            by_file.entry(hit.meta.file_path.clone()).or_default().push(hit);
        }

        let mut files: Vec<String> = by_file.keys().cloned().collect();
        files.sort();

        let mut merged = Vec::new();
        for file in files {
            let mut file_hits = by_file.remove(&file).unwrap_or_default();
            file_hits.sort_by(|a, b| {
                (a.meta.start_line, a.meta.end_line).cmp(&(b.meta.start_line, b.meta.end_line))
            });

            let mut file_lines: Option<Vec<String>> = None;
            let mut current = citation_from_hit(&file_hits[0]);

            for hit in file_hits.iter().skip(1) {
                let next = citation_from_hit(hit);
                let adjacent_limit = current.end_line + 1;
                let gap_limit = adjacent_limit + self.config.merge_gap_lines;

                if next.start_line <= adjacent_limit {
                    stitch(&mut current, &next);
                } else if next.start_line <= gap_limit {
                    if file_lines.is_none() {
                        file_lines = self.load_lines(&file).await?;
                    }
                    if let Some(lines) = &file_lines
                        && bridge(&mut current, &next, lines)
                    {
                        continue;
                    }
                    merged.push(std::mem::replace(&mut current, next));
                } else {
                    merged.push(std::mem::replace(&mut current, next));
                }
            }
            merged.push(current);
        }

        // Diversity: cap how much one file can contribute before packing.
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut per_file: HashMap<String, usize> = HashMap::new();
        merged.retain(|citation| {
            let count = per_file.entry(citation.file_path.clone()).or_insert(0);
            *count += 1;
            *count <= self.config.max_per_file.max(1)
        });

        Ok(merged)
    }

    async fn load_lines(&self, file_path: &str) -> Result<Option<Vec<String>>> {
        let Some(reader) = &self.source else {
            return Ok(None);
        };
        let Some(content) = reader.read(file_path).await? else {
            return Ok(None);
        };
        Ok(Some(content.lines().map(str::to_owned).collect()))
    }

    /// Greedy selection in descending score order. A chunk that does not
    /// fit is skipped whole, never truncated, and selection continues
    /// with smaller candidates.
    fn pack(&self, candidates: Vec<Citation>, token_budget: usize) -> Vec<Citation> {
        let mut used = 0usize;
        let mut selected = Vec::new();
        for citation in candidates {
            let cost = self.cost(&citation);
            if used + cost > token_budget {
                continue;
            }
            used += cost;
            selected.push(citation);
        }
        selected
    }
}

fn citation_from_hit(hit: &SearchHit) -> Citation {
    Citation {
        id: hit.id.clone(),
        file_path: hit.meta.file_path.clone(),
        kind: hit.meta.kind,
        language: hit.meta.language.clone(),
        start_line: hit.meta.start_line,
        end_line: hit.meta.end_line,
        symbol_path: hit.meta.symbol_path.clone(),
        context_header: hit.meta.context_header.clone(),
        text: hit.meta.text.clone(),
        score: hit.score,
    }
}

/// Extend `current` with an overlapping or adjacent `next` chunk using
/// only the texts already at hand.
fn stitch(current: &mut Citation, next: &Citation) {
    if next.end_line > current.end_line {
        let skip = current.end_line + 1 - next.start_line;
        for line in next.text.lines().skip(skip) {
            current.text.push('\n');
            current.text.push_str(line);
        }
        current.end_line = next.end_line;
    }
    absorb(current, next);
}

/// Re-slice `current..next` from the file content, bridging the gap.
/// Returns false when the on-disk line count no longer matches the
/// indexed ranges.
fn bridge(current: &mut Citation, next: &Citation, lines: &[String]) -> bool {
    if next.end_line > lines.len() {
        return false;
    }
    current.text = lines[current.start_line - 1..next.end_line].join("\n");
    current.end_line = next.end_line;
    absorb(current, next);
    true
}

/// Merge bookkeeping: the stronger constituent contributes score, id and
/// labeling; differing context headers cancel out.
fn absorb(current: &mut Citation, next: &Citation) {
    if next.score > current.score {
        current.score = next.score;
        current.id = next.id.clone();
        current.kind = next.kind;
        current.symbol_path = next.symbol_path.clone();
    }
    if current.context_header != next.context_header {
        current.context_header = None;
    }
}

#[cfg(test)]
mod tests {
    use quarry_llm::mock::MockProvider;
    use quarry_store::{ChunkMeta, IndexEntry, InMemoryIndex};

    use super::*;
    use crate::embedder::EmbedderConfig;
    use crate::source::StaticSourceReader;

    fn entry(id: &str, file: &str, lines: (usize, usize), vector: Vec<f32>, text: &str) -> IndexEntry {
        IndexEntry {
            id: id.into(),
            vector,
            meta: ChunkMeta {
                file_path: file.into(),
                kind: ChunkKind::Function,
                language: "rust".into(),
                start_line: lines.0,
                end_line: lines.1,
                symbol_path: String::new(),
                fingerprint: format!("fp-{id}"),
                context_header: None,
                text: text.into(),
            },
        }
    }

    async fn query_vector(provider: &MockProvider, query: &str) -> Vec<f32> {
        provider.embed_batch(&[query.to_owned()]).await.unwrap().remove(0)
    }

    fn retriever(
        index: Arc<InMemoryIndex>,
        provider: Arc<MockProvider>,
        config: RetrievalConfig,
    ) -> CodeRetriever<MockProvider> {
        CodeRetriever::new(
            index,
            Embedder::new(provider, None, EmbedderConfig::default()),
            config,
        )
    }

    #[tokio::test]
    async fn budget_is_never_exceeded() {
        let provider = Arc::new(MockProvider::default());
        let index = Arc::new(InMemoryIndex::new());
        let qv = query_vector(&provider, "find the parser").await;

        for i in 0..5 {
            index
                .upsert(entry(
                    &format!("e{i}"),
                    &format!("src/f{i}.rs"),
                    (1, 4),
                    qv.clone(),
                    &"x".repeat(100),
                ))
                .await
                .unwrap();
        }

        let retriever = retriever(
            index,
            provider,
            RetrievalConfig {
                budget_unit: BudgetUnit::Chars,
                score_threshold: 0.5,
                ..RetrievalConfig::default()
            },
        );

        let context = retriever.answer_context("find the parser", 250).await.unwrap();
        assert_eq!(context.citations.len(), 2);
        let total: usize = context
            .citations
            .iter()
            .map(|c| c.text.chars().count())
            .sum();
        assert!(total <= 250);
        // skipped, not truncated
        for citation in &context.citations {
            assert_eq!(citation.text.chars().count(), 100);
        }
    }

    #[tokio::test]
    async fn below_threshold_returns_empty_context() {
        let provider = Arc::new(MockProvider::default());
        let index = Arc::new(InMemoryIndex::new());
        // Opposite of the query vector: similarity is exactly -1.
        let opposite: Vec<f32> = query_vector(&provider, "find the websocket handshake")
            .await
            .iter()
            .map(|x| -x)
            .collect();
        index
            .upsert(entry("e0", "src/a.rs", (1, 4), opposite, "fn a() {}"))
            .await
            .unwrap();

        let retriever = retriever(index, provider, RetrievalConfig::default());
        let context = retriever
            .answer_context("find the websocket handshake", 1000)
            .await
            .unwrap();
        assert!(context.citations.is_empty());
        assert_eq!(context.budget_used, 0);
    }

    #[tokio::test]
    async fn adjacent_ranges_merge_by_stitching() {
        let provider = Arc::new(MockProvider::default());
        let index = Arc::new(InMemoryIndex::new());
        let qv = query_vector(&provider, "merge me").await;

        index
            .upsert(entry("top", "src/a.rs", (1, 2), qv.clone(), "line one\nline two"))
            .await
            .unwrap();
        index
            .upsert(entry("bottom", "src/a.rs", (3, 4), qv.clone(), "line three\nline four"))
            .await
            .unwrap();

        let retriever = retriever(
            index,
            provider,
            RetrievalConfig {
                score_threshold: 0.5,
                ..RetrievalConfig::default()
            },
        );
        let context = retriever.answer_context("merge me", 10_000).await.unwrap();
        assert_eq!(context.citations.len(), 1);
        let merged = &context.citations[0];
        assert_eq!((merged.start_line, merged.end_line), (1, 4));
        assert_eq!(merged.text, "line one\nline two\nline three\nline four");
    }

    #[tokio::test]
    async fn overlapping_ranges_do_not_duplicate_lines() {
        let provider = Arc::new(MockProvider::default());
        let index = Arc::new(InMemoryIndex::new());
        let qv = query_vector(&provider, "overlap").await;

        index
            .upsert(entry("a", "src/a.rs", (1, 3), qv.clone(), "l1\nl2\nl3"))
            .await
            .unwrap();
        index
            .upsert(entry("b", "src/a.rs", (3, 5), qv.clone(), "l3\nl4\nl5"))
            .await
            .unwrap();

        let retriever = retriever(
            index,
            provider,
            RetrievalConfig {
                score_threshold: 0.5,
                ..RetrievalConfig::default()
            },
        );
        let context = retriever.answer_context("overlap", 10_000).await.unwrap();
        assert_eq!(context.citations.len(), 1);
        assert_eq!(context.citations[0].text, "l1\nl2\nl3\nl4\nl5");
    }

    #[tokio::test]
    async fn small_gap_bridged_through_source_reader() {
        let provider = Arc::new(MockProvider::default());
        let index = Arc::new(InMemoryIndex::new());
        let qv = query_vector(&provider, "bridge").await;

        index
            .upsert(entry("a", "src/a.rs", (1, 2), qv.clone(), "l1\nl2"))
            .await
            .unwrap();
        index
            .upsert(entry("b", "src/a.rs", (5, 6), qv.clone(), "l5\nl6"))
            .await
            .unwrap();

        let reader = StaticSourceReader::new([(
            "src/a.rs".to_string(),
            "l1\nl2\nl3\nl4\nl5\nl6\n".to_string(),
        )]);
        let retriever = retriever(
            index,
            provider,
            RetrievalConfig {
                score_threshold: 0.5,
                merge_gap_lines: 2,
                ..RetrievalConfig::default()
            },
        )
        .with_source_reader(Arc::new(reader));

        let context = retriever.answer_context("bridge", 10_000).await.unwrap();
        assert_eq!(context.citations.len(), 1);
        assert_eq!(context.citations[0].text, "l1\nl2\nl3\nl4\nl5\nl6");
        assert_eq!(context.citations[0].end_line, 6);
    }

    #[tokio::test]
    async fn gap_without_reader_stays_split() {
        let provider = Arc::new(MockProvider::default());
        let index = Arc::new(InMemoryIndex::new());
        let qv = query_vector(&provider, "nogap").await;

        index
            .upsert(entry("a", "src/a.rs", (1, 2), qv.clone(), "l1\nl2"))
            .await
            .unwrap();
        index
            .upsert(entry("b", "src/a.rs", (5, 6), qv.clone(), "l5\nl6"))
            .await
            .unwrap();

        let retriever = retriever(
            index,
            provider,
            RetrievalConfig {
                score_threshold: 0.5,
                merge_gap_lines: 2,
                ..RetrievalConfig::default()
            },
        );
        let context = retriever.answer_context("nogap", 10_000).await.unwrap();
        assert_eq!(context.citations.len(), 2);
    }

    #[tokio::test]
    async fn one_file_cannot_monopolize_context() {
        let provider = Arc::new(MockProvider::default());
        let index = Arc::new(InMemoryIndex::new());
        let qv = query_vector(&provider, "cap").await;

        for i in 0..6 {
            let start = i * 20 + 1;
            index
                .upsert(entry(
                    &format!("hog{i}"),
                    "src/hog.rs",
                    (start, start + 2),
                    qv.clone(),
                    "fn hog() {}",
                ))
                .await
                .unwrap();
        }
        index
            .upsert(entry("other", "src/other.rs", (1, 3), qv.clone(), "fn other() {}"))
            .await
            .unwrap();

        let retriever = retriever(
            index,
            provider,
            RetrievalConfig {
                score_threshold: 0.5,
                max_per_file: 2,
                ..RetrievalConfig::default()
            },
        );
        let context = retriever.answer_context("cap", 10_000).await.unwrap();
        let from_hog = context
            .citations
            .iter()
            .filter(|c| c.file_path == "src/hog.rs")
            .count();
        assert_eq!(from_hog, 2);
        assert!(context.citations.iter().any(|c| c.file_path == "src/other.rs"));
    }

    #[tokio::test]
    async fn no_relevant_code_skips_generation() {
        let provider = Arc::new(MockProvider::default());
        let index = Arc::new(InMemoryIndex::new());
        let opposite: Vec<f32> = query_vector(&provider, "completely different topic")
            .await
            .iter()
            .map(|x| -x)
            .collect();
        index
            .upsert(entry("e0", "src/a.rs", (1, 4), opposite, "fn a() {}"))
            .await
            .unwrap();

        let retriever = retriever(Arc::clone(&index), Arc::clone(&provider), RetrievalConfig::default());
        let answer = retriever
            .answer("completely different topic", 1000)
            .await
            .unwrap();
        assert!(matches!(answer, Answer::NoRelevantCode));
        assert_eq!(provider.generate_calls(), 0);
    }

    #[tokio::test]
    async fn answer_cites_exactly_the_prompted_chunks() {
        let provider = Arc::new(MockProvider::with_responses(vec!["it parses".into()]));
        let index = Arc::new(InMemoryIndex::new());
        let qv = query_vector(&provider, "parse tokens").await;
        index
            .upsert(entry("e0", "src/parse.rs", (1, 4), qv.clone(), "fn parse() {}"))
            .await
            .unwrap();

        let retriever = retriever(
            Arc::clone(&index),
            Arc::clone(&provider),
            RetrievalConfig {
                score_threshold: 0.5,
                ..RetrievalConfig::default()
            },
        );
        let answer = retriever.answer("parse tokens", 1000).await.unwrap();
        match answer {
            Answer::Generated { text, citations } => {
                assert_eq!(text, "it parses");
                assert_eq!(citations.len(), 1);
                assert_eq!(citations[0].id, "e0");
                assert_eq!(provider.generate_calls(), 1);
            }
            Answer::NoRelevantCode => panic!("expected a generated answer"),
        }
    }

    #[tokio::test]
    async fn slow_generation_times_out() {
        let provider = Arc::new(MockProvider::default().with_generate_delay(200));
        let index = Arc::new(InMemoryIndex::new());
        let qv = query_vector(&provider, "slow").await;
        index
            .upsert(entry("e0", "src/slow.rs", (1, 4), qv.clone(), "fn slow() {}"))
            .await
            .unwrap();

        let retriever = retriever(
            index,
            provider,
            RetrievalConfig {
                score_threshold: 0.5,
                generation_timeout: Duration::from_millis(10),
                ..RetrievalConfig::default()
            },
        );
        let result = retriever.answer("slow", 1000).await;
        assert!(matches!(result, Err(IndexError::GenerationTimeout)));
    }

    #[test]
    fn estimate_tokens_heuristic() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(40)), 10);
    }
}
