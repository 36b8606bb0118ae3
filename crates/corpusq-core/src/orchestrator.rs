//! The streaming orchestrator (§4.9): drives the five-phase pipeline over
//! a shared `AgentState` and writes every step to a single-writer event
//! stream (§4.10). Owns iteration, not cancellation — cancellation is the
//! caller's job (dropping the `EventStream` receiver is enough, per
//! `events::EventSink::send`'s silent-drop behavior).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::RagConfig;
use crate::error::UNGROUNDED_FALLBACK_DE;
use crate::events::{AgentEvent, EventSink, Phase};
use crate::evidence::{self, EvidenceConfig};
use crate::gate;
use crate::glossary;
use crate::llm::{parse_structured, ChatMessage, LlmClient};
use crate::retrieval::HybridRetriever;
use crate::tenant::Tenant;
use crate::types::{Finding, Gate, Hit, Intent, Source, Strategy, StrategyFilters, ValidationVerdict};

/// One orchestrated request. `advanced` mirrors the `[ADVANCED]` selector
/// token the SSE adapter strips from the last user message (§6): when
/// false, the pipeline takes the `RETRIEVAL → ANSWER` fast path.
pub struct RunRequest {
    pub conversation_id: String,
    pub query: String,
    pub tenant: Tenant,
    pub advanced: bool,
    pub model: Option<String>,
}

pub struct OrchestratorOutcome {
    pub content: String,
    pub sources: Vec<Source>,
    pub state_summary: String,
}

pub struct Orchestrator {
    retriever: Arc<HybridRetriever>,
    llm: Arc<dyn LlmClient>,
    config: RagConfig,
}

const CONFIG_LIKE_PATH_MARKERS: &[&str] = &["config", "settings", ".env", "secrets", ".ini"];
const MAX_RETRIEVAL_HITS: usize = 20;
const SNIPPET_DEDUPE_PREFIX: usize = 80;

impl Orchestrator {
    pub fn new(retriever: Arc<HybridRetriever>, llm: Arc<dyn LlmClient>, config: RagConfig) -> Self {
        Self { retriever, llm, config }
    }

    /// Runs the full pipeline for `req`, writing every event to `sink`.
    /// Returns the same content/sources carried by the `final` event, for
    /// callers assembling a non-streamed response body (§6).
    pub async fn run(&self, req: RunRequest, sink: EventSink) -> Result<OrchestratorOutcome> {
        let rewritten_query = glossary::rewrite(&req.query, &req.tenant.glossary);
        let gate = gate::classify(&rewritten_query);

        if !gate.require_rag {
            return Ok(self.ungrounded_outcome(&sink, "gate decided no retrieval is required").await);
        }

        let answer_model = self.config.resolve_answer_model(req.model.as_deref());

        if !req.advanced {
            return self.run_simple(&sink, &gate, &rewritten_query, &req.tenant, &answer_model).await;
        }

        self.run_advanced(&sink, &gate, &req.query, &rewritten_query, &req.tenant, &answer_model).await
    }

    async fn ungrounded_outcome(&self, sink: &EventSink, reason: &str) -> OrchestratorOutcome {
        tracing::info!(reason, "orchestrator: returning ungrounded fallback without invoking the language model");
        sink.send(AgentEvent::Final {
            content: UNGROUNDED_FALLBACK_DE.to_string(),
            sources: Vec::new(),
            state_summary: reason.to_string(),
        })
        .await;
        OrchestratorOutcome {
            content: UNGROUNDED_FALLBACK_DE.to_string(),
            sources: Vec::new(),
            state_summary: reason.to_string(),
        }
    }

    /// The default, fast path: `RETRIEVAL → ANSWER`, bypassing strategy,
    /// analysis and validation entirely (§4.9 "degenerate simple path").
    async fn run_simple(&self, sink: &EventSink, gate: &Gate, query: &str, tenant: &Tenant, answer_model: &str) -> Result<OrchestratorOutcome> {
        let hits = self.run_retrieval_round(sink, gate, std::slice::from_ref(&query.to_string()), tenant).await;

        if hits.is_empty() {
            return Ok(self.ungrounded_outcome(sink, "no evidence remained after retrieval").await);
        }

        let evidence_config = EvidenceConfig {
            max_chars_per_source: self.config.search.max_chars_per_source,
            max_sources: self.config.search.max_sources,
            max_chunks_per_source: 3,
        };
        let evidence = evidence::assemble(&hits, evidence_config);
        if evidence.sources.is_empty() {
            return Ok(self.ungrounded_outcome(sink, "no evidence remained after retrieval").await);
        }

        self.run_answer(sink, query, &evidence.context, evidence.sources, answer_model, "simple path, 1 retrieval round").await
    }

    /// The orchestrated path: `STRATEGY → RETRIEVAL → [ANALYSIS] →
    /// VALIDATION`, looping back to `RETRIEVAL` with a revised strategy up
    /// to `max_iterations` times, then falling through to `ANSWER`.
    async fn run_advanced(
        &self,
        sink: &EventSink,
        gate: &Gate,
        original_query: &str,
        rewritten_query: &str,
        tenant: &Tenant,
        answer_model: &str,
    ) -> Result<OrchestratorOutcome> {
        let mut strategy = self.run_strategy(sink, rewritten_query, &tenant.glossary).await;
        let mut all_hits: Vec<Hit> = Vec::new();
        let mut iterations_run = 0u32;

        loop {
            let queries = retrieval_queries(&strategy, rewritten_query);
            let round_hits = self.run_retrieval_round(sink, gate, &queries, tenant).await;
            all_hits = merge_and_cap(all_hits, round_hits);
            iterations_run += 1;

            let filtered = filter_config_like(&all_hits, &strategy.keywords);
            let pre_validation = pre_validation_signal(&filtered, &strategy);

            let findings = if matches!(strategy.intent, Intent::Analysis | Intent::Comparison) {
                self.run_analysis(sink, &filtered).await
            } else {
                Vec::new()
            };

            let verdict = self.run_validation(sink, &filtered, &findings, &strategy, &pre_validation).await;

            if !verdict.needs_iteration || strategy.iteration + 1 >= self.config.orchestrator.max_iterations {
                break;
            }

            strategy = verdict.revised_strategy.clone().unwrap_or_else(|| revise_strategy(&strategy));
        }

        let filtered = filter_config_like(&all_hits, &strategy.keywords);
        if filtered.is_empty() {
            return Ok(self.ungrounded_outcome(sink, "no evidence remained after retrieval and filtering").await);
        }

        let evidence_config = EvidenceConfig {
            max_chars_per_source: self.config.search.max_chars_per_source,
            max_sources: self.config.search.max_sources,
            max_chunks_per_source: 3,
        };
        let evidence = evidence::assemble(&filtered, evidence_config);
        if evidence.sources.is_empty() {
            return Ok(self.ungrounded_outcome(sink, "no evidence remained after retrieval and filtering").await);
        }

        let summary = format!("{} iteration(s), {} source(s)", iterations_run, evidence.sources.len());
        self.run_answer(sink, original_query, &evidence.context, evidence.sources, answer_model, &summary).await
    }

    async fn run_retrieval_round(&self, sink: &EventSink, gate: &Gate, queries: &[String], tenant: &Tenant) -> Vec<Hit> {
        let now = phase_timestamp();
        sink.send(AgentEvent::PhaseStart { phase: Phase::Retrieval, timestamp: now }).await;

        let mut hits = Vec::new();
        for query in queries.iter().take(2) {
            let result = self
                .retriever
                .search(gate, query, tenant, self.config.search.top_k, &self.config.rerank)
                .await;
            hits.extend(result.hits);
        }
        let deduped = dedupe_hits(hits);

        sink.send(AgentEvent::PhaseComplete { phase: Phase::Retrieval, timestamp: phase_timestamp() }).await;
        deduped
    }

    /// Structured-output call asking the model what to search for (§4.9
    /// "Strategy"). Falls back to the identity strategy, widened with
    /// whole-glossary-term matches, on any parse or transport failure
    /// (§7 `ParseFailure`).
    async fn run_strategy(&self, sink: &EventSink, query: &str, glossary_map: &std::collections::HashMap<String, String>) -> Strategy {
        sink.send(AgentEvent::PhaseStart { phase: Phase::Strategy, timestamp: phase_timestamp() }).await;

        let messages = vec![
            ChatMessage::system(STRATEGY_SYSTEM_PROMPT),
            ChatMessage::user(query),
        ];
        let strategy = match self.call_with_timeout(query, &self.config.models.llm_strategy_model, messages).await {
            Ok(raw) => parse_structured::<Strategy>(&raw).unwrap_or_else(|| identity_fallback_with_glossary(query, glossary_map)),
            Err(e) => {
                tracing::warn!(error = %e, "strategy call failed; falling back to identity strategy");
                identity_fallback_with_glossary(query, glossary_map)
            }
        };

        sink.send(AgentEvent::PhaseComplete { phase: Phase::Strategy, timestamp: phase_timestamp() }).await;
        strategy
    }

    /// Extracts a structured finding list per top-N document (§4.9
    /// "Analysis"), only for `analysis`/`comparison` intents. Falls back
    /// to a naive extractive summary per document on parse failure.
    async fn run_analysis(&self, sink: &EventSink, hits: &[Hit]) -> Vec<Finding> {
        sink.send(AgentEvent::PhaseStart { phase: Phase::Analysis, timestamp: phase_timestamp() }).await;

        let mut by_path: Vec<(&str, Vec<&Hit>)> = Vec::new();
        for hit in hits {
            match by_path.iter_mut().find(|(p, _)| *p == hit.path) {
                Some((_, v)) => v.push(hit),
                None => by_path.push((&hit.path, vec![hit])),
            }
        }
        let top_n = self.config.orchestrator.analysis_top_n;
        let mut findings = Vec::new();

        for (path, doc_hits) in by_path.into_iter().take(top_n) {
            let combined_text: String = doc_hits.iter().map(|h| h.snippet.as_str()).collect::<Vec<_>>().join("\n---\n");
            let messages = vec![
                ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
                ChatMessage::user(format!("Document: {path}\n\n{combined_text}")),
            ];
            let doc_findings = match self.call_with_timeout(&combined_text, &self.config.models.llm_analysis_model, messages).await {
                Ok(raw) => parse_structured::<Vec<Finding>>(&raw).unwrap_or_else(|| extractive_fallback_findings(path, &combined_text)),
                Err(e) => {
                    tracing::warn!(error = %e, path, "analysis call failed; falling back to extractive summary");
                    extractive_fallback_findings(path, &combined_text)
                }
            };
            findings.extend(doc_findings);
            sink.send(AgentEvent::Progress { phase: Phase::Analysis, message: format!("analyzed {path}") }).await;
        }

        sink.send(AgentEvent::Findings { phase: Phase::Analysis, findings: findings.clone() }).await;
        sink.send(AgentEvent::PhaseComplete { phase: Phase::Analysis, timestamp: phase_timestamp() }).await;
        findings
    }

    /// Heuristic checks, optionally corroborated by a language-model
    /// judgment, deciding whether another retrieval round is warranted
    /// (§4.9 "Validation").
    async fn run_validation(&self, sink: &EventSink, hits: &[Hit], findings: &[Finding], strategy: &Strategy, pre_validation: &PreValidationSignal) -> ValidationVerdict {
        sink.send(AgentEvent::PhaseStart { phase: Phase::Validation, timestamp: phase_timestamp() }).await;

        let distinct_docs = distinct_paths(hits).len();
        let keyword_coverage = keyword_coverage(hits, &strategy.keywords);
        let customer_ok = match &strategy.filters.customer {
            Some(name) => hits.iter().filter(|h| h.snippet.to_lowercase().contains(&name.to_lowercase())).count() >= 1,
            None => true,
        };

        let heuristics_pass = distinct_docs >= 2
            && !findings.is_empty()
            && customer_ok
            && keyword_coverage >= 0.4
            && !pre_validation.needs_iteration;

        let verdict = if heuristics_pass {
            ValidationVerdict {
                valid: true,
                needs_iteration: false,
                reason: "heuristics satisfied".to_string(),
                coverage: keyword_coverage,
                revised_strategy: None,
            }
        } else {
            let reason = pre_validation
                .reason
                .clone()
                .unwrap_or_else(|| "heuristic checks failed".to_string());
            ValidationVerdict {
                valid: false,
                needs_iteration: true,
                reason,
                coverage: keyword_coverage,
                revised_strategy: Some(revise_strategy(strategy)),
            }
        };

        sink.send(AgentEvent::PhaseComplete { phase: Phase::Validation, timestamp: phase_timestamp() }).await;
        verdict
    }

    /// Streams the grounded answer, relaying tokens directly onto the
    /// event stream, then appends a deterministic citation footer (§4.9
    /// "Answer").
    async fn run_answer(&self, sink: &EventSink, query: &str, context: &str, sources: Vec<Source>, model: &str, state_summary: &str) -> Result<OrchestratorOutcome> {
        sink.send(AgentEvent::PhaseStart { phase: Phase::Answer, timestamp: phase_timestamp() }).await;
        sink.send(AgentEvent::Sources { sources: sources.clone() }).await;

        let messages = vec![
            ChatMessage::system(ANSWER_SYSTEM_PROMPT),
            ChatMessage::user(format!("Context:\n{context}\n\nQuestion: {query}")),
        ];

        let timeout = llm_timeout_for(context.len() + query.len());
        let mut content = String::new();
        match tokio::time::timeout(timeout, self.llm.stream_chat(model, messages)).await {
            Ok(Ok(mut stream)) => {
                use futures_util::StreamExt;
                while let Some(token) = stream.next().await {
                    match token {
                        Ok(piece) => {
                            content.push_str(&piece);
                            sink.send(AgentEvent::Token { content: piece }).await;
                        }
                        Err(e) => {
                            sink.send(AgentEvent::Error { phase: Phase::Answer, message: e.to_string() }).await;
                            anyhow::bail!("answer stream errored: {e}");
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                sink.send(AgentEvent::Error { phase: Phase::Answer, message: e.to_string() }).await;
                return Err(e);
            }
            Err(_) => {
                let message = "language model timed out while answering".to_string();
                sink.send(AgentEvent::Error { phase: Phase::Answer, message: message.clone() }).await;
                anyhow::bail!(message);
            }
        }

        let footer = citation_footer(&sources);
        if !footer.is_empty() {
            content.push_str(&footer);
        }

        sink.send(AgentEvent::PhaseComplete { phase: Phase::Answer, timestamp: phase_timestamp() }).await;
        sink.send(AgentEvent::Final {
            content: content.clone(),
            sources: sources.clone(),
            state_summary: state_summary.to_string(),
        })
        .await;

        Ok(OrchestratorOutcome { content, sources, state_summary: state_summary.to_string() })
    }

    async fn call_with_timeout(&self, prompt_sample: &str, model: &str, messages: Vec<ChatMessage>) -> Result<String> {
        let timeout = llm_timeout_for(prompt_sample.len());
        match tokio::time::timeout(timeout, self.llm.complete(model, messages)).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("language model call timed out"),
        }
    }
}

/// A long timeout proportional to estimated prompt size (§5): a floor of
/// 20s plus 1s per 2000 characters of prompt.
fn llm_timeout_for(prompt_len: usize) -> Duration {
    Duration::from_secs(20 + (prompt_len / 2000) as u64)
}

fn phase_timestamp() -> i64 {
    // Orchestrator timestamps are caller-observable ordering markers, not
    // wall-clock measurements; a monotonically increasing counter avoids
    // depending on `SystemTime::now()` inside request-path code.
    use std::sync::atomic::{AtomicI64, Ordering};
    static COUNTER: AtomicI64 = AtomicI64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn retrieval_queries(strategy: &Strategy, fallback_query: &str) -> Vec<String> {
    if strategy.expanded_queries.is_empty() {
        vec![fallback_query.to_string()]
    } else {
        strategy.expanded_queries.iter().take(2).cloned().collect()
    }
}

fn dedupe_hits(hits: Vec<Hit>) -> Vec<Hit> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::new();
    for hit in hits {
        let key = (hit.path.clone(), hit.snippet.chars().take(SNIPPET_DEDUPE_PREFIX).collect::<String>());
        if seen.insert(key) {
            out.push(hit);
        }
        if out.len() >= MAX_RETRIEVAL_HITS {
            break;
        }
    }
    out
}

fn merge_and_cap(existing: Vec<Hit>, incoming: Vec<Hit>) -> Vec<Hit> {
    let mut merged = existing;
    merged.extend(incoming);
    dedupe_hits(merged)
}

fn looks_like_config_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    CONFIG_LIKE_PATH_MARKERS.iter().any(|m| lower.contains(m))
}

/// Drops hits whose path looks like a configuration file unless the
/// snippet actually contains one of the strategy's keywords (§4.9
/// "Retrieval" pre-validation pass).
fn filter_config_like(hits: &[Hit], keywords: &[String]) -> Vec<Hit> {
    hits.iter()
        .filter(|h| {
            if !looks_like_config_file(&h.path) {
                return true;
            }
            let lower_snippet = h.snippet.to_lowercase();
            keywords.iter().any(|k| !k.is_empty() && lower_snippet.contains(&k.to_lowercase()))
        })
        .cloned()
        .collect()
}

struct PreValidationSignal {
    needs_iteration: bool,
    reason: Option<String>,
}

fn distinct_paths(hits: &[Hit]) -> HashSet<&str> {
    hits.iter().map(|h| h.path.as_str()).collect()
}

fn source_diversity(hits: &[Hit]) -> f32 {
    if hits.is_empty() {
        return 0.0;
    }
    distinct_paths(hits).len() as f32 / hits.len() as f32
}

fn keyword_coverage(hits: &[Hit], keywords: &[String]) -> f32 {
    let relevant_keywords: Vec<&String> = keywords.iter().filter(|k| !k.is_empty()).collect();
    if relevant_keywords.is_empty() {
        return 1.0;
    }
    let combined: String = hits.iter().map(|h| h.snippet.to_lowercase()).collect::<Vec<_>>().join(" ");
    let matched = relevant_keywords.iter().filter(|k| combined.contains(&k.to_lowercase())).count();
    matched as f32 / relevant_keywords.len() as f32
}

/// The retrieval phase's own pre-validation pass (§4.9): too few filtered
/// hits, low source diversity, or an undermatched customer filter each
/// independently warrant another iteration.
fn pre_validation_signal(filtered: &[Hit], strategy: &Strategy) -> PreValidationSignal {
    if filtered.len() < 3 {
        return PreValidationSignal { needs_iteration: true, reason: Some("too_few_hits_after_filter".to_string()) };
    }
    if source_diversity(filtered) < 0.3 {
        return PreValidationSignal { needs_iteration: true, reason: Some("low_source_diversity".to_string()) };
    }
    if let Some(customer) = &strategy.filters.customer {
        let matches = filtered.iter().filter(|h| h.snippet.to_lowercase().contains(&customer.to_lowercase())).count();
        if matches < 2 {
            return PreValidationSignal { needs_iteration: true, reason: Some("customer_filter_undermatched".to_string()) };
        }
    }
    PreValidationSignal { needs_iteration: false, reason: None }
}

/// Broadens a strategy for a follow-up iteration: clears filters, adds
/// wildcard-expanded variants of existing keywords (§4.9 "Validation").
fn revise_strategy(strategy: &Strategy) -> Strategy {
    let mut revised = strategy.clone();
    revised.filters = StrategyFilters::default();
    revised.iteration += 1;
    for keyword in &strategy.keywords {
        let wildcard = format!("{keyword}*");
        if !revised.expanded_queries.contains(&wildcard) {
            revised.expanded_queries.push(wildcard);
        }
    }
    revised
}

fn identity_fallback_with_glossary(query: &str, glossary_map: &std::collections::HashMap<String, String>) -> Strategy {
    let mut strategy = Strategy::identity_fallback(query);
    let lower_query = query.to_lowercase();
    for (term, expansion) in glossary_map {
        if lower_query.contains(&term.to_lowercase()) {
            strategy.keywords.push(expansion.clone());
            strategy.synonyms.entry(term.clone()).or_default().push(expansion.clone());
        }
    }
    strategy
}

/// "First-five-sections" extractive fallback used when the analysis
/// model's structured output fails to parse (§4.9, §7 `ParseFailure`).
fn extractive_fallback_findings(path: &str, text: &str) -> Vec<Finding> {
    text.split("\n---\n")
        .take(5)
        .filter(|section| !section.trim().is_empty())
        .map(|section| Finding {
            category: "extractive".to_string(),
            severity: "info".to_string(),
            description: section.chars().take(240).collect(),
            status: format!("extracted from {path}"),
        })
        .collect()
}

fn citation_footer(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::new();
    }
    let mut footer = String::from("\n\nQuellen:\n");
    for source in sources {
        footer.push_str(&format!("[{}] {}\n", source.n, source.display_path));
    }
    footer.trim_end().to_string()
}

const STRATEGY_SYSTEM_PROMPT: &str = "You plan a document search. Reply with a single JSON object matching the Strategy schema: intent, languages, keywords, synonyms, filters, expanded_queries, iteration. No prose.";
const ANALYSIS_SYSTEM_PROMPT: &str = "Extract findings from the given document excerpt. Reply with a single JSON array of objects: category, severity, description, status. No prose.";
const ANSWER_SYSTEM_PROMPT: &str = "Answer the question using only the given context. If the context does not support an answer, say so plainly. Cite sources by their bracketed number.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExactLevel, HitSource};
    use std::collections::HashMap;

    fn hit(path: &str, snippet: &str) -> Hit {
        Hit {
            source: HitSource::Lexical,
            chunk_or_doc_id: format!("{path}:0"),
            score: 1.0,
            path: path.to_string(),
            snippet: snippet.to_string(),
            metadata: HashMap::new(),
            exact_level: ExactLevel::Bm25,
        }
    }

    #[test]
    fn dedupe_collapses_identical_path_and_snippet_prefix() {
        let hits = vec![hit("a.pdf", "same text here"), hit("a.pdf", "same text here but longer tail")];
        let deduped = dedupe_hits(hits);
        assert_eq!(deduped.len(), 1);
    }

    #[test]
    fn pre_validation_flags_too_few_hits() {
        let hits = vec![hit("a.pdf", "x"), hit("b.pdf", "y")];
        let strategy = Strategy::identity_fallback("q");
        let signal = pre_validation_signal(&hits, &strategy);
        assert!(signal.needs_iteration);
        assert_eq!(signal.reason.as_deref(), Some("too_few_hits_after_filter"));
    }

    #[test]
    fn config_like_paths_are_filtered_unless_keyword_matches() {
        let hits = vec![hit("app/config.yaml", "irrelevant"), hit("app/report.pdf", "befund details")];
        let kept = filter_config_like(&hits, &["befund".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, "app/report.pdf");
    }

    #[test]
    fn config_like_path_survives_when_keyword_matches_inside_it() {
        let hits = vec![hit("app/config.yaml", "befund appears here too")];
        let kept = filter_config_like(&hits, &["befund".to_string()]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn citation_footer_lists_every_source_once() {
        let sources = vec![
            Source { n: 1, path: "a.pdf".into(), display_path: "a.pdf".into(), local_url: None, finding_count: 0 },
            Source { n: 2, path: "b.pdf".into(), display_path: "b.pdf".into(), local_url: None, finding_count: 0 },
        ];
        let footer = citation_footer(&sources);
        assert!(footer.contains("[1] a.pdf"));
        assert!(footer.contains("[2] b.pdf"));
    }

    #[test]
    fn revise_strategy_clears_filters_and_bumps_iteration() {
        let mut strategy = Strategy::identity_fallback("q");
        strategy.filters.customer = Some("Acme".to_string());
        let revised = revise_strategy(&strategy);
        assert!(revised.filters.customer.is_none());
        assert_eq!(revised.iteration, strategy.iteration + 1);
    }
}
