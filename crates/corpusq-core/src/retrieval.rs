//! The hybrid retrieval engine (§4.7): executes the mode the query gate
//! selected, merges and deduplicates hits across backends, and applies
//! deterministic keyword-boost re-ranking. §8 testable property 4:
//! `search_hybrid` is a pure function of its backend responses — same
//! inputs, same ranked output, every time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RerankConfig;
use crate::embeddings::EmbeddingModel;
use crate::storage::{LexicalBackend, VectorBackend};
use crate::tenant::Tenant;
use crate::types::{DocumentFormat, ExactLevel, Gate, GateMode, Hit, HitSource, MetadataFilter};

/// The outcome of one retrieval call. `exact_ran`/`exact_zero` together
/// are the only warrant for the orchestrator to claim absence (§8
/// testable property 3, §4.7 "the retriever records whether the exact
/// round ran and whether it produced a zero-result").
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub mode: GateMode,
    pub hits: Vec<Hit>,
    pub exact_ran: bool,
    pub exact_zero: bool,
}

impl RetrievalResult {
    /// True only when an exact-phrase round ran, returned zero hits, and
    /// the AND fallback it triggered also returned zero — the sound
    /// condition for claiming "not present in the corpus" (§4.7, §8.3).
    pub fn phrase_confirmed_absent(&self) -> bool {
        self.exact_ran && self.exact_zero && self.hits.is_empty()
    }
}

pub struct HybridRetriever {
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    embeddings: Arc<dyn EmbeddingModel>,
    backend_timeout: Duration,
}

impl HybridRetriever {
    pub fn new(
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        embeddings: Arc<dyn EmbeddingModel>,
        backend_timeout: Duration,
    ) -> Self {
        Self { lexical, vector, embeddings, backend_timeout }
    }

    /// Runs the mode `gate` selected against `query`, re-ranks, and
    /// returns the merged result. `gate.mode == NoRag` returns an empty
    /// result without touching either backend (§4.7 "No-RAG mode").
    pub async fn search(&self, gate: &Gate, query: &str, tenant: &Tenant, top_k: usize, rerank: &RerankConfig) -> RetrievalResult {
        match gate.mode {
            GateMode::NoRag => RetrievalResult { mode: GateMode::NoRag, hits: Vec::new(), exact_ran: false, exact_zero: false },
            GateMode::ExactPhrase => self.search_exact_phrase(gate, top_k).await,
            GateMode::Hybrid => {
                let merged = self.search_hybrid_mode(query, tenant, top_k).await;
                let reranked = rerank_hits(merged, rerank);
                RetrievalResult { mode: GateMode::Hybrid, hits: reranked, exact_ran: false, exact_zero: false }
            }
        }
    }

    async fn search_exact_phrase(&self, gate: &Gate, top_k: usize) -> RetrievalResult {
        let phrase = gate.phrase.clone().unwrap_or_default();
        if phrase.trim().is_empty() {
            return RetrievalResult { mode: GateMode::ExactPhrase, hits: Vec::new(), exact_ran: false, exact_zero: false };
        }
        let phrase_hits = self.lexical.match_phrase(&phrase, top_k).unwrap_or_default();
        if !phrase_hits.is_empty() {
            return RetrievalResult { mode: GateMode::ExactPhrase, hits: phrase_hits, exact_ran: true, exact_zero: false };
        }
        let fallback_hits = self.lexical.match_and(&phrase, top_k).unwrap_or_default();
        RetrievalResult { mode: GateMode::ExactPhrase, hits: fallback_hits, exact_ran: true, exact_zero: true }
    }

    /// Runs BM25 (with the tenant's extension filter) and the vector
    /// query concurrently, merging on `path` (§4.7 "Hybrid mode"). A
    /// per-backend timeout degrades to zero hits for that branch rather
    /// than failing the call (§5, §7 `BackendUnavailable`).
    async fn search_hybrid_mode(&self, query: &str, tenant: &Tenant, top_k: usize) -> Vec<Hit> {
        let lexical_fut = self.lexical_with_timeout(query, &tenant.ext_filter, top_k);
        let vector_fut = self.vector_with_timeout(query, tenant, top_k);
        let (lexical_hits, vector_hits) = tokio::join!(lexical_fut, vector_fut);
        merge_hits(lexical_hits, vector_hits)
    }

    async fn lexical_with_timeout(&self, query: &str, ext_filter: &[String], top_k: usize) -> Vec<Hit> {
        let lexical = self.lexical.clone();
        let query = query.to_string();
        let ext_filter = ext_filter.to_vec();
        let call = tokio::task::spawn_blocking(move || lexical.bm25_filtered(&query, &ext_filter, top_k));
        match tokio::time::timeout(self.backend_timeout, call).await {
            Ok(Ok(Ok(hits))) => hits,
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "lexical backend returned an error; treating as zero hits");
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "lexical backend task panicked; treating as zero hits");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("lexical backend timed out; treating as zero hits");
                Vec::new()
            }
        }
    }

    async fn vector_with_timeout(&self, query: &str, tenant: &Tenant, top_k: usize) -> Vec<Hit> {
        let embedding = match self.embeddings.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding backend failed; treating vector branch as zero hits");
                return Vec::new();
            }
        };
        let filter = MetadataFilter {
            space_id: Some(tenant.vector_collection_prefix.clone()),
            ..Default::default()
        };
        match tokio::time::timeout(self.backend_timeout, self.vector.query(&embedding, top_k, Some(&filter))).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "vector backend returned an error; treating as zero hits");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("vector backend timed out; treating as zero hits");
                Vec::new()
            }
        }
    }
}

/// Merge policy (§4.7, §9 "tagged-union `Hit` with a single merge
/// function that keys on `path`"): keyed on `path`, ties within a source
/// broken by higher score, lexical snippet preferred when mixing
/// sources. Stable sort: lexical hits first, then by score descending;
/// vector-only hits follow, also by score descending (vector `Hit.score`
/// is already the inverse-distance transform applied at the storage
/// boundary, so "higher is better" holds for both sources post-merge).
pub fn merge_hits(lexical_hits: Vec<Hit>, vector_hits: Vec<Hit>) -> Vec<Hit> {
    let mut by_key: HashMap<String, Hit> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    let mut insert = |hit: Hit| {
        let key = merge_key(&hit);
        match by_key.get_mut(&key) {
            Some(existing) => {
                let same_source = existing.source == hit.source;
                if same_source {
                    if hit.score > existing.score {
                        let keep_snippet = if existing.snippet.is_empty() { hit.snippet.clone() } else { existing.snippet.clone() };
                        *existing = hit;
                        existing.snippet = keep_snippet;
                    }
                } else {
                    // Mixing sources on the same key: prefer the lexical
                    // snippet when it is non-empty (§4.7).
                    let lexical_snippet = if existing.source == HitSource::Lexical {
                        existing.snippet.clone()
                    } else {
                        hit.snippet.clone()
                    };
                    if !lexical_snippet.is_empty() {
                        if existing.source == HitSource::Lexical {
                            // existing already carries it
                        } else {
                            existing.snippet = lexical_snippet;
                        }
                    }
                    if existing.source != HitSource::Lexical && hit.source == HitSource::Lexical {
                        let snippet = existing.snippet.clone();
                        *existing = hit;
                        if !existing.snippet.is_empty() {
                            // keep the newly-arrived lexical snippet
                        } else {
                            existing.snippet = snippet;
                        }
                    }
                }
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, hit);
            }
        }
    };

    for h in lexical_hits {
        insert(h);
    }
    for h in vector_hits {
        insert(h);
    }

    let mut merged: Vec<Hit> = order.into_iter().filter_map(|k| by_key.remove(&k)).collect();
    merged.sort_by(|a, b| {
        let a_boost = if a.source == HitSource::Lexical { 1 } else { 0 };
        let b_boost = if b.source == HitSource::Lexical { 1 } else { 0 };
        b_boost.cmp(&a_boost).then(b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
    });
    merged
}

fn merge_key(hit: &Hit) -> String {
    if !hit.path.is_empty() {
        hit.path.clone()
    } else {
        format!("{:?}:{}", hit.source, hit.chunk_or_doc_id)
    }
}

/// Deterministic keyword-boost re-ranking (§4.7): per-keyword deltas for
/// occurrences in `path` vs `snippet`, a compound bonus at ≥2 distinct
/// matched keywords, and extension-family adjustments. Pure function of
/// `hits` and `config` (§8 testable property 4).
pub fn rerank_hits(mut hits: Vec<Hit>, config: &RerankConfig) -> Vec<Hit> {
    let mut scored: Vec<(f32, Hit)> = hits
        .drain(..)
        .map(|hit| {
            let delta = rerank_delta(&hit, config);
            (hit.score + delta, hit)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(score, mut hit)| {
        hit.score = score;
        hit
    }).collect()
}

fn rerank_delta(hit: &Hit, config: &RerankConfig) -> f32 {
    let path_lower = hit.path.to_lowercase();
    let snippet_lower = hit.snippet.to_lowercase();

    let mut delta = 0.0f32;
    let mut matched_keywords = 0usize;
    for keyword in &config.keywords {
        let kw = keyword.to_lowercase();
        if kw.is_empty() {
            continue;
        }
        let mut matched_this_keyword = false;
        if path_lower.contains(&kw) {
            delta += config.keyword_boost_path;
            matched_this_keyword = true;
        }
        if snippet_lower.contains(&kw) {
            delta += config.keyword_boost_snippet;
            matched_this_keyword = true;
        }
        if matched_this_keyword {
            matched_keywords += 1;
        }
    }
    if matched_keywords >= 2 {
        delta += config.compound_bonus;
    }

    let extension = hit
        .metadata
        .get("extension")
        .cloned()
        .unwrap_or_else(|| extension_from_path(&hit.path));
    let format = DocumentFormat::from_extension(&extension);

    if format == DocumentFormat::Spreadsheet {
        let relevant_by_filename = config
            .excel_relevant_keywords
            .iter()
            .any(|kw| !kw.is_empty() && path_lower.contains(&kw.to_lowercase()));
        delta += if relevant_by_filename {
            config.excel_penalty_relevant
        } else {
            config.excel_penalty_irrelevant
        };
    } else if format.is_long_form() {
        delta += config.long_form_bonus;
    }

    delta
}

fn extension_from_path(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn hit(source: HitSource, path: &str, snippet: &str, score: f32) -> Hit {
        Hit {
            source,
            chunk_or_doc_id: format!("{path}:0"),
            score,
            path: path.to_string(),
            snippet: snippet.to_string(),
            metadata: Map::new(),
            exact_level: ExactLevel::Bm25,
        }
    }

    #[test]
    fn merge_prefers_lexical_first_then_score() {
        let lexical = vec![hit(HitSource::Lexical, "a.pdf", "la", 1.0)];
        let vector = vec![hit(HitSource::Vector, "b.pdf", "vb", 5.0)];
        let merged = merge_hits(lexical, vector);
        assert_eq!(merged[0].path, "a.pdf");
        assert_eq!(merged[1].path, "b.pdf");
    }

    #[test]
    fn merge_is_deterministic_for_fixed_inputs() {
        let lexical = vec![hit(HitSource::Lexical, "a.pdf", "x", 1.0), hit(HitSource::Lexical, "b.pdf", "y", 2.0)];
        let vector = vec![hit(HitSource::Vector, "c.pdf", "z", 3.0)];
        let r1 = merge_hits(lexical.clone(), vector.clone());
        let r2 = merge_hits(lexical, vector);
        let paths1: Vec<_> = r1.iter().map(|h| h.path.clone()).collect();
        let paths2: Vec<_> = r2.iter().map(|h| h.path.clone()).collect();
        assert_eq!(paths1, paths2);
    }

    #[test]
    fn rerank_prefers_pdf_over_spreadsheet_for_same_keyword() {
        let mut pdf_hit = hit(HitSource::Lexical, "reports/befund.pdf", "befund details", 1.0);
        pdf_hit.metadata.insert("extension".to_string(), "pdf".to_string());
        let mut xlsx_hit = hit(HitSource::Lexical, "data/sheet.xlsx", "befund details", 1.0);
        xlsx_hit.metadata.insert("extension".to_string(), "xlsx".to_string());

        let config = RerankConfig {
            keyword_boost_path: 2.0,
            keyword_boost_snippet: 1.0,
            compound_bonus: 1.5,
            excel_penalty_relevant: -0.5,
            excel_penalty_irrelevant: -2.5,
            long_form_bonus: 1.0,
            keywords: vec!["befund".to_string()],
            excel_relevant_keywords: vec![],
        };

        let ranked = rerank_hits(vec![xlsx_hit, pdf_hit], &config);
        assert_eq!(ranked[0].metadata.get("extension").map(|s| s.as_str()), Some("pdf"));
    }

    #[test]
    fn compound_bonus_applies_at_two_distinct_keyword_matches() {
        let mut h = hit(HitSource::Lexical, "invoice_projectx.pdf", "invoice details for project x", 0.0);
        h.metadata.insert("extension".to_string(), "pdf".to_string());
        let config = RerankConfig {
            keyword_boost_path: 1.0,
            keyword_boost_snippet: 0.0,
            compound_bonus: 10.0,
            excel_penalty_relevant: 0.0,
            excel_penalty_irrelevant: 0.0,
            long_form_bonus: 0.0,
            keywords: vec!["invoice".to_string(), "project x".to_string()],
            excel_relevant_keywords: vec![],
        };
        let delta = rerank_delta(&h, &config);
        assert!(delta >= 10.0 + 1.0 + 1.0);
    }
}
