//! Process-wide tuning config (§6). Everything here is immutable after
//! boot and freely shared across requests (§5 "Shared resource discipline").
//!
//! `RagConfig::from_env` is the single place that reads `std::env` so the
//! rest of the crate never touches it directly; defaults match the
//! reference semantics in §4.3/§4.7/§4.8/§5.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Chunker parameters (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_text_chars: usize,
}

/// Retrieval/assembly limits (§6 `RAG_SEARCH_TOP_K` etc).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub top_k: usize,
    pub max_context_docs: usize,
    pub max_sources: usize,
    pub max_chars_per_source: usize,
    pub backend_timeout_ms: u64,
}

/// Re-rank weights (§4.7, §6): additive/subtractive deltas applied
/// post-merge, in the order path boost, snippet boost, compound bonus,
/// then extension-family adjustments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub keyword_boost_path: f32,
    pub keyword_boost_snippet: f32,
    pub compound_bonus: f32,
    pub excel_penalty_relevant: f32,
    pub excel_penalty_irrelevant: f32,
    pub long_form_bonus: f32,
    pub keywords: Vec<String>,
    pub excel_relevant_keywords: Vec<String>,
}

/// Indexer parameters (§4.1, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub worker_pool_size: usize,
    pub bulk_files: usize,
    pub bulk_chunks: usize,
    pub zip_max_depth: u32,
}

/// Orchestrator parameters (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    pub analysis_top_n: usize,
}

/// External embedding and language-model endpoints (§1, §2, §6). Both
/// collaborators are out-of-scope black boxes reached over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpoints {
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub llm_base_url: String,
    pub llm_strategy_model: String,
    pub llm_answer_model: String,
    pub llm_analysis_model: String,
    pub llm_api_key: Option<String>,
}

/// Filesystem/state paths (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub vector_dir: PathBuf,
    pub state_path: PathBuf,
    pub file_base: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub paths: PathsConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub rerank: RerankConfig,
    pub indexer: IndexerConfig,
    pub orchestrator: OrchestratorConfig,
    pub models: ModelEndpoints,
}

impl RagConfig {
    /// Reads every knob from the environment, falling back to the
    /// reference defaults documented in §4.3/§4.7/§4.8/§5.
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(env_string("DATA_DIR", "./data"));
        let default_vector = data_dir.join("vectors");
        let default_state = data_dir.join("conversations");
        Self {
            paths: PathsConfig {
                manifest_path: data_dir.join("manifest.sqlite"),
                vector_dir: PathBuf::from(env_string(
                    "VECTOR_STORE_PATH",
                    default_vector.to_str().unwrap_or("./data/vectors"),
                )),
                state_path: PathBuf::from(env_string(
                    "STATE_PATH",
                    default_state.to_str().unwrap_or("./data/conversations"),
                )),
                file_base: std::env::var("FILE_BASE").ok().map(PathBuf::from),
                data_dir,
            },
            chunking: ChunkingConfig {
                chunk_size: env_usize("CHUNK_SIZE", 1200),
                chunk_overlap: env_usize("CHUNK_OVERLAP", 180),
                min_text_chars: env_usize("MIN_TEXT_CHARS", 20),
            },
            search: SearchConfig {
                top_k: env_usize("RAG_SEARCH_TOP_K", 10),
                max_context_docs: env_usize("RAG_MAX_CONTEXT_DOCS", 6),
                max_sources: env_usize("RAG_MAX_SOURCES", 6),
                max_chars_per_source: env_usize("RAG_MAX_CHARS_PER_SOURCE", 1600),
                backend_timeout_ms: env_usize("RAG_BACKEND_TIMEOUT_MS", 8000) as u64,
            },
            rerank: RerankConfig {
                keyword_boost_path: env_f32("RAG_KEYWORD_BOOST_PATH", 2.0),
                keyword_boost_snippet: env_f32("RAG_KEYWORD_BOOST_SNIPPET", 1.0),
                compound_bonus: env_f32("RAG_KEYWORD_COMPOUND_BONUS", 1.5),
                excel_penalty_relevant: env_f32("RAG_EXCEL_PENALTY_RELEVANT", -0.5),
                excel_penalty_irrelevant: env_f32("RAG_EXCEL_PENALTY_IRRELEVANT", -2.5),
                long_form_bonus: env_f32("RAG_PDF_MSG_BONUS", 1.0),
                keywords: env_list("RAG_KEYWORDS", &[]),
                excel_relevant_keywords: env_list("RAG_EXCEL_RELEVANT_KEYWORDS", &[]),
            },
            indexer: IndexerConfig {
                worker_pool_size: env_usize("RAG_INDEXER_WORKERS", 6),
                bulk_files: env_usize("RAG_INDEXER_BULK_FILES", 100),
                bulk_chunks: env_usize("RAG_INDEXER_BULK_CHUNKS", 256),
                zip_max_depth: env_usize("RAG_ZIP_MAX_DEPTH", 2) as u32,
            },
            orchestrator: OrchestratorConfig {
                max_iterations: env_usize("RAG_MAX_ITERATIONS", 2) as u32,
                analysis_top_n: env_usize("RAG_ANALYSIS_TOP_N", 5),
            },
            models: ModelEndpoints {
                embedding_base_url: env_string("EMBEDDING_BASE_URL", "http://localhost:8081"),
                embedding_model: env_string("EMBEDDING_MODEL", "text-embedding"),
                llm_base_url: env_string("LLM_BASE_URL", "http://localhost:8080/v1"),
                llm_strategy_model: env_string("LLM_STRATEGY_MODEL", "default"),
                llm_answer_model: env_string("LLM_ANSWER_MODEL", "default"),
                llm_analysis_model: env_string("LLM_ANALYSIS_MODEL", "default"),
                llm_api_key: std::env::var("LLM_API_KEY").ok(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.chunking.chunk_size < 50 {
            return Err("CHUNK_SIZE must be >= 50".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err("CHUNK_OVERLAP must be < CHUNK_SIZE".into());
        }
        if self.search.top_k == 0 {
            return Err("RAG_SEARCH_TOP_K must be > 0".into());
        }
        if self.indexer.worker_pool_size == 0 {
            return Err("RAG_INDEXER_WORKERS must be > 0".into());
        }
        Ok(())
    }

    /// "Strip the `rag-` prefix from the request's `model` field if
    /// present, else use the configured answer model" — §9's resolution
    /// of the ambiguous default-model open question.
    pub fn resolve_answer_model(&self, requested: Option<&str>) -> String {
        match requested {
            Some(m) if !m.is_empty() => m.strip_prefix("rag-").unwrap_or(m).to_string(),
            _ => self.models.llm_answer_model.clone(),
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_answer_model_strips_rag_prefix() {
        let cfg = RagConfig::from_env();
        assert_eq!(cfg.resolve_answer_model(Some("rag-gpt-4o")), "gpt-4o");
        assert_eq!(cfg.resolve_answer_model(Some("gpt-4o")), "gpt-4o");
        assert_eq!(cfg.resolve_answer_model(None), cfg.models.llm_answer_model);
    }

    #[test]
    fn validate_rejects_degenerate_chunking() {
        let mut cfg = RagConfig::from_env();
        cfg.chunking.chunk_overlap = cfg.chunking.chunk_size;
        assert!(cfg.validate().is_err());
    }
}
