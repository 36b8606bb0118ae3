//! Shared application state (§5 "process-wide state is limited to the
//! tenant table and the two backends' connection pools"), threaded through
//! every handler via Axum's `State` extractor. The orchestrator itself is
//! built fresh per request from these shared pieces so a request's
//! `rag_config` override (§6) never mutates state another request reads.

use std::sync::Arc;

use corpusq_core::llm::LlmClient;
use corpusq_core::retrieval::HybridRetriever;
use corpusq_core::state::StateStore;
use corpusq_core::storage::LexicalBackend;
use corpusq_core::tenant::TenantManager;
use corpusq_core::RagConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RagConfig>,
    pub tenants: Arc<TenantManager>,
    pub retriever: Arc<HybridRetriever>,
    pub llm: Arc<dyn LlmClient>,
    pub conversations: Arc<StateStore>,
    pub lexical: Arc<dyn LexicalBackend>,
    pub bind_host: String,
}

impl AppState {
    /// Applies a request's `rag_config` override (if any) onto a clone of
    /// the process-wide config, without mutating the shared original.
    pub fn config_with_overrides(&self, top_k: Option<usize>, max_sources: Option<usize>) -> RagConfig {
        let mut cfg = (*self.config).clone();
        if let Some(k) = top_k {
            cfg.search.top_k = k;
        }
        if let Some(m) = max_sources {
            cfg.search.max_sources = m;
        }
        cfg
    }
}
