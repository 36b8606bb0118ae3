//! Backend traits (§1, §4.4, §4.5, §9 "global singletons... re-architect
//! as context objects"): the lexical and vector backends are out-of-scope
//! black boxes per spec, each reduced here to the query/upsert shapes the
//! core actually needs. `LexicalBackend` is satisfied by
//! [`crate::search::lexical::LexicalIndex`] (embedded Tantivy);
//! `VectorBackend` is satisfied by [`LanceStore`] (embedded LanceDB).
//! Both are connection-pool-shaped process-wide state (§5), threaded
//! through requests as `Arc<dyn Trait>` rather than accessed via a
//! global singleton.

pub mod lance_store;

pub use lance_store::{LanceStore, SearchHit};

use crate::types::{ChunkRecord, File as IndexedFile, Hit, LexicalDocument, MetadataFilter};
use anyhow::Result;
use async_trait::async_trait;

/// The lexical backend's required query shapes (§4.4): phrase, AND
/// fallback, BM25-with-filter, and a phrase-existence test. One document
/// per file; never chunked in this store.
pub trait LexicalBackend: Send + Sync {
    fn upsert_document(&self, file: &IndexedFile, doc: &LexicalDocument) -> Result<()>;

    fn delete_by_content_hash(&self, content_hash: &str) -> Result<usize>;

    /// `match_phrase` with `slop=0` on `content`. Up to `size` hits, one
    /// highlight fragment each.
    fn match_phrase(&self, phrase: &str, size: usize) -> Result<Vec<Hit>>;

    /// `match` with `operator=AND` on `content`.
    fn match_and(&self, text: &str, size: usize) -> Result<Vec<Hit>>;

    /// Bool query: `match` (operator=AND) must-clause plus a terms filter
    /// on `file.extension`.
    fn bm25_filtered(&self, text: &str, extensions: &[String], size: usize) -> Result<Vec<Hit>>;

    /// True iff `phrase` returns zero hits — the only condition under
    /// which the system may assert absence (§8 testable property 3).
    fn phrase_absent(&self, phrase: &str) -> Result<bool> {
        Ok(self.match_phrase(phrase, 1)?.is_empty())
    }

    fn commit(&self) -> Result<()>;
}

/// The vector backend's required shape (§4.5): upsert keyed by
/// `chunk_id`, kNN query returning `(id, document, metadata, distance)`
/// normalized here into `Hit`.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<()>;

    async fn query(&self, embedding: &[f32], k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<Hit>>;

    async fn delete_by_content_hash(&self, content_hash: &str) -> Result<usize>;
}

#[async_trait]
impl VectorBackend for LanceStore {
    async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<()> {
        LanceStore::upsert_chunks(self, chunks).await
    }

    async fn query(&self, embedding: &[f32], k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<Hit>> {
        let predicate = filter.and_then(|f| f.to_lance_predicate());
        let hits = LanceStore::vector_search(self, embedding, k, predicate.as_deref()).await?;
        Ok(hits.into_iter().map(search_hit_to_hit).collect())
    }

    async fn delete_by_content_hash(&self, content_hash: &str) -> Result<usize> {
        // `doc_id` in the Arrow schema carries the file's content hash for
        // chunks produced by the indexer (§3 "chunks from a given
        // content_hash share the same virtual_path").
        LanceStore::delete_by_doc_id(self, content_hash).await
    }
}

fn search_hit_to_hit(hit: SearchHit) -> Hit {
    use crate::types::{ExactLevel, HitSource};
    use std::collections::HashMap;

    let mut metadata = HashMap::new();
    metadata.insert("heading".to_string(), hit.heading.clone());
    metadata.insert("title".to_string(), hit.title.clone());
    if let Ok(parsed) = serde_json::from_str::<HashMap<String, String>>(&hit.metadata_json) {
        metadata.extend(parsed);
    }

    Hit {
        source: HitSource::Vector,
        chunk_or_doc_id: hit.id,
        score: hit.score,
        path: hit.source,
        snippet: hit.text,
        metadata,
        exact_level: ExactLevel::Vector,
    }
}
