//! The incremental indexer (§4.1, §5 "Indexing path"): walks a tenant's
//! document root, skips files the manifest already has current, and
//! keeps the lexical and vector backends in sync via a bounded worker
//! pool feeding a single draining sink.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};

use crate::chunker::{self, ChunkerConfig};
use crate::config::{ChunkingConfig, IndexerConfig};
use crate::embeddings::EmbeddingModel;
use crate::extractors;
use crate::hashing;
use crate::manifest::{Manifest, ManifestRow};
use crate::storage::{LexicalBackend, VectorBackend};
use crate::tenant::Tenant;
use crate::types::{ChunkRecord, File as IndexedFile, LexicalDocument};

#[derive(Debug, Default, Clone, Copy)]
pub struct IndexRunStats {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub chunks_upserted: usize,
}

enum FileOutcome {
    Skipped,
    Failed { path: PathBuf, reason: String },
    Indexed { file: IndexedFile, doc: LexicalDocument, chunks: Vec<ChunkRecord> },
}

pub struct Indexer {
    manifest: Arc<Manifest>,
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    embeddings: Arc<dyn EmbeddingModel>,
    config: IndexerConfig,
    chunking: ChunkingConfig,
}

impl Indexer {
    pub fn new(
        manifest: Arc<Manifest>,
        lexical: Arc<dyn LexicalBackend>,
        vector: Arc<dyn VectorBackend>,
        embeddings: Arc<dyn EmbeddingModel>,
        config: IndexerConfig,
        chunking: ChunkingConfig,
    ) -> Self {
        Self { manifest, lexical, vector, embeddings, config, chunking }
    }

    /// Walks `tenant.document_root` and indexes every file the manifest
    /// doesn't already have current, using a pool of `worker_pool_size`
    /// concurrent file pipelines draining into one bulk-upsert sink
    /// (§5 "Indexing path"). `cancel`, if set, is checked between files —
    /// cancellation is cooperative at file boundaries, never mid-file.
    pub async fn index_tenant(&self, tenant: &Tenant, cancel: Option<&AtomicBool>) -> Result<IndexRunStats> {
        let root = tenant.document_root.clone();
        let paths = walk_supported_files(&root);
        let mut stats = IndexRunStats { files_seen: paths.len(), ..Default::default() };

        let mut outcomes = stream::iter(paths.into_iter().map(|path| {
            let tenant = tenant.clone();
            async move { self.process_file(&path, &tenant).await }
        }))
        .buffer_unordered(self.config.worker_pool_size.max(1));

        let mut pending_files: Vec<(IndexedFile, LexicalDocument)> = Vec::new();
        let mut pending_chunks: Vec<ChunkRecord> = Vec::new();

        while let Some(outcome) = outcomes.next().await {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    break;
                }
            }
            match outcome {
                FileOutcome::Skipped => stats.files_skipped += 1,
                FileOutcome::Failed { path, reason } => {
                    tracing::warn!(path = %path.display(), reason, "indexer: extraction failed for file");
                    stats.files_failed += 1;
                }
                FileOutcome::Indexed { file, doc, chunks } => {
                    stats.chunks_upserted += chunks.len();
                    stats.files_indexed += 1;
                    pending_chunks.extend(chunks);
                    pending_files.push((file, doc));
                }
            }

            if pending_files.len() >= self.config.bulk_files || pending_chunks.len() >= self.config.bulk_chunks {
                self.flush(&mut pending_files, &mut pending_chunks).await?;
            }
        }

        self.flush(&mut pending_files, &mut pending_chunks).await?;
        Ok(stats)
    }

    /// `stat → manifest check → extract → chunk → embed` for one file
    /// (§5). Never panics; extraction and embedding failures become
    /// `FileOutcome::Failed` rather than propagating, consistent with
    /// `CoreError::ExtractionFailure`'s "never propagates" rule.
    async fn process_file(&self, path: &Path, tenant: &Tenant) -> FileOutcome {
        let virtual_path = match path.strip_prefix(&tenant.document_root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().to_string(),
        };

        let stat = match hashing::file_stat(path) {
            Ok(s) => s,
            Err(e) => return FileOutcome::Failed { path: path.to_path_buf(), reason: e.to_string() },
        };
        let (mtime, size) = stat;

        match self.manifest.is_current(&virtual_path, mtime, size) {
            Ok(true) => return FileOutcome::Skipped,
            Ok(false) => {}
            Err(e) => return FileOutcome::Failed { path: path.to_path_buf(), reason: e.to_string() },
        }

        let path_owned = path.to_path_buf();
        let extraction = tokio::task::spawn_blocking(move || {
            let content_hash = hashing::sha1_file(&path_owned)?;
            let text = extractors::extract_file(&path_owned);
            Ok::<(String, String), anyhow::Error>((content_hash, text))
        })
        .await;

        let (content_hash, text) = match extraction {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return FileOutcome::Failed { path: path.to_path_buf(), reason: e.to_string() },
            Err(e) => return FileOutcome::Failed { path: path.to_path_buf(), reason: e.to_string() },
        };

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_lowercase();
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();

        let file = IndexedFile {
            absolute_path: path.to_string_lossy().to_string(),
            tenant: tenant.short_name.clone(),
            content_hash: content_hash.clone(),
            mtime,
            size,
            extension: extension.clone(),
            virtual_path: virtual_path.clone(),
        };

        if text.trim().chars().count() < self.chunking.min_text_chars {
            // Extraction produced nothing usable; record the manifest row
            // so this exact content isn't retried every pass, but upsert
            // no lexical/vector record for it (§4.2, §7 `ExtractionFailure`).
            if let Err(e) = self.manifest.upsert(&ManifestRow { path: virtual_path.clone(), content_hash, mtime, size }) {
                return FileOutcome::Failed { path: path.to_path_buf(), reason: e.to_string() };
            }
            return FileOutcome::Failed { path: path.to_path_buf(), reason: "extraction produced no usable text".to_string() };
        }

        let id_prefix: String = hashing::sha1_bytes(virtual_path.as_bytes()).chars().take(16).collect();
        let mut chunks = chunker::chunk_text(&text, &id_prefix, ChunkerConfig { size: self.chunking.chunk_size, overlap: self.chunking.chunk_overlap });
        for c in &mut chunks {
            c.file_content_hash = content_hash.clone();
        }

        let chunk_texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = match self.embeddings.embed_batch(&chunk_texts).await {
            Ok(v) => v,
            Err(e) => return FileOutcome::Failed { path: path.to_path_buf(), reason: format!("embedding backend unavailable: {e}") },
        };

        let metadata_json = serde_json::json!({
            "extension": extension,
            "virtual_path": virtual_path,
        })
        .to_string();

        let chunk_records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings.into_iter())
            .map(|(chunk, vector)| ChunkRecord {
                id: chunk.chunk_id,
                doc_id: content_hash.clone(),
                chunk_index: chunk.chunk_index,
                text: chunk.text,
                title: filename.clone(),
                source: virtual_path.clone(),
                heading: String::new(),
                vector,
                space_id: tenant.vector_collection_prefix.clone(),
                metadata_json: metadata_json.clone(),
                citation_json: String::new(),
                created_at: mtime,
            })
            .collect();

        let doc = LexicalDocument {
            content: text,
            filename,
            extension,
            size,
            path_real: file.absolute_path.clone(),
            path_virtual: virtual_path,
            sha256: content_hash,
            mtime,
            attachment_names: Vec::new(),
        };

        FileOutcome::Indexed { file, doc, chunks: chunk_records }
    }

    /// Bulk-upserts whatever is pending to both backends, then commits
    /// the manifest row for each affected file only once both backends
    /// have acknowledged (§4.1, §5 "the manifest is updated only after
    /// both backends acknowledge their batch for the file").
    async fn flush(&self, pending_files: &mut Vec<(IndexedFile, LexicalDocument)>, pending_chunks: &mut Vec<ChunkRecord>) -> Result<()> {
        if pending_files.is_empty() && pending_chunks.is_empty() {
            return Ok(());
        }

        for (file, doc) in pending_files.iter() {
            self.lexical.upsert_document(file, doc).context("lexical backend upsert failed")?;
        }
        self.lexical.commit().context("lexical backend commit failed")?;

        if !pending_chunks.is_empty() {
            self.vector.upsert_chunks(std::mem::take(pending_chunks)).await.context("vector backend upsert failed")?;
        }

        for (file, _) in pending_files.drain(..) {
            self.manifest
                .upsert(&ManifestRow { path: file.virtual_path.clone(), content_hash: file.content_hash.clone(), mtime: file.mtime, size: file.size })
                .context("manifest upsert failed")?;
        }

        Ok(())
    }

    /// Removes lexical and vector records for manifest paths no longer
    /// present on disk (§4.1 "orphan sweeping is a separately triggered
    /// operation"). Not run as part of a normal indexing pass.
    pub async fn sweep_orphans(&self, tenant: &Tenant) -> Result<usize> {
        let mut removed = 0usize;
        for virtual_path in self.manifest.all_paths()? {
            let absolute = tenant.document_root.join(&virtual_path);
            if absolute.exists() {
                continue;
            }
            if let Some(row) = self.manifest.get(&virtual_path)? {
                self.lexical.delete_by_content_hash(&row.content_hash)?;
                self.vector.delete_by_content_hash(&row.content_hash).await?;
                self.manifest.remove(&virtual_path)?;
                removed += 1;
            }
        }
        self.lexical.commit()?;
        Ok(removed)
    }
}

/// Lists every file under `root` whose extension the extractor dispatch
/// table supports, sorted for deterministic processing order (actual
/// completion order across the worker pool is still unordered, per §5).
fn walk_supported_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(extractors::is_supported_extension)
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}
