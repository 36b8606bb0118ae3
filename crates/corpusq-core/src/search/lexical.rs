//! The lexical indexer (§4.4): one Tantivy document per `File`, storing
//! full content and structured metadata. Not chunked — chunking is a
//! vector-store concept only (§3 "the lexical document is the unit of
//! phrase search; it is not chunked in the lexical store").
//!
//! Required queries, in the shapes §4.4 names them:
//! - exact phrase (`match_phrase`, `slop=0`)
//! - AND fallback (`match`, `operator=AND`)
//! - BM25 with a terms filter on `file.extension`
//! - phrase-existence test (zero hits iff the phrase is absent)

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, PhraseQuery, Query, TermQuery, TermSetQuery};
use tantivy::schema::{self, Schema, IndexRecordOption, Value as TantivyValue, FAST, INDEXED, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::storage::LexicalBackend;
use crate::types::{ExactLevel, File as IndexedFile, Hit, HitSource, LexicalDocument};

pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: parking_lot::Mutex<IndexWriter>,
    f_id: schema::Field,
    f_content: schema::Field,
    f_filename: schema::Field,
    f_extension: schema::Field,
    f_size: schema::Field,
    f_path_real: schema::Field,
    f_path_virtual: schema::Field,
    f_sha256: schema::Field,
    f_mtime: schema::Field,
    f_attachments: schema::Field,
}

struct FieldSet {
    schema: Schema,
    id: schema::Field,
    content: schema::Field,
    filename: schema::Field,
    extension: schema::Field,
    size: schema::Field,
    path_real: schema::Field,
    path_virtual: schema::Field,
    sha256: schema::Field,
    mtime: schema::Field,
    attachments: schema::Field,
}

fn build_schema() -> FieldSet {
    let mut sb = Schema::builder();
    let id = sb.add_text_field("id", STRING | STORED);
    let content = sb.add_text_field("content", TEXT | STORED);
    let filename = sb.add_text_field("filename", TEXT | STORED);
    let extension = sb.add_text_field("extension", STRING | STORED | FAST);
    let size = sb.add_i64_field("size", INDEXED | STORED);
    let path_real = sb.add_text_field("path_real", STRING | STORED);
    let path_virtual = sb.add_text_field("path_virtual", STRING | STORED);
    let sha256 = sb.add_text_field("sha256", STRING | STORED);
    let mtime = sb.add_i64_field("mtime", INDEXED | STORED);
    let attachments = sb.add_text_field("attachments", TEXT | STORED);
    FieldSet {
        schema: sb.build(),
        id,
        content,
        filename,
        extension,
        size,
        path_real,
        path_virtual,
        sha256,
        mtime,
        attachments,
    }
}

impl LexicalIndex {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let index_path = data_dir.join("lexical_index");
        std::fs::create_dir_all(&index_path).ok();
        let fields = build_schema();

        let index = {
            let dir = tantivy::directory::MmapDirectory::open(&index_path)?;
            if Index::exists(&dir)? {
                Index::open_in_dir(&index_path)?
            } else {
                Index::create_in_dir(&index_path, fields.schema.clone())?
            }
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("failed to build lexical index reader")?;
        let writer = index.writer(50_000_000).context("failed to build lexical index writer")?;

        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            f_id: fields.id,
            f_content: fields.content,
            f_filename: fields.filename,
            f_extension: fields.extension,
            f_size: fields.size,
            f_path_real: fields.path_real,
            f_path_virtual: fields.path_virtual,
            f_sha256: fields.sha256,
            f_mtime: fields.mtime,
            f_attachments: fields.attachments,
        })
    }

    #[cfg(test)]
    pub fn open_in_ram() -> Result<Self> {
        let fields = build_schema();
        let index = Index::create_in_ram(fields.schema.clone());
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("failed to build lexical index reader")?;
        let writer = index.writer(15_000_000).context("failed to build lexical index writer")?;
        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            f_id: fields.id,
            f_content: fields.content,
            f_filename: fields.filename,
            f_extension: fields.extension,
            f_size: fields.size,
            f_path_real: fields.path_real,
            f_path_virtual: fields.path_virtual,
            f_sha256: fields.sha256,
            f_mtime: fields.mtime,
            f_attachments: fields.attachments,
        })
    }

    fn doc_to_hit(&self, doc: &TantivyDocument, score: f32, exact_level: ExactLevel) -> Hit {
        let get = |f: schema::Field| -> String {
            doc.get_first(f).and_then(|v| v.as_str()).unwrap_or_default().to_string()
        };
        let content = get(self.f_content);
        let path_virtual = get(self.f_path_virtual);
        let mut metadata = HashMap::new();
        metadata.insert("filename".to_string(), get(self.f_filename));
        metadata.insert("extension".to_string(), get(self.f_extension));
        metadata.insert("path.real".to_string(), get(self.f_path_real));
        metadata.insert("meta.sha256".to_string(), get(self.f_sha256));
        metadata.insert("attachments".to_string(), get(self.f_attachments));

        Hit {
            source: HitSource::Lexical,
            chunk_or_doc_id: get(self.f_id),
            score,
            path: path_virtual,
            snippet: snippet_around(&content, 240),
            metadata,
            exact_level,
        }
    }

    fn run_query(&self, query: &dyn Query, size: usize, exact_level: ExactLevel) -> Result<Vec<Hit>> {
        let searcher = self.reader.searcher();
        let top_docs = searcher.search(query, &TopDocs::with_limit(size))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr)?;
            hits.push(self.doc_to_hit(&doc, score, exact_level));
        }
        Ok(hits)
    }
}

/// A single highlight fragment centered on the first match-worthy window;
/// absent a real query-aware highlighter here, this is a best-effort
/// fixed-length lead used uniformly for both phrase and AND-fallback
/// results (§4.4 "returning up to `size` hits with a single highlight
/// fragment").
fn snippet_around(content: &str, max_chars: usize) -> String {
    let mut out: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        out.push('…');
    }
    out
}

impl LexicalBackend for LexicalIndex {
    fn upsert_document(&self, file: &IndexedFile, lex_doc: &LexicalDocument) -> Result<()> {
        let writer = self.writer.lock();
        // One document per file: replace wholesale on re-index (§3 "updates
        // are unconditional replace").
        writer.delete_term(Term::from_field_text(self.f_id, &file.virtual_path));
        writer.add_document(doc!(
            self.f_id => file.virtual_path.clone(),
            self.f_content => lex_doc.content.clone(),
            self.f_filename => lex_doc.filename.clone(),
            self.f_extension => lex_doc.extension.clone(),
            self.f_size => lex_doc.size,
            self.f_path_real => lex_doc.path_real.clone(),
            self.f_path_virtual => lex_doc.path_virtual.clone(),
            self.f_sha256 => lex_doc.sha256.clone(),
            self.f_mtime => lex_doc.mtime,
            self.f_attachments => lex_doc.attachment_names.join(" "),
        ))?;
        Ok(())
    }

    fn delete_by_content_hash(&self, content_hash: &str) -> Result<usize> {
        self.reader.reload().ok();
        let searcher = self.reader.searcher();
        let writer = self.writer.lock();
        let term_query = TermQuery::new(
            Term::from_field_text(self.f_sha256, content_hash),
            IndexRecordOption::Basic,
        );
        let matches = searcher.search(&term_query, &TopDocs::with_limit(10_000))?;
        let mut deleted = 0usize;
        for (_, addr) in matches {
            let doc: TantivyDocument = searcher.doc(addr)?;
            if let Some(id) = doc.get_first(self.f_id).and_then(|v| v.as_str()) {
                writer.delete_term(Term::from_field_text(self.f_id, id));
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn match_phrase(&self, phrase: &str, size: usize) -> Result<Vec<Hit>> {
        let terms: Vec<Term> = phrase
            .split_whitespace()
            .map(|w| Term::from_field_text(self.f_content, &w.to_lowercase()))
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        if terms.len() == 1 {
            let tq = TermQuery::new(terms.into_iter().next().unwrap(), IndexRecordOption::Basic);
            return self.run_query(&tq, size, ExactLevel::Phrase);
        }
        let pq = PhraseQuery::new(terms);
        self.run_query(&pq, size, ExactLevel::Phrase)
    }

    fn match_and(&self, text: &str, size: usize) -> Result<Vec<Hit>> {
        let clauses: Vec<(Occur, Box<dyn Query>)> = text
            .split_whitespace()
            .map(|w| {
                let term = Term::from_field_text(self.f_content, &w.to_lowercase());
                let tq: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::WithFreqsAndPositions));
                (Occur::Must, tq)
            })
            .collect();
        if clauses.is_empty() {
            return Ok(Vec::new());
        }
        let bq = BooleanQuery::new(clauses);
        self.run_query(&bq, size, ExactLevel::AndFallback)
    }

    fn bm25_filtered(&self, text: &str, extensions: &[String], size: usize) -> Result<Vec<Hit>> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = text
            .split_whitespace()
            .map(|w| {
                let term = Term::from_field_text(self.f_content, &w.to_lowercase());
                let tq: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::WithFreqsAndPositions));
                (Occur::Must, tq)
            })
            .collect();
        if clauses.is_empty() {
            return Ok(Vec::new());
        }
        if !extensions.is_empty() {
            let terms: Vec<Term> = extensions
                .iter()
                .map(|e| Term::from_field_text(self.f_extension, &e.to_lowercase()))
                .collect();
            let filter: Box<dyn Query> = Box::new(TermSetQuery::new(terms));
            clauses.push((Occur::Must, filter));
        }
        let bq = BooleanQuery::new(clauses);
        self.run_query(&bq, size, ExactLevel::Bm25)
    }

    fn commit(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.commit().context("lexical index commit failed")?;
        self.reader.reload()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn sample_file(virtual_path: &str) -> IndexedFile {
        IndexedFile {
            absolute_path: format!("/root/{virtual_path}"),
            tenant: "t1".to_string(),
            content_hash: "hash1".to_string(),
            mtime: 0,
            size: 0,
            extension: "txt".to_string(),
            virtual_path: virtual_path.to_string(),
        }
    }

    fn sample_doc(content: &str, extension: &str, sha256: &str) -> LexicalDocument {
        LexicalDocument {
            content: content.to_string(),
            filename: "file.txt".to_string(),
            extension: extension.to_string(),
            size: content.len() as i64,
            path_real: "/root/file.txt".to_string(),
            path_virtual: "file.txt".to_string(),
            sha256: sha256.to_string(),
            mtime: 0,
            attachment_names: Vec::new(),
        }
    }

    #[test]
    fn phrase_query_finds_exact_sentence() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        let file = sample_file("a.txt");
        idx.upsert_document(&file, &sample_doc("Heat Exchanger Leak in Modul X", "txt", "h1")).unwrap();
        idx.commit().unwrap();

        let hits = idx.match_phrase("Heat Exchanger Leak in Modul X", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(idx.phrase_absent("Completely Unrelated Sentence").unwrap());
    }

    #[test]
    fn phrase_absence_is_sound() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        let file = sample_file("a.txt");
        idx.upsert_document(&file, &sample_doc("some normal text here", "txt", "h1")).unwrap();
        idx.commit().unwrap();
        assert!(idx.phrase_absent("nonexistent phrase text").unwrap());
    }

    #[test]
    fn bm25_filtered_respects_extension_terms() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        idx.upsert_document(&sample_file("a.pdf"), &sample_doc("befund report", "pdf", "h1")).unwrap();
        idx.upsert_document(&sample_file("b.xlsx"), &sample_doc("befund sheet", "xlsx", "h2")).unwrap();
        idx.commit().unwrap();

        let pdf_only = idx.bm25_filtered("befund", &["pdf".to_string()], 10).unwrap();
        assert_eq!(pdf_only.len(), 1);
        assert_eq!(pdf_only[0].metadata.get("extension").map(|s| s.as_str()), Some("pdf"));
    }

    #[test]
    fn upsert_replaces_document_wholesale() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        let file = sample_file("a.txt");
        idx.upsert_document(&file, &sample_doc("version one text", "txt", "h1")).unwrap();
        idx.commit().unwrap();
        idx.upsert_document(&file, &sample_doc("version two text", "txt", "h2")).unwrap();
        idx.commit().unwrap();

        assert!(idx.phrase_absent("version one").unwrap());
        let hits = idx.match_phrase("version two", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn delete_by_content_hash_removes_matching_docs() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        idx.upsert_document(&sample_file("a.txt"), &sample_doc("alpha content", "txt", "shared")).unwrap();
        idx.upsert_document(&sample_file("b.txt"), &sample_doc("beta content", "txt", "shared")).unwrap();
        idx.commit().unwrap();
        let deleted = idx.delete_by_content_hash("shared").unwrap();
        assert_eq!(deleted, 2);
        idx.commit().unwrap();
        assert!(idx.phrase_absent("alpha content").unwrap());
    }

    #[test]
    fn and_fallback_requires_all_terms() {
        let idx = LexicalIndex::open_in_ram().unwrap();
        idx.upsert_document(&sample_file("a.txt"), &sample_doc("invoice project x details", "txt", "h1")).unwrap();
        idx.commit().unwrap();
        let hits = idx.match_and("invoice project x", 10).unwrap();
        assert_eq!(hits.len(), 1);
        let none = idx.match_and("invoice project zzz", 10).unwrap();
        assert!(none.is_empty());
        let _ = Map::<String, String>::new();
    }
}
