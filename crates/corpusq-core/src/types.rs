//! Core data model (§3): the shapes shared by the indexer, retriever and
//! orchestrator. Kept free of any particular backend's SDK types so that
//! `search` and `storage` can each map to/from their own record shapes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of the content-address manifest, joined with the parts of a
/// file's identity that outlive any single indexing pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct File {
    pub absolute_path: String,
    pub tenant: String,
    pub content_hash: String,
    pub mtime: i64,
    pub size: i64,
    pub extension: String,
    /// Path relative to the tenant's document root.
    pub virtual_path: String,
}

/// A bounded, overlapping substring of a file's normalized text, the unit
/// of vector retrieval. `chunk_id` is derived per §4.3/§6's chunk-id
/// format so it is stable across re-indexing of unchanged content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub file_content_hash: String,
    pub page_or_section: Option<String>,
    pub chunk_index: u32,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

/// Which backend a `Hit` came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HitSource {
    Lexical,
    Vector,
}

/// How a hit was obtained, carried through merge/re-rank for the
/// phrase-absence soundness property (§8.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExactLevel {
    Phrase,
    AndFallback,
    Bm25,
    Vector,
}

/// A single retrieval result, normalized across both backends. Scores
/// from the two backends are not directly comparable; ordering is a
/// function of the merge/re-rank policy in `retrieval`, not of `score`
/// alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub source: HitSource,
    pub chunk_or_doc_id: String,
    pub score: f32,
    pub path: String,
    pub snippet: String,
    pub metadata: HashMap<String, String>,
    pub exact_level: ExactLevel,
}

/// Gate decision (§4.6): the pre-retrieval policy choice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GateMode {
    ExactPhrase,
    Hybrid,
    NoRag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    pub require_rag: bool,
    pub mode: GateMode,
    pub phrase: Option<String>,
    pub reason: String,
}

/// The strategy phase's structured output (§3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub intent: Intent,
    pub languages: Vec<String>,
    pub keywords: Vec<String>,
    pub synonyms: HashMap<String, Vec<String>>,
    pub filters: StrategyFilters,
    pub expanded_queries: Vec<String>,
    pub iteration: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FactLookup,
    Summary,
    Comparison,
    Analysis,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyFilters {
    pub doctype: Option<String>,
    pub date_range: Option<(i64, i64)>,
    pub customer: Option<String>,
}

impl Strategy {
    /// The fixed fallback used when the language model's structured
    /// output fails to parse (§4.9, §7 `ParseFailure`).
    pub fn identity_fallback(original_query: &str) -> Self {
        Self {
            intent: Intent::FactLookup,
            languages: Vec::new(),
            keywords: vec![original_query.to_string()],
            synonyms: HashMap::new(),
            filters: StrategyFilters::default(),
            expanded_queries: vec![original_query.to_string()],
            iteration: 0,
        }
    }
}

/// The validation phase's verdict (§3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub needs_iteration: bool,
    pub reason: String,
    pub coverage: f32,
    pub revised_strategy: Option<Strategy>,
}

/// A structured finding produced by the (optional) analysis phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub severity: String,
    pub description: String,
    pub status: String,
}

/// A document appearing at least once in the assembled evidence context,
/// numbered in first-appearance order (§3, §4.8, testable property 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub n: u32,
    pub path: String,
    pub display_path: String,
    pub local_url: Option<String>,
    pub finding_count: u32,
}

/// Per-conversation persisted state (§3, §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub summary: String,
    pub notes: String,
    pub updated_at: i64,
}

impl ConversationState {
    pub fn empty(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            summary: String::new(),
            notes: String::new(),
            updated_at: 0,
        }
    }
}

/// File extension family, used by extractor dispatch and by re-rank
/// bonuses/penalties (§4.7) that differ by document type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentFormat {
    Txt,
    Markdown,
    Html,
    Json,
    Pdf,
    Csv,
    Docx,
    Spreadsheet,
    Presentation,
    Mail,
    Archive,
    Code,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "txt" | "text" => Self::Txt,
            "md" | "markdown" => Self::Markdown,
            "html" | "htm" => Self::Html,
            "json" => Self::Json,
            "pdf" => Self::Pdf,
            "csv" => Self::Csv,
            "docx" | "doc" => Self::Docx,
            "xlsx" | "xls" | "ods" | "xlsm" | "xlsb" => Self::Spreadsheet,
            "pptx" | "ppt" | "odp" => Self::Presentation,
            "msg" | "eml" => Self::Mail,
            "zip" => Self::Archive,
            "rs" | "py" | "js" | "ts" | "jsx" | "tsx" | "go" | "java" | "c" | "cpp" | "h"
            | "hpp" | "cs" | "rb" | "php" | "swift" | "kt" | "scala" | "r" | "sql" | "sh"
            | "bash" | "zsh" | "fish" | "ps1" | "bat" | "cmd" | "yaml" | "yml" | "toml" | "xml"
            | "ini" | "cfg" | "conf" | "env" => Self::Code,
            _ => Self::Txt,
        }
    }

    /// Whether this format counts as "long-form" for the re-rank bonus
    /// in §4.7 (a positive adjustment alongside the spreadsheet penalty).
    pub fn is_long_form(&self) -> bool {
        matches!(self, Self::Pdf | Self::Docx | Self::Mail)
    }
}

/// A structured section extracted from a document with internal
/// structure (PDF forms, spreadsheet tables) — used to produce
/// relationship-preserving chunks instead of naive fixed-stride ones.
#[derive(Debug, Clone)]
pub enum DocumentSection {
    Text {
        content: String,
        page: usize,
        heading: Option<String>,
    },
    FormFields {
        fields: Vec<(String, String)>,
        page: usize,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        page: usize,
        caption: Option<String>,
    },
    Relationships {
        content: String,
    },
}

/// Query constraints passed down to the vector backend (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataFilter {
    pub space_id: Option<String>,
    pub source_type: Option<String>,
    pub source_path: Option<String>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    pub custom: Option<HashMap<String, String>>,
}

impl MetadataFilter {
    pub fn to_lance_predicate(&self) -> Option<String> {
        let mut predicates = Vec::new();

        if let Some(ref space_id) = self.space_id {
            predicates.push(format!("space_id = '{}'", space_id.replace('\'', "''")));
        }
        if let Some(ref source_path) = self.source_path {
            predicates.push(format!("source = '{}'", source_path.replace('\'', "''")));
        }
        if let Some(from) = self.date_from {
            predicates.push(format!("created_at >= {}", from));
        }
        if let Some(to) = self.date_to {
            predicates.push(format!("created_at <= {}", to));
        }

        if predicates.is_empty() {
            None
        } else {
            Some(predicates.join(" AND "))
        }
    }
}

/// One lexical document per `File` (§3, §4.4): the full text of a file
/// indexed as a single unit, never chunked in the lexical store. This is
/// the unit of phrase search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalDocument {
    pub content: String,
    pub filename: String,
    pub extension: String,
    pub size: i64,
    pub path_real: String,
    pub path_virtual: String,
    pub sha256: String,
    pub mtime: i64,
    /// Attachment filenames, populated for mail containers (§3).
    pub attachment_names: Vec<String>,
}

/// Internal chunk record shape used by the vector store's Arrow schema.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub title: String,
    pub source: String,
    pub heading: String,
    pub vector: Vec<f32>,
    pub space_id: String,
    pub metadata_json: String,
    pub citation_json: String,
    pub created_at: i64,
}
