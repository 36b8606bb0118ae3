//! Recoverable error kinds for the request path.
//!
//! Only `FatalConfig` is meant to escape a request — everything else is a
//! value the caller folds back into a user-visible message or an `error`
//! event on the stream, per the error-handling design: extractors, gate
//! decisions, and LLM parsing never panic and never throw.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An extractor failed for one file. Logged and counted; the file is
    /// treated as empty for this pass and retried on next content change.
    #[error("extraction failed for {path}: {reason}")]
    ExtractionFailure { path: String, reason: String },

    /// A backend (lexical or vector) is unreachable or timed out. The
    /// affected branch of retrieval contributes zero hits.
    #[error("backend unavailable: {backend}: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// An LLM response could not be parsed into the expected structured
    /// record. The phase falls back to its hard-coded default.
    #[error("failed to parse {what} from model response: {reason}")]
    ParseFailure { what: String, reason: String },

    /// The query gate decided no retrieval is required.
    #[error("gate decided no retrieval is required: {reason}")]
    GateNoRag { reason: String },

    /// Retrieval and filtering left no hits; the answer stage is skipped.
    #[error("no evidence remained after retrieval and filtering")]
    EmptyEvidence,

    /// The request task was cancelled (client disconnect).
    #[error("client cancelled the request")]
    ClientCancel,

    /// Missing or invalid tenant configuration at boot. This is the only
    /// kind that escapes the request path — the process refuses to start.
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

impl CoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::FatalConfig(_))
    }
}

/// The fixed, citation-free fallback returned whenever an answer would be
/// ungrounded (gate says no_rag, or evidence came back empty).
pub const UNGROUNDED_FALLBACK_DE: &str = "Nicht in den Dokumenten gefunden.";
