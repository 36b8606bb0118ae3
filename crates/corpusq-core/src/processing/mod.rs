//! PDF structural parsing (§4.2). The windowed chunker and the other
//! format extractors live at the crate root (`crate::chunker`,
//! `crate::extractors`); this module is narrowly the lopdf-based PDF
//! reader, kept separate because it is reused by both the extractor
//! dispatch table and (potentially) form-field-aware callers.

pub mod lopdf_parser;

pub use lopdf_parser::LoPdfParser;
