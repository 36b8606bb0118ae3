//! Deterministic windowed chunker (§4.3).
//!
//! This is the primary chunker used by the indexing pipeline: a lazy,
//! finite, fixed-stride split of normalized text. It supersedes
//! `processing::chunker`'s sentence/paragraph-boundary-aware splitter for
//! that role — the boundary-aware splitter and its structured variants
//! stay available for PDF form/table extraction, where snapping to a
//! row or section boundary produces better chunks than a blind stride.
//!
//! Reference semantics: character windows of `size` with stride
//! `size - overlap`. Empty or whitespace-only input yields no chunks.

use crate::types::Chunk;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            size: 1200,
            overlap: 180,
        }
    }
}

/// CRLF→LF, collapse runs of whitespace, preserve paragraph breaks
/// (a run of 2+ newlines collapses to exactly `\n\n`; any other run of
/// whitespace collapses to a single space).
pub fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            let mut newline_count = usize::from(c == '\n');
            while let Some(&next) = chars.peek() {
                if !next.is_whitespace() {
                    break;
                }
                if next == '\n' {
                    newline_count += 1;
                }
                chars.next();
            }
            if newline_count >= 2 {
                out.push('\n');
                out.push('\n');
            } else {
                out.push(' ');
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Prepends a normalized mail header block (`Subject`/`From`/`To`/`Date`)
/// to a body so a chunk may straddle header and body, per §4.3.
pub fn prepend_mail_header(headers: &[(&str, &str)], body: &str) -> String {
    let mut block = String::new();
    for (key, value) in headers {
        if !value.is_empty() {
            block.push_str(key);
            block.push_str(": ");
            block.push_str(value);
            block.push('\n');
        }
    }
    if block.is_empty() {
        body.to_string()
    } else {
        block.push('\n');
        block.push_str(body);
        block
    }
}

/// Splits already-normalized text into fixed-stride, UTF-8-safe
/// substrings. Byte-indexed window math, snapped inward to the nearest
/// char boundary, so multi-byte characters never get split — a
/// concession to the reference's character-index semantics that keeps
/// `text[start..end]` always valid.
fn windows(text: &str, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let n = text.len();
    if n == 0 || text.trim().is_empty() {
        return Vec::new();
    }
    let stride = size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let mut end = (start + size).min(n);
        while end < n && !text.is_char_boundary(end) {
            end += 1;
        }
        out.push((start, end));
        if end >= n {
            break;
        }
        let mut next_start = end.saturating_sub(overlap);
        while next_start > 0 && !text.is_char_boundary(next_start) {
            next_start -= 1;
        }
        // Guarantee forward progress even for degenerate size/overlap.
        start = next_start.max(start + 1).min(n);
        let _ = stride;
    }
    out
}

/// Splits normalized `text` into `Chunk`s whose `chunk_id` is
/// `<id_prefix>:<chunk_index>` — callers supply the already-computed
/// stable prefix (`sha1(virtual_path)[:16]` or
/// `content_hash:inner_path`) per the chunk-id format in §6.
pub fn chunk_text(text: &str, id_prefix: &str, config: ChunkerConfig) -> Vec<Chunk> {
    let normalized = normalize(text);
    windows(&normalized, config.size, config.overlap)
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Chunk {
            chunk_id: format!("{id_prefix}:{index}"),
            file_content_hash: String::new(),
            page_or_section: None,
            chunk_index: index as u32,
            text: normalized[start..end].to_string(),
            metadata: HashMap::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", "p", ChunkerConfig::default()).is_empty());
        assert!(chunk_text("   \n\t  ", "p", ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn stride_matches_size_minus_overlap() {
        let text = "a".repeat(3000);
        let cfg = ChunkerConfig {
            size: 1200,
            overlap: 180,
        };
        let chunks = chunk_text(&text, "p", cfg);
        assert_eq!(chunks[0].text.len(), 1200);
        assert_eq!(chunks[1].text.len(), 1200);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks.last().unwrap().chunk_index as usize, chunks.len() - 1);
    }

    #[test]
    fn chunk_ids_are_prefix_and_index() {
        let chunks = chunk_text(&"x".repeat(50), "abc123", ChunkerConfig { size: 20, overlap: 5 });
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_id, format!("abc123:{i}"));
        }
    }

    #[test]
    fn normalize_collapses_whitespace_preserves_paragraphs() {
        let input = "Hello   world.\r\n\r\nSecond   paragraph.\ttabbed";
        let out = normalize(input);
        assert_eq!(out, "Hello world.\n\nSecond paragraph. tabbed");
    }

    #[test]
    fn normalize_is_utf8_safe_on_multibyte_boundaries() {
        let text = "é".repeat(2000);
        let chunks = chunk_text(&text, "p", ChunkerConfig::default());
        for c in &chunks {
            assert!(c.text.chars().all(|ch| ch == 'é'));
        }
    }

    #[test]
    fn mail_header_prepended_before_body() {
        let out = prepend_mail_header(
            &[("Subject", "Re: Leak"), ("From", "a@b.test"), ("To", ""), ("Date", "2026-01-01")],
            "Body text.",
        );
        assert_eq!(out, "Subject: Re: Leak\nFrom: a@b.test\nDate: 2026-01-01\n\nBody text.");
    }

    #[test]
    fn last_chunk_reaches_end_of_text() {
        let text = "y".repeat(2500);
        let chunks = chunk_text(&text, "p", ChunkerConfig::default());
        let total: usize = chunks.last().unwrap().chunk_index as usize;
        assert!(total > 0);
        let last = chunks.last().unwrap();
        assert!(text.ends_with(&last.text));
    }
}
