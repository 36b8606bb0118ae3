//! Evidence assembler (§4.8): groups ranked hits by source document,
//! truncates, numbers citations in first-appearance order, and emits a
//! prompt context alongside a parallel `Source` list (§8 testable
//! property 5 "citation numbering law").

use crate::types::{Hit, Source};

pub struct Evidence {
    pub context: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Copy)]
pub struct EvidenceConfig {
    pub max_chars_per_source: usize,
    pub max_sources: usize,
    pub max_chunks_per_source: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_chars_per_source: 1600,
            max_sources: 6,
            max_chunks_per_source: 3,
        }
    }
}

struct Accumulator {
    path: String,
    n: u32,
    chunks: Vec<String>,
    chars_used: usize,
}

/// Assembles evidence from `hits`, already in rank order. `max_sources=0`
/// returns empty context/sources without touching the hits (§8 round-trip
/// law).
pub fn assemble(hits: &[Hit], config: EvidenceConfig) -> Evidence {
    if config.max_sources == 0 {
        return Evidence { context: String::new(), sources: Vec::new() };
    }

    let mut order: Vec<Accumulator> = Vec::new();
    let mut index_of_path: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for hit in hits {
        if order.len() >= config.max_sources && !index_of_path.contains_key(&hit.path) {
            continue;
        }
        let idx = match index_of_path.get(&hit.path) {
            Some(&i) => i,
            None => {
                if order.len() >= config.max_sources {
                    continue;
                }
                let i = order.len();
                order.push(Accumulator {
                    path: hit.path.clone(),
                    n: (i + 1) as u32,
                    chunks: Vec::new(),
                    chars_used: 0,
                });
                index_of_path.insert(hit.path.clone(), i);
                i
            }
        };

        let acc = &mut order[idx];
        if acc.chunks.len() >= config.max_chunks_per_source {
            continue;
        }
        if acc.chars_used >= config.max_chars_per_source {
            continue;
        }
        let remaining = config.max_chars_per_source - acc.chars_used;
        let clipped: String = hit.snippet.chars().take(remaining).collect();
        if clipped.is_empty() {
            continue;
        }
        acc.chars_used += clipped.chars().count();
        acc.chunks.push(clipped);
    }

    let mut context = String::new();
    let mut sources = Vec::with_capacity(order.len());
    for acc in &order {
        context.push_str(&format!("[{}] {}\n", acc.n, acc.path));
        context.push_str(&acc.chunks.join("\n---\n"));
        context.push_str("\n\n");

        sources.push(Source {
            n: acc.n,
            path: acc.path.clone(),
            display_path: acc.path.clone(),
            local_url: None,
            finding_count: 0,
        });
    }

    Evidence { context: context.trim_end().to_string(), sources }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExactLevel, HitSource};
    use std::collections::HashMap;

    fn hit(path: &str, snippet: &str) -> Hit {
        Hit {
            source: HitSource::Lexical,
            chunk_or_doc_id: format!("{path}:0"),
            score: 1.0,
            path: path.to_string(),
            snippet: snippet.to_string(),
            metadata: HashMap::new(),
            exact_level: ExactLevel::Bm25,
        }
    }

    #[test]
    fn citations_are_numbered_in_first_appearance_order() {
        let hits = vec![hit("b.pdf", "b text"), hit("a.pdf", "a text"), hit("b.pdf", "more b")];
        let ev = assemble(&hits, EvidenceConfig::default());
        assert_eq!(ev.sources.len(), 2);
        assert_eq!(ev.sources[0].path, "b.pdf");
        assert_eq!(ev.sources[0].n, 1);
        assert_eq!(ev.sources[1].path, "a.pdf");
        assert_eq!(ev.sources[1].n, 2);
        assert!(ev.context.contains("[1] b.pdf"));
        assert!(ev.context.contains("[2] a.pdf"));
    }

    #[test]
    fn max_sources_zero_returns_empty_without_panicking() {
        let hits = vec![hit("a.pdf", "text")];
        let ev = assemble(&hits, EvidenceConfig { max_sources: 0, ..Default::default() });
        assert!(ev.context.is_empty());
        assert!(ev.sources.is_empty());
    }

    #[test]
    fn caps_at_max_sources_documents() {
        let hits: Vec<Hit> = (0..10).map(|i| hit(&format!("doc{i}.pdf"), "text")).collect();
        let ev = assemble(&hits, EvidenceConfig { max_sources: 3, ..Default::default() });
        assert_eq!(ev.sources.len(), 3);
    }

    #[test]
    fn clips_total_chars_per_document() {
        let long = "x".repeat(5000);
        let hits = vec![hit("a.pdf", &long), hit("a.pdf", &long), hit("a.pdf", &long)];
        let ev = assemble(&hits, EvidenceConfig { max_chars_per_source: 100, ..Default::default() });
        // Only the context for a.pdf; total snippet chars should not exceed the cap.
        let body_chars = ev.context.lines().skip(1).collect::<Vec<_>>().join("").chars().count();
        assert!(body_chars <= 100);
    }

    #[test]
    fn accepts_up_to_three_chunks_per_document() {
        let hits = vec![
            hit("a.pdf", "c1"),
            hit("a.pdf", "c2"),
            hit("a.pdf", "c3"),
            hit("a.pdf", "c4"),
        ];
        let ev = assemble(&hits, EvidenceConfig::default());
        assert_eq!(ev.context.matches("---").count(), 2);
    }
}
