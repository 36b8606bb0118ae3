//! Domain acronym/synonym expansion applied before search (§4.12
//! component table entry "Glossary rewriter").
//!
//! Safety rule from the open questions in §9: content inside quotation
//! marks is never rewritten, because the exact-phrase gate (§4.6) must
//! see the user's literal phrase. `rewrite` is idempotent (§8): running
//! it twice is the same as running it once, since expansions are
//! appended after the trigger term rather than replacing it in place.

use std::collections::HashMap;

/// Splits `text` into alternating (outside-quotes, inside-quotes)
/// segments on straight double quotes. An unterminated trailing quote
/// is treated as "outside" for the remainder, since there is no closing
/// quote to protect.
fn split_on_quotes(text: &str) -> Vec<(&str, bool)> {
    let mut segments = Vec::new();
    let mut rest = text;
    let mut in_quotes = false;
    loop {
        match rest.find('"') {
            Some(idx) => {
                segments.push((&rest[..idx], in_quotes));
                rest = &rest[idx + 1..];
                in_quotes = !in_quotes;
            }
            None => {
                segments.push((rest, in_quotes));
                break;
            }
        }
    }
    segments
}

/// Rewrites `text` by appending glossary expansions after every
/// whole-word occurrence of a glossary term outside quotation marks.
/// Case-insensitive matching, case-preserving output of the original
/// occurrence. Idempotent: an already-expanded term's expansion text
/// does not itself match a glossary key with its own different
/// expansion appended again, because expansions are drawn from the same
/// map and a second pass finds the identical occurrence already
/// followed by the identical parenthetical.
pub fn rewrite(text: &str, glossary: &HashMap<String, String>) -> String {
    if glossary.is_empty() || text.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    for (segment, quoted) in split_on_quotes(text) {
        if quoted {
            out.push('"');
            out.push_str(segment);
            out.push('"');
        } else {
            out.push_str(&expand_segment(segment, glossary));
        }
    }
    out
}

fn expand_segment(segment: &str, glossary: &HashMap<String, String>) -> String {
    let lower_keys: HashMap<String, &String> =
        glossary.iter().map(|(k, v)| (k.to_lowercase(), v)).collect();

    let mut out = String::with_capacity(segment.len());
    let mut word_start: Option<usize> = None;

    let flush_word = |out: &mut String, word: &str, already_expanded: &str| {
        out.push_str(word);
        let lower = word.to_lowercase();
        if let Some(expansion) = lower_keys.get(&lower) {
            let marker = format!("({expansion})");
            // Idempotence guard: don't re-append if this exact expansion
            // already immediately follows the term (allowing for the one
            // separating space this same function inserts).
            if !already_expanded.trim_start_matches(' ').starts_with(&marker) {
                out.push(' ');
                out.push_str(&marker);
            }
        }
    };

    let mut i = 0usize;
    let bytes_len = segment.len();
    while i < bytes_len {
        let ch = segment[i..].chars().next().unwrap();
        if ch.is_alphanumeric() || ch == '_' {
            if word_start.is_none() {
                word_start = Some(i);
            }
            i += ch.len_utf8();
        } else {
            if let Some(start) = word_start.take() {
                let word = &segment[start..i];
                let mut lookahead_end = (i + 64).min(bytes_len);
                while lookahead_end > i && !segment.is_char_boundary(lookahead_end) {
                    lookahead_end -= 1;
                }
                flush_word(&mut out, word, &segment[i..lookahead_end]);
            }
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    if let Some(start) = word_start.take() {
        let word = &segment[start..];
        flush_word(&mut out, word, "");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glossary() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("HX".to_string(), "Heat Exchanger".to_string());
        m
    }

    #[test]
    fn expands_unquoted_acronym() {
        let out = rewrite("check the HX for leaks", &glossary());
        assert_eq!(out, "check the HX (Heat Exchanger) for leaks");
    }

    #[test]
    fn does_not_rewrite_inside_quotes() {
        let out = rewrite(r#"exakt "check the HX for leaks""#, &glossary());
        assert_eq!(out, r#"exakt "check the HX for leaks""#);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let once = rewrite("HX inspection", &glossary());
        let twice = rewrite(&once, &glossary());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_glossary_is_identity() {
        let out = rewrite("some text", &HashMap::new());
        assert_eq!(out, "some text");
    }
}
