//! Plain-text and HTML extraction (§4.2): BOM-tolerant decoding with a
//! UTF-8 → CP1252 → Latin-1 fallback chain, and tag-stripped HTML.

/// Decodes `bytes` as text, stripping a UTF-8/UTF-16 BOM if present and
/// falling back through CP1252 then Latin-1 if the bytes aren't valid
/// UTF-8. Latin-1 never fails (every byte maps to a codepoint), so this
/// always returns a string rather than an error.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = strip_bom(bytes);
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    decode_cp1252(bytes)
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &bytes[3..]
    } else if bytes.starts_with(&[0xFF, 0xFE]) || bytes.starts_with(&[0xFE, 0xFF]) {
        // UTF-16 BOM: not a format we try to decode natively here; the
        // caller's fallback chain below treats the remaining bytes as
        // single-byte text, which is the best-effort contract (§4.2
        // "extractors must return empty string on failure rather than
        // raising" — this never raises, it degrades).
        &bytes[2..]
    } else {
        bytes
    }
}

/// Windows-1252 is ASCII-compatible except for the 0x80-0x9F block,
/// which maps to a handful of typographic characters rather than the
/// C1 control codes Latin-1 would assign there.
fn decode_cp1252(bytes: &[u8]) -> String {
    const CP1252_HIGH: [char; 32] = [
        '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}',
        '\u{2021}', '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}',
        '\u{017D}', '\u{008F}', '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
        '\u{2022}', '\u{2013}', '\u{2014}', '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
        '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
    ];
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            0x80..=0x9F => out.push(CP1252_HIGH[(b - 0x80) as usize]),
            _ => out.push(b as char), // Latin-1 for everything else, incl. 7-bit ASCII.
        }
    }
    out
}

/// Strips HTML tags and decodes the handful of entities that show up in
/// plain document bodies, leaving visible text only (§4.2).
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut in_script_style = false;
    let mut tag_buf = String::new();
    for ch in html.chars() {
        if in_tag {
            if ch == '>' {
                in_tag = false;
                let tag = tag_buf.trim().to_lowercase();
                if tag.starts_with("script") || tag.starts_with("style") {
                    in_script_style = true;
                } else if tag.starts_with("/script") || tag.starts_with("/style") {
                    in_script_style = false;
                } else if tag.starts_with("br") || tag == "p" || tag.starts_with("/p")
                    || tag.starts_with("/div") || tag.starts_with("/tr")
                {
                    out.push('\n');
                }
                tag_buf.clear();
            } else {
                tag_buf.push(ch);
            }
        } else if ch == '<' {
            in_tag = true;
        } else if !in_script_style {
            out.push(ch);
        }
    }
    decode_entities(&out)
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}
