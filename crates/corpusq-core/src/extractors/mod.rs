//! Text extraction dispatch table (§4.2): one function per supported
//! extension, all returning an owned `String` and never raising —
//! failures degrade to an empty string and are logged by the caller
//! (the indexer), which is the one place that knows the file path to
//! attribute the failure to.

mod archive;
mod mail;
mod ooxml;
mod pdf;
mod text;

use std::path::Path;

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "json", "yaml", "yml", "toml", "log", "ini", "cfg", "rs",
    "py", "js", "ts", "xml",
];

/// Extracts text from a file on disk by reading its bytes and
/// dispatching on its extension (§4.2).
pub fn extract_file(path: &Path) -> String {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "extractors: failed to read file");
            return String::new();
        }
    };
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    extract_bytes(&bytes, ext)
}

/// Extracts text from in-memory `bytes` given a name or extension to
/// dispatch on. `inner_path` may be a bare extension (e.g. `"pdf"`) or
/// a full path/filename — only the extension is consulted.
pub fn extract_bytes(bytes: &[u8], inner_path: &str) -> String {
    let ext = Path::new(inner_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(inner_path)
        .to_lowercase();

    match ext.as_str() {
        "pdf" => pdf::extract_pdf(bytes),
        "docx" => ooxml::extract_docx(bytes),
        "pptx" => ooxml::extract_pptx(bytes),
        "xlsx" => ooxml::extract_xlsx(bytes),
        "html" | "htm" => text::strip_html(&text::decode_text(bytes)),
        "eml" => mail::extract_eml(bytes),
        "msg" => mail::extract_msg(bytes),
        "zip" => archive::extract_zip(bytes),
        e if PLAIN_TEXT_EXTENSIONS.contains(&e) => text::decode_text(bytes),
        _ => String::new(),
    }
}

/// The extensions this dispatch table has a handler for (used by the
/// indexer walker to decide whether a file is worth reading at all).
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    matches!(
        ext.as_str(),
        "pdf" | "docx" | "pptx" | "xlsx" | "html" | "htm" | "eml" | "msg" | "zip"
    ) || PLAIN_TEXT_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_yields_empty_string() {
        assert_eq!(extract_bytes(b"binary junk", "exe"), "");
    }

    #[test]
    fn plain_text_extension_roundtrips() {
        assert_eq!(extract_bytes(b"hello world", "txt"), "hello world");
    }

    #[test]
    fn supported_extension_list_matches_dispatch() {
        assert!(is_supported_extension("PDF"));
        assert!(is_supported_extension("docx"));
        assert!(!is_supported_extension("exe"));
    }
}
