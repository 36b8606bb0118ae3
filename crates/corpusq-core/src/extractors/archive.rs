//! Nested-ZIP extraction (§4.2): depth-limited recursive descent,
//! rejecting absolute paths and `..` traversal. Each extractable member
//! contributes a header line naming its inner path followed by its
//! extracted text.

use super::extract_bytes;
use std::io::Read;

const DEFAULT_MAX_DEPTH: u32 = 2;

pub fn extract_zip(bytes: &[u8]) -> String {
    extract_zip_at_depth(bytes, "", DEFAULT_MAX_DEPTH)
}

fn is_safe_member_path(name: &str) -> bool {
    !name.starts_with('/') && !name.starts_with('\\') && !name.split(['/', '\\']).any(|seg| seg == "..")
}

fn extract_zip_at_depth(bytes: &[u8], path_prefix: &str, remaining_depth: u32) -> String {
    if remaining_depth == 0 {
        return String::new();
    }
    let mut archive = match zip::ZipArchive::new(std::io::Cursor::new(bytes)) {
        Ok(a) => a,
        Err(_) => return String::new(),
    };

    let mut out = String::new();
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if !is_safe_member_path(&name) {
            continue;
        }
        let mut contents = Vec::new();
        if entry.read_to_end(&mut contents).is_err() {
            continue;
        }
        drop(entry);

        let inner_path = if path_prefix.is_empty() {
            name.clone()
        } else {
            format!("{path_prefix}/{name}")
        };

        let text = if name.to_lowercase().ends_with(".zip") {
            extract_zip_at_depth(&contents, &inner_path, remaining_depth - 1)
        } else {
            extract_bytes(&contents, &name)
        };

        if !text.is_empty() {
            out.push_str(&format!("=== {inner_path} ===\n"));
            out.push_str(&text);
            out.push_str("\n\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_and_parent_paths() {
        assert!(!is_safe_member_path("/etc/passwd"));
        assert!(!is_safe_member_path("../../etc/passwd"));
        assert!(!is_safe_member_path("a/../b"));
        assert!(is_safe_member_path("docs/report.txt"));
    }

    #[test]
    fn malformed_zip_yields_empty_string() {
        assert_eq!(extract_zip(b"not a zip"), "");
    }

    #[test]
    fn depth_zero_yields_empty_string() {
        assert_eq!(extract_zip_at_depth(b"anything", "", 0), "");
    }
}
