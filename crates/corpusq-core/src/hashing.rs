//! Content hashing and stat primitives used by the indexer's manifest check.

use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// SHA-1 over the raw bytes of a file, streamed in 1 MiB blocks so large
/// attachments and scans don't need to be buffered whole.
pub fn sha1_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha1_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `(mtime, size)` as whole seconds since epoch and bytes, matching the
/// manifest's comparison granularity.
pub fn file_stat(path: &Path) -> Result<(i64, i64)> {
    let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok((mtime, meta.len() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sha1_matches_known_vector() {
        // sha1("abc") is a well-known test vector
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"abc").unwrap();
        drop(f);
        assert_eq!(
            sha1_file(&path).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
    }

    #[test]
    fn stat_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();
        let (_mtime, size) = file_stat(&path).unwrap();
        assert_eq!(size, 5);
    }
}
