//! Content-address manifest: `absolute_path -> (content_hash, mtime, size)`.
//!
//! This is the indexer's sole "is this file current?" test — a file is
//! skipped iff the manifest row's `(mtime, size)` exactly matches the
//! current filesystem stat. Backed by SQLite, matching the reference
//! implementation's `manifest.py` (single table, upsert via `ON CONFLICT`),
//! which also gives the single-writer discipline the concurrency model
//! (§5) assumes for free.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub path: String,
    pub content_hash: String,
    pub mtime: i64,
    pub size: i64,
}

pub struct Manifest {
    conn: Mutex<Connection>,
}

impl Manifest {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening manifest db at {}", db_path.display()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                mtime INTEGER NOT NULL,
                size INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                mtime INTEGER NOT NULL,
                size INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, path: &str) -> Result<Option<ManifestRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare_cached("SELECT path, content_hash, mtime, size FROM files WHERE path = ?1")?;
        let row = stmt
            .query_row(params![path], |r| {
                Ok(ManifestRow {
                    path: r.get(0)?,
                    content_hash: r.get(1)?,
                    mtime: r.get(2)?,
                    size: r.get(3)?,
                })
            })
            .ok();
        Ok(row)
    }

    pub fn upsert(&self, row: &ManifestRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO files(path, content_hash, mtime, size) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                mtime = excluded.mtime,
                size = excluded.size",
            params![row.path, row.content_hash, row.mtime, row.size],
        )?;
        Ok(())
    }

    /// True iff the manifest row's (mtime, size) exactly matches the given
    /// stat — the indexer's skip test. A miss (no row, or a mismatch)
    /// means the file must be re-extracted and re-hashed.
    pub fn is_current(&self, path: &str, mtime: i64, size: i64) -> Result<bool> {
        Ok(match self.get(path)? {
            Some(row) => row.mtime == mtime && row.size == size,
            None => false,
        })
    }

    /// All manifest paths, for orphan-sweep callers that cross-reference
    /// against the current filesystem walk. Sweeping itself is not part of
    /// the core's normal indexing pass.
    pub fn all_paths(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path FROM files")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn remove(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_get_roundtrips() {
        let m = Manifest::in_memory().unwrap();
        let row = ManifestRow {
            path: "/a/b.txt".into(),
            content_hash: "deadbeef".into(),
            mtime: 100,
            size: 42,
        };
        m.upsert(&row).unwrap();
        assert_eq!(m.get("/a/b.txt").unwrap(), Some(row));
    }

    #[test]
    fn upsert_replaces_unconditionally() {
        let m = Manifest::in_memory().unwrap();
        m.upsert(&ManifestRow {
            path: "/a.txt".into(),
            content_hash: "h1".into(),
            mtime: 1,
            size: 1,
        })
        .unwrap();
        m.upsert(&ManifestRow {
            path: "/a.txt".into(),
            content_hash: "h2".into(),
            mtime: 2,
            size: 2,
        })
        .unwrap();
        let row = m.get("/a.txt").unwrap().unwrap();
        assert_eq!(row.content_hash, "h2");
        assert_eq!(row.mtime, 2);
    }

    #[test]
    fn is_current_matches_exact_stat_only() {
        let m = Manifest::in_memory().unwrap();
        m.upsert(&ManifestRow {
            path: "/a.txt".into(),
            content_hash: "h1".into(),
            mtime: 10,
            size: 5,
        })
        .unwrap();
        assert!(m.is_current("/a.txt", 10, 5).unwrap());
        assert!(!m.is_current("/a.txt", 10, 6).unwrap());
        assert!(!m.is_current("/missing.txt", 10, 5).unwrap());
    }
}
