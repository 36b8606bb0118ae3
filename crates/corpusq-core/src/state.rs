//! Per-conversation state persistence (§3, §4.12): one JSON record per
//! `conversation_id`, written atomically via a sibling temp file plus
//! rename so a crash mid-write never leaves a half-written record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::types::ConversationState;

/// Strips everything outside `[A-Za-z0-9_-]` and truncates to 80
/// characters (§4.12). Empty input sanitizes to `"_"` so it never
/// produces an unusable empty filename.
pub fn sanitize_conversation_id(raw: &str) -> String {
    let filtered: String = raw.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-').collect();
    let truncated: String = filtered.chars().take(80).collect();
    if truncated.is_empty() {
        "_".to_string()
    } else {
        truncated
    }
}

/// The `<STATE_PATH>/<sanitized_conversation_id>.json` store (§6
/// "Persisted state layout").
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating state directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_conversation_id(conversation_id)))
    }

    /// Loads a conversation's state, or an empty one if no record exists
    /// yet (§4.12 "the store exposes `load(id)`").
    pub fn load(&self, conversation_id: &str) -> Result<ConversationState> {
        let path = self.path_for(conversation_id);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).with_context(|| format!("parsing conversation state {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConversationState::empty(conversation_id)),
            Err(e) => Err(e).with_context(|| format!("reading conversation state {}", path.display())),
        }
    }

    /// Persists `summary`/`notes` for `conversation_id`, via write-to-temp
    /// then rename (§4.12, §5 "written via rename-over; concurrent
    /// writers to the same conversation produce a last-writer-wins
    /// outcome").
    pub fn save(&self, conversation_id: &str, summary: &str, notes: &str, updated_at: i64) -> Result<()> {
        let state = ConversationState {
            conversation_id: conversation_id.to_string(),
            summary: summary.to_string(),
            notes: notes.to_string(),
            updated_at,
        };
        let path = self.path_for(conversation_id);
        let tmp_path = tmp_sibling(&path);
        let serialized = serde_json::to_string_pretty(&state).context("serializing conversation state")?;
        std::fs::write(&tmp_path, serialized).with_context(|| format!("writing temp state file {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path).with_context(|| format!("renaming temp state file into {}", path.display()))?;
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("state");
    path.with_file_name(format!(".{file_name}.tmp"))
}

/// Derives a deterministic `conversation_id` from a message transcript
/// when the caller supplies none (§3 "either caller-supplied or derived
/// deterministically from a prefix hash of the message transcript").
pub fn derive_conversation_id(messages: &[String]) -> String {
    let joined = messages.join("\u{1f}");
    let digest = crate::hashing::sha1_bytes(joined.as_bytes());
    digest.chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_strips_disallowed_characters_and_truncates() {
        let raw = "conv/id with spaces!".repeat(10);
        let sanitized = sanitize_conversation_id(&raw);
        assert!(sanitized.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        assert!(sanitized.len() <= 80);
    }

    #[test]
    fn sanitize_empty_input_does_not_produce_empty_filename() {
        assert_eq!(sanitize_conversation_id("!!! ??? ///"), "_");
    }

    #[test]
    fn load_missing_conversation_returns_empty_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        let state = store.load("brand-new").unwrap();
        assert_eq!(state.summary, "");
        assert_eq!(state.conversation_id, "brand-new");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store.save("conv-1", "summary text", "notes text", 42).unwrap();
        let loaded = store.load("conv-1").unwrap();
        assert_eq!(loaded.summary, "summary text");
        assert_eq!(loaded.notes, "notes text");
        assert_eq!(loaded.updated_at, 42);
    }

    #[test]
    fn save_does_not_leave_a_temp_file_behind() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store.save("conv-2", "s", "n", 1).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        assert!(entries.iter().all(|e| !e.file_name().to_string_lossy().ends_with(".tmp")));
    }

    #[test]
    fn derive_conversation_id_is_deterministic() {
        let messages = vec!["hello".to_string(), "world".to_string()];
        let a = derive_conversation_id(&messages);
        let b = derive_conversation_id(&messages);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
