//! Persistence back-ends (§3 "Lifecycles", §6 "Persisted state").
//!
//! The sync engine itself never touches a [`Store`] — persistence is a side
//! effect a transport or a background task drives after (or alongside)
//! [`crate::engine::SyncEngine::process_request`], matching "persistence
//! failures never interrupt a request" from §7. Three backends are
//! provided: [`memory`] (the default, always compiled in), [`file`]
//! (one file per document/view/buffer, behind the `file-backend` feature),
//! and [`kv`] (an embedded `sled` database, behind the `kv-backend`
//! feature).

pub mod memory;

#[cfg(feature = "file-backend")]
pub mod file;

#[cfg(feature = "kv-backend")]
pub mod kv;

use std::time::SystemTime;

use crate::error::StoreError;
use crate::view::ViewRecord;

/// A persisted snapshot of one document's master text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    /// The master text, or `None` for "unknown/deleted".
    pub text: Option<String>,
    /// When this text was last modified.
    pub last_modified: SystemTime,
}

/// A persisted snapshot of one buffer's fragment slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRecord {
    /// The declared slot count.
    pub size: usize,
    /// The slots, 0-indexed; `None` where no fragment has arrived yet.
    pub slots: Vec<Option<String>>,
}

/// The persistence surface the sync engine's registries are saved through
/// and reloaded from across a server restart.
///
/// Every method is synchronous: callers that need to avoid blocking an
/// async executor (the daemon crate's stream transport, notably) wrap calls
/// in `tokio::task::spawn_blocking` rather than pushing async down into
/// this trait, since the in-memory backend — the default — never blocks
/// and shouldn't pay for a future it doesn't need.
pub trait Store: Send + Sync {
    /// Persists (or deletes, if `record.text` transitioned to `None` and
    /// the backend chooses to drop the row) a document's state.
    fn save_text(&self, name: &str, record: &TextRecord) -> Result<(), StoreError>;
    /// Loads a previously persisted document, if any.
    fn load_text(&self, name: &str) -> Result<Option<TextRecord>, StoreError>;
    /// Removes a document's persisted state outright (the nullify path).
    fn delete_text(&self, name: &str) -> Result<(), StoreError>;

    /// Persists a session's full state, including its serialized edit
    /// stack.
    fn save_view(&self, username: &str, doc_name: &str, record: &ViewRecord) -> Result<(), StoreError>;
    /// Loads a previously persisted session, if any.
    fn load_view(&self, username: &str, doc_name: &str) -> Result<Option<ViewRecord>, StoreError>;
    /// Removes a session's persisted state outright.
    fn delete_view(&self, username: &str, doc_name: &str) -> Result<(), StoreError>;

    /// Persists an in-progress (incomplete) buffer's slots.
    fn save_buffer(&self, name: &str, record: &BufferRecord) -> Result<(), StoreError>;
    /// Loads a previously persisted buffer, if any.
    fn load_buffer(&self, name: &str, size: usize) -> Result<Option<BufferRecord>, StoreError>;
    /// Removes a buffer's persisted state outright (completion or eviction).
    fn delete_buffer(&self, name: &str, size: usize) -> Result<(), StoreError>;
}

/// Serializes an edit stack using length-prefixed entries (a `u32`
/// big-endian byte length followed by the raw-line bytes), per the Open
/// Question in spec §9: the lossy tab/newline format the original source
/// used is rejected in favor of this unambiguous one, since a raw-dump
/// entry's payload can itself legitimately contain embedded newlines.
pub fn encode_edit_stack(entries: &[crate::view::EditStackEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        out.extend_from_slice(&entry.server_version.to_be_bytes());
        let bytes = entry.raw_line.as_bytes();
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(bytes);
    }
    out
}

/// Inverse of [`encode_edit_stack`]. Fails with [`StoreError::Corrupt`] if
/// the byte stream is truncated or not valid UTF-8.
pub fn decode_edit_stack(bytes: &[u8]) -> Result<Vec<crate::view::EditStackEntry>, StoreError> {
    let mut entries = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        let version_bytes = bytes
            .get(cursor..cursor + 8)
            .ok_or_else(|| StoreError::Corrupt("edit stack".to_string()))?;
        let server_version = u64::from_be_bytes(version_bytes.try_into().unwrap());
        cursor += 8;

        let len_bytes = bytes
            .get(cursor..cursor + 4)
            .ok_or_else(|| StoreError::Corrupt("edit stack".to_string()))?;
        let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        cursor += 4;

        let raw_bytes = bytes
            .get(cursor..cursor + len)
            .ok_or_else(|| StoreError::Corrupt("edit stack".to_string()))?;
        let raw_line = String::from_utf8(raw_bytes.to_vec())
            .map_err(|_| StoreError::Corrupt("edit stack".to_string()))?;
        cursor += len;

        entries.push(crate::view::EditStackEntry {
            server_version,
            raw_line,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::EditStackEntry;

    #[test]
    fn edit_stack_round_trips_through_length_prefixed_encoding() {
        let entries = vec![
            EditStackEntry {
                server_version: 3,
                raw_line: "d:3:=5\n".to_string(),
            },
            EditStackEntry {
                server_version: 4,
                raw_line: "R:4:embedded\nnewline\n".to_string(),
            },
        ];
        let encoded = encode_edit_stack(&entries);
        let decoded = decode_edit_stack(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn decode_rejects_truncated_bytes() {
        let entries = vec![EditStackEntry {
            server_version: 1,
            raw_line: "d:1:=1\n".to_string(),
        }];
        let mut encoded = encode_edit_stack(&entries);
        encoded.truncate(encoded.len() - 1);
        assert!(decode_edit_stack(&encoded).is_err());
    }
}
