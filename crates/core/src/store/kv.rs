//! Embedded key-value persistence backend (`kv-backend` feature), backed
//! by `sled`.
//!
//! Each of the three persisted stores lives in its own `sled::Tree`, keyed
//! by the same concatenation scheme the file backend uses for path
//! segments — `sled` trees don't care about `/` or other characters, but
//! reusing one key scheme keeps the two backends' on-disk identities
//! comparable for anyone migrating between them.

use crate::error::StoreError;
use crate::store::{decode_edit_stack, encode_edit_stack, BufferRecord, Store, TextRecord};
use crate::view::ViewRecord;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A `sled`-backed [`Store`].
pub struct KvStore {
    texts: sled::Tree,
    views: sled::Tree,
    buffers: sled::Tree,
}

impl KvStore {
    /// Opens (creating if necessary) a `sled` database at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|err| StoreError::Backend(err.to_string()))?;
        let texts = db
            .open_tree("texts")
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let views = db
            .open_tree("views")
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let buffers = db
            .open_tree("buffers")
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self { texts, views, buffers })
    }

    fn view_key(username: &str, doc_name: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(username.len() + doc_name.len() + 1);
        key.extend_from_slice(username.as_bytes());
        key.push(0);
        key.extend_from_slice(doc_name.as_bytes());
        key
    }

    fn buffer_key(name: &str, size: usize) -> Vec<u8> {
        let mut key = Vec::with_capacity(name.len() + 9);
        key.extend_from_slice(name.as_bytes());
        key.push(0);
        key.extend_from_slice(&(size as u64).to_be_bytes());
        key
    }
}

fn encode_text(record: &TextRecord) -> Vec<u8> {
    let seconds = record
        .last_modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let mut out = seconds.to_be_bytes().to_vec();
    match &record.text {
        Some(text) => {
            out.push(1);
            out.extend_from_slice(text.as_bytes());
        }
        None => out.push(0),
    }
    out
}

fn decode_text(bytes: &[u8]) -> Result<TextRecord, StoreError> {
    let err = || StoreError::Corrupt("text record".to_string());
    let seconds = u64::from_be_bytes(bytes.get(0..8).ok_or_else(err)?.try_into().unwrap());
    let present = *bytes.get(8).ok_or_else(err)?;
    let text = if present == 1 {
        Some(String::from_utf8(bytes[9..].to_vec()).map_err(|_| err())?)
    } else {
        None
    };
    Ok(TextRecord {
        text,
        last_modified: UNIX_EPOCH + Duration::from_secs(seconds),
    })
}

fn encode_view(record: &ViewRecord) -> Vec<u8> {
    let mut out = Vec::new();
    for field in [
        record.shadow_client_version,
        record.shadow_server_version,
        record.backup_shadow_server_version,
    ] {
        out.extend_from_slice(&field.to_be_bytes());
    }
    for text in [&record.shadow, &record.backup_shadow] {
        let bytes = text.as_bytes();
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(bytes);
    }
    out.extend_from_slice(&encode_edit_stack(&record.edit_stack));
    out
}

fn decode_view(bytes: &[u8]) -> Result<ViewRecord, StoreError> {
    let err = || StoreError::Corrupt("view record".to_string());
    let read_u64 = |bytes: &[u8], cursor: &mut usize| -> Result<u64, StoreError> {
        let slice = bytes.get(*cursor..*cursor + 8).ok_or_else(err)?;
        *cursor += 8;
        Ok(u64::from_be_bytes(slice.try_into().unwrap()))
    };
    let mut cursor = 0usize;
    let shadow_client_version = read_u64(bytes, &mut cursor)?;
    let shadow_server_version = read_u64(bytes, &mut cursor)?;
    let backup_shadow_server_version = read_u64(bytes, &mut cursor)?;

    let read_string = |bytes: &[u8], cursor: &mut usize| -> Result<String, StoreError> {
        let len_slice = bytes.get(*cursor..*cursor + 4).ok_or_else(err)?;
        let len = u32::from_be_bytes(len_slice.try_into().unwrap()) as usize;
        *cursor += 4;
        let str_slice = bytes.get(*cursor..*cursor + len).ok_or_else(err)?;
        *cursor += len;
        String::from_utf8(str_slice.to_vec()).map_err(|_| err())
    };
    let shadow = read_string(bytes, &mut cursor)?;
    let backup_shadow = read_string(bytes, &mut cursor)?;
    let edit_stack = decode_edit_stack(&bytes[cursor..])?;

    Ok(ViewRecord {
        shadow,
        backup_shadow,
        shadow_client_version,
        shadow_server_version,
        backup_shadow_server_version,
        edit_stack,
    })
}

fn encode_buffer(record: &BufferRecord) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(record.size as u32).to_be_bytes());
    for slot in &record.slots {
        match slot {
            Some(text) => {
                out.push(1);
                let bytes = text.as_bytes();
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            None => out.push(0),
        }
    }
    out
}

fn decode_buffer(bytes: &[u8]) -> Result<BufferRecord, StoreError> {
    let err = || StoreError::Corrupt("buffer record".to_string());
    let size = u32::from_be_bytes(bytes.get(0..4).ok_or_else(err)?.try_into().unwrap()) as usize;
    let mut cursor = 4usize;
    let mut slots = Vec::with_capacity(size);
    for _ in 0..size {
        let present = *bytes.get(cursor).ok_or_else(err)?;
        cursor += 1;
        if present == 1 {
            let len = u32::from_be_bytes(bytes.get(cursor..cursor + 4).ok_or_else(err)?.try_into().unwrap()) as usize;
            cursor += 4;
            let str_slice = bytes.get(cursor..cursor + len).ok_or_else(err)?;
            cursor += len;
            slots.push(Some(String::from_utf8(str_slice.to_vec()).map_err(|_| err())?));
        } else {
            slots.push(None);
        }
    }
    Ok(BufferRecord { size, slots })
}

fn backend_err(err: sled::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl Store for KvStore {
    fn save_text(&self, name: &str, record: &TextRecord) -> Result<(), StoreError> {
        self.texts
            .insert(name.as_bytes(), encode_text(record))
            .map_err(backend_err)?;
        Ok(())
    }

    fn load_text(&self, name: &str) -> Result<Option<TextRecord>, StoreError> {
        self.texts
            .get(name.as_bytes())
            .map_err(backend_err)?
            .map(|bytes| decode_text(&bytes))
            .transpose()
    }

    fn delete_text(&self, name: &str) -> Result<(), StoreError> {
        self.texts.remove(name.as_bytes()).map_err(backend_err)?;
        Ok(())
    }

    fn save_view(&self, username: &str, doc_name: &str, record: &ViewRecord) -> Result<(), StoreError> {
        self.views
            .insert(Self::view_key(username, doc_name), encode_view(record))
            .map_err(backend_err)?;
        Ok(())
    }

    fn load_view(&self, username: &str, doc_name: &str) -> Result<Option<ViewRecord>, StoreError> {
        self.views
            .get(Self::view_key(username, doc_name))
            .map_err(backend_err)?
            .map(|bytes| decode_view(&bytes))
            .transpose()
    }

    fn delete_view(&self, username: &str, doc_name: &str) -> Result<(), StoreError> {
        self.views.remove(Self::view_key(username, doc_name)).map_err(backend_err)?;
        Ok(())
    }

    fn save_buffer(&self, name: &str, record: &BufferRecord) -> Result<(), StoreError> {
        self.buffers
            .insert(Self::buffer_key(name, record.size), encode_buffer(record))
            .map_err(backend_err)?;
        Ok(())
    }

    fn load_buffer(&self, name: &str, size: usize) -> Result<Option<BufferRecord>, StoreError> {
        self.buffers
            .get(Self::buffer_key(name, size))
            .map_err(backend_err)?
            .map(|bytes| decode_buffer(&bytes))
            .transpose()
    }

    fn delete_buffer(&self, name: &str, size: usize) -> Result<(), StoreError> {
        self.buffers.remove(Self::buffer_key(name, size)).map_err(backend_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_text_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        let record = TextRecord {
            text: Some("Hello".to_string()),
            last_modified: SystemTime::now(),
        };
        store.save_text("doc", &record).unwrap();
        assert_eq!(store.load_text("doc").unwrap().unwrap().text, record.text);
    }

    #[test]
    fn round_trips_a_view_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        let record = ViewRecord {
            shadow: "Hello".to_string(),
            backup_shadow: String::new(),
            shadow_client_version: 1,
            shadow_server_version: 2,
            backup_shadow_server_version: 1,
            edit_stack: Vec::new(),
        };
        store.save_view("alice", "doc", &record).unwrap();
        assert_eq!(store.load_view("alice", "doc").unwrap(), Some(record));
    }

    #[test]
    fn missing_buffer_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        assert_eq!(store.load_buffer("x", 2).unwrap(), None);
    }
}
