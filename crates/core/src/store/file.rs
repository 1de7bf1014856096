//! File-per-document persistence backend (`file-backend` feature).
//!
//! Each text, view, and buffer is stored as one file under a configured
//! base directory, named from a filesystem-safe percent-encoding of its
//! key so document/user names containing `/` or other reserved characters
//! can't escape the directory or collide.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::StoreError;
use crate::store::{decode_edit_stack, encode_edit_stack, BufferRecord, Store, TextRecord};
use crate::view::ViewRecord;

/// Percent-encodes a key component so it's safe as a single path segment.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.as_bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(*byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Persists each text/view/buffer as a file under `base_dir/texts`,
/// `base_dir/views`, and `base_dir/buffers` respectively.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if necessary) a file-backed store rooted at
    /// `base_dir`.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        for sub in ["texts", "views", "buffers"] {
            fs::create_dir_all(base_dir.join(sub))?;
        }
        Ok(Self { base_dir })
    }

    fn text_path(&self, name: &str) -> PathBuf {
        self.base_dir.join("texts").join(encode_component(name))
    }

    fn view_path(&self, username: &str, doc_name: &str) -> PathBuf {
        self.base_dir
            .join("views")
            .join(format!("{}.{}", encode_component(username), encode_component(doc_name)))
    }

    fn buffer_path(&self, name: &str, size: usize) -> PathBuf {
        self.base_dir
            .join("buffers")
            .join(format!("{}.{size}", encode_component(name)))
    }
}

/// `NUL` byte preceding the text payload toggles "text is present" vs
/// "nullified"; everything up to it is a little-endian `u64` timestamp
/// (seconds since epoch).
fn encode_text_record(record: &TextRecord) -> Vec<u8> {
    let seconds = record
        .last_modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let mut out = seconds.to_le_bytes().to_vec();
    match &record.text {
        Some(text) => {
            out.push(1);
            out.extend_from_slice(text.as_bytes());
        }
        None => out.push(0),
    }
    out
}

fn decode_text_record(bytes: &[u8], name: &str) -> Result<TextRecord, StoreError> {
    let seconds_bytes = bytes
        .get(0..8)
        .ok_or_else(|| StoreError::Corrupt(name.to_string()))?;
    let seconds = u64::from_le_bytes(seconds_bytes.try_into().unwrap());
    let last_modified = UNIX_EPOCH + Duration::from_secs(seconds);
    let present = *bytes.get(8).ok_or_else(|| StoreError::Corrupt(name.to_string()))?;
    let text = if present == 1 {
        Some(
            String::from_utf8(bytes[9..].to_vec())
                .map_err(|_| StoreError::Corrupt(name.to_string()))?,
        )
    } else {
        None
    };
    Ok(TextRecord { text, last_modified })
}

fn encode_view_record(record: &ViewRecord) -> Vec<u8> {
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

fn decode_view_record(bytes: &[u8], key: &str) -> Result<ViewRecord, StoreError> {
    let err = || StoreError::Corrupt(key.to_string());
    let mut cursor = 0usize;
    let mut read_u64 = |bytes: &[u8], cursor: &mut usize| -> Result<u64, StoreError> {
        let slice = bytes.get(*cursor..*cursor + 8).ok_or_else(err)?;
        *cursor += 8;
        Ok(u64::from_be_bytes(slice.try_into().unwrap()))
    };
    let shadow_client_version = read_u64(bytes, &mut cursor)?;
    let shadow_server_version = read_u64(bytes, &mut cursor)?;
    let backup_shadow_server_version = read_u64(bytes, &mut cursor)?;

    let mut read_string = |bytes: &[u8], cursor: &mut usize| -> Result<String, StoreError> {
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

fn encode_buffer_record(record: &BufferRecord) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(record.size as u32).to_be_bytes());
    for slot in &record.slots {
        match slot {
            Some(text) => {
                let bytes = text.as_bytes();
                out.push(1);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            None => out.push(0),
        }
    }
    out
}

fn decode_buffer_record(bytes: &[u8], key: &str) -> Result<BufferRecord, StoreError> {
    let err = || StoreError::Corrupt(key.to_string());
    let size_slice = bytes.get(0..4).ok_or_else(err)?;
    let size = u32::from_be_bytes(size_slice.try_into().unwrap()) as usize;
    let mut cursor = 4usize;
    let mut slots = Vec::with_capacity(size);
    for _ in 0..size {
        let present = *bytes.get(cursor).ok_or_else(err)?;
        cursor += 1;
        if present == 1 {
            let len_slice = bytes.get(cursor..cursor + 4).ok_or_else(err)?;
            let len = u32::from_be_bytes(len_slice.try_into().unwrap()) as usize;
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

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

impl Store for FileStore {
    fn save_text(&self, name: &str, record: &TextRecord) -> Result<(), StoreError> {
        fs::write(self.text_path(name), encode_text_record(record))?;
        Ok(())
    }

    fn load_text(&self, name: &str) -> Result<Option<TextRecord>, StoreError> {
        read_optional(&self.text_path(name))?
            .map(|bytes| decode_text_record(&bytes, name))
            .transpose()
    }

    fn delete_text(&self, name: &str) -> Result<(), StoreError> {
        remove_if_present(&self.text_path(name))
    }

    fn save_view(&self, username: &str, doc_name: &str, record: &ViewRecord) -> Result<(), StoreError> {
        fs::write(self.view_path(username, doc_name), encode_view_record(record))?;
        Ok(())
    }

    fn load_view(&self, username: &str, doc_name: &str) -> Result<Option<ViewRecord>, StoreError> {
        read_optional(&self.view_path(username, doc_name))?
            .map(|bytes| decode_view_record(&bytes, doc_name))
            .transpose()
    }

    fn delete_view(&self, username: &str, doc_name: &str) -> Result<(), StoreError> {
        remove_if_present(&self.view_path(username, doc_name))
    }

    fn save_buffer(&self, name: &str, record: &BufferRecord) -> Result<(), StoreError> {
        fs::write(self.buffer_path(name, record.size), encode_buffer_record(record))?;
        Ok(())
    }

    fn load_buffer(&self, name: &str, size: usize) -> Result<Option<BufferRecord>, StoreError> {
        read_optional(&self.buffer_path(name, size))?
            .map(|bytes| decode_buffer_record(&bytes, name))
            .transpose()
    }

    fn delete_buffer(&self, name: &str, size: usize) -> Result<(), StoreError> {
        remove_if_present(&self.buffer_path(name, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::EditStackEntry;

    #[test]
    fn round_trips_a_text_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = TextRecord {
            text: Some("Hello\nworld".to_string()),
            last_modified: SystemTime::now(),
        };
        store.save_text("doc", &record).unwrap();
        let loaded = store.load_text("doc").unwrap().unwrap();
        assert_eq!(loaded.text, record.text);
    }

    #[test]
    fn round_trips_a_nullified_text_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = TextRecord {
            text: None,
            last_modified: SystemTime::now(),
        };
        store.save_text("doc", &record).unwrap();
        assert_eq!(store.load_text("doc").unwrap().unwrap().text, None);
    }

    #[test]
    fn round_trips_a_view_record_with_an_edit_stack_containing_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = ViewRecord {
            shadow: "Hello".to_string(),
            backup_shadow: "Hell".to_string(),
            shadow_client_version: 3,
            shadow_server_version: 5,
            backup_shadow_server_version: 4,
            edit_stack: vec![EditStackEntry {
                server_version: 5,
                raw_line: "R:5:embedded\nnewline\n".to_string(),
            }],
        };
        store.save_view("alice", "doc", &record).unwrap();
        assert_eq!(store.load_view("alice", "doc").unwrap(), Some(record));
    }

    #[test]
    fn missing_records_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.load_text("doc").unwrap(), None);
        assert_eq!(store.load_view("alice", "doc").unwrap(), None);
        assert_eq!(store.load_buffer("x", 2).unwrap(), None);
    }

    #[test]
    fn delete_then_load_round_trips_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = BufferRecord {
            size: 2,
            slots: vec![Some("a".to_string()), None],
        };
        store.save_buffer("x", &record).unwrap();
        store.delete_buffer("x", 2).unwrap();
        assert_eq!(store.load_buffer("x", 2).unwrap(), None);
    }

    #[test]
    fn document_names_with_path_separators_do_not_escape_the_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let record = TextRecord {
            text: Some("evil".to_string()),
            last_modified: SystemTime::now(),
        };
        store.save_text("../../etc/passwd", &record).unwrap();
        let escaped = dir.path().join("../../etc/passwd");
        assert!(!escaped.exists());
    }
}
