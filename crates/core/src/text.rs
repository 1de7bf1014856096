//! The master text registry (§3 "Document (Text)", §4.4).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// A single named shared document and the state the sync engine needs to
/// mutate it safely under concurrent requests.
///
/// `text` is `None` when the document is "unknown/deleted" (§3): freshly
/// created, or explicitly nullified. [`TextRegistry::attach`]/`detach`
/// track the reference count of views that currently name this text so the
/// reaper never evicts a text a live view still points at.
pub struct Text {
    name: Arc<str>,
    content: RwLock<Option<String>>,
    last_modified: RwLock<Instant>,
    refcount: AtomicUsize,
    dirty: std::sync::atomic::AtomicBool,
}

impl Text {
    fn new(name: Arc<str>) -> Self {
        Self {
            name,
            content: RwLock::new(None),
            last_modified: RwLock::new(Instant::now()),
            refcount: AtomicUsize::new(0),
            dirty: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// The document's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a clone of the current master text, or `None` if unknown.
    pub fn get(&self) -> Option<String> {
        self.content.read().expect("text lock poisoned").clone()
    }

    /// Replaces the master text, normalizing line endings to `\n` and, when
    /// `max_chars > 0`, truncating to the most recent `max_chars` — the
    /// *tail* is retained, per the invariant in §3.
    pub fn set_text(&self, new_text: &str, max_chars: usize) {
        self.update(max_chars, |_current| Some(new_text.to_string()));
    }

    /// Atomically reads the current master text and decides its replacement
    /// under a single write-lock acquisition, so two concurrent requests
    /// mutating the same document (§5: "two requests simultaneously
    /// touching … the same document from different users") can't race a
    /// read against another's write in between. `f` returns `None` to leave
    /// the text unchanged.
    pub fn update<F>(&self, max_chars: usize, f: F)
    where
        F: FnOnce(Option<&str>) -> Option<String>,
    {
        let mut guard = self.content.write().expect("text lock poisoned");
        let Some(new_text) = f(guard.as_deref()) else {
            return;
        };
        let mut normalized = normalize_line_endings(&new_text);
        if max_chars != 0 && normalized.chars().count() > max_chars {
            let char_count = normalized.chars().count();
            let skip = char_count - max_chars;
            normalized = normalized.chars().skip(skip).collect();
        }
        if guard.as_deref() != Some(normalized.as_str()) {
            self.dirty.store(true, Ordering::Relaxed);
            *guard = Some(normalized);
        }
        *self.last_modified.write().expect("text lock poisoned") = Instant::now();
    }

    /// Erases the master text, transitioning it back to "unknown/deleted".
    pub fn nullify(&self) {
        *self.content.write().expect("text lock poisoned") = None;
        *self.last_modified.write().expect("text lock poisoned") = Instant::now();
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Whether the content has changed since the last time it was persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Clears the dirty flag; called by a persistence backend after saving.
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Relaxed);
    }

    fn attach(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    fn detach(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    /// Number of views currently attached to this text.
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Whether this text has been idle (unmodified) beyond `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_modified.read().expect("text lock poisoned").elapsed() > timeout
    }
}

fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            other => out.push(other),
        }
    }
    out
}

/// Owns the single [`Text`] entity per document name and tracks how many
/// views are attached to it.
///
/// Creation and lookup are synchronized by [`DashMap`]'s internal sharded
/// locking (the "map lock, then per-entity lock" discipline from §5,
/// collapsed into one data structure); mutation of a [`Text`]'s content is
/// then serialized by that `Text`'s own interior `RwLock`.
#[derive(Default)]
pub struct TextRegistry {
    texts: DashMap<Arc<str>, Arc<Text>>,
}

impl TextRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the text named `name`, creating it (with no content) if it
    /// doesn't exist yet.
    pub fn get_or_create(&self, name: &str) -> Arc<Text> {
        self.texts
            .entry(Arc::from(name))
            .or_insert_with_key(|key| Arc::new(Text::new(key.clone())))
            .clone()
    }

    /// Looks up a text without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<Text>> {
        self.texts.get(name).map(|entry| entry.clone())
    }

    /// Increments `text`'s reference count; call once per view that now
    /// names this document.
    pub fn attach(&self, text: &Text) {
        text.attach();
    }

    /// Decrements `text`'s reference count; call once per view that no
    /// longer names this document.
    pub fn detach(&self, text: &Text) {
        text.detach();
    }

    /// Removes every text with zero attached views that has been idle
    /// beyond `timeout`. Returns the number of texts evicted.
    pub fn evict_idle(&self, timeout: Duration) -> usize {
        let mut evicted = 0;
        self.texts.retain(|_, text| {
            let keep = text.refcount() > 0 || !text.is_idle(timeout);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Number of tracked texts.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// Whether the registry currently tracks no texts.
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}
