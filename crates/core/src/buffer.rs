//! The multi-slot buffer registry (§3 "Buffer", §4.5) used to reassemble
//! oversized client requests sent as fragments.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::ParseWarning;

/// Key identifying a buffer: the logical name plus the declared slot count.
/// Two fragments only combine if both agree on `size`.
pub type BufferKey = (Arc<str>, usize);

struct BufferState {
    slots: Vec<Option<String>>,
    last_touched: Instant,
}

/// A fixed-size, at-most-once-written array of string slots.
pub struct Buffer {
    state: Mutex<BufferState>,
}

impl Buffer {
    fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                slots: vec![None; size],
                last_touched: Instant::now(),
            }),
        }
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        self.state.lock().expect("buffer lock poisoned").last_touched.elapsed() > timeout
    }
}

/// Outcome of writing one fragment into a buffer.
pub enum FragmentOutcome {
    /// The buffer still has empty slots.
    Incomplete,
    /// Every slot is now filled; the buffer has been consumed and its
    /// slots, concatenated in order, are returned.
    Complete(String),
}

/// Reassembles fragmented requests. See [`BufferRegistry::accept_fragment`].
#[derive(Default)]
pub struct BufferRegistry {
    buffers: DashMap<BufferKey, Arc<Buffer>>,
}

impl BufferRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one fragment into the buffer named `(name, size)`, creating
    /// it if this is the first fragment seen for that key.
    ///
    /// `index` is 1-based on the wire; out-of-range indices are rejected
    /// without mutating the buffer. Once every slot is filled the buffer is
    /// removed from the registry and its concatenation is returned,
    /// matching "the buffer is destroyed on completion (consumed)".
    pub fn accept_fragment(
        &self,
        name: &str,
        size: usize,
        index: usize,
        text: &str,
    ) -> Result<FragmentOutcome, ParseWarning> {
        if index == 0 || index > size {
            return Err(ParseWarning::BufferSlotOutOfRange { index, size });
        }

        let key: BufferKey = (Arc::from(name), size);
        let buffer = self
            .buffers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Buffer::new(size)))
            .clone();

        let complete = {
            let mut state = buffer.state.lock().expect("buffer lock poisoned");
            state.slots[index - 1] = Some(text.to_string());
            state.last_touched = Instant::now();
            state.slots.iter().all(Option::is_some)
        };

        if complete {
            self.buffers.remove(&key);
            let state = buffer.state.lock().expect("buffer lock poisoned");
            let assembled: String = state
                .slots
                .iter()
                .map(|slot| slot.as_deref().unwrap_or_default())
                .collect();
            Ok(FragmentOutcome::Complete(assembled))
        } else {
            Ok(FragmentOutcome::Incomplete)
        }
    }

    /// Removes and returns the number of buffers idle beyond `timeout`.
    pub fn evict_idle(&self, timeout: Duration) -> usize {
        let mut evicted = 0;
        self.buffers.retain(|_, buffer| {
            let idle = buffer.is_idle(timeout);
            if idle {
                evicted += 1;
            }
            !idle
        });
        evicted
    }

    /// Number of incomplete buffers currently tracked.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the registry currently tracks no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
