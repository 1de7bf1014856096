//! Error categorization for the parser, registries, and persistence layer.
//!
//! No error here is fatal to the daemon process: a [`ParseWarning`] means a
//! line was skipped, a [`RegistryError`] means the request is answered with
//! an empty response (the client will retry), and a [`StoreError`] is logged
//! by the backend but never unwinds into the sync engine, since persistence
//! is a side effect of processing a request, not a precondition for it.

/// Non-fatal problems encountered while tokenizing a client request.
///
/// Every variant causes the offending line to be skipped; parsing continues
/// with the next line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseWarning {
    /// A line lacked the `C:` shape expected of every command.
    #[error("malformed line: {0:?}")]
    MalformedLine(String),
    /// A version-bearing command's `V:` prefix was missing or non-numeric.
    #[error("bad version prefix in line: {0:?}")]
    BadVersion(String),
    /// A `b:`/`B:` buffer line referenced a slot outside `[1, size]`.
    #[error("buffer slot {index} out of range for size {size}")]
    BufferSlotOutOfRange {
        /// The 1-based index supplied on the wire.
        index: usize,
        /// The buffer's declared slot count.
        size: usize,
    },
    /// The request was not terminated by a blank line.
    #[error("request truncated: missing blank-line terminator")]
    TransportTruncated,
}

/// Problems surfaced by the text/view/buffer registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// `MAX_VIEWS` was exceeded; the caller should answer with an empty
    /// response so the client retries, which looks like ordinary network
    /// loss from the wire's perspective.
    #[error("view registry is at capacity")]
    Overloaded,
}

/// Problems surfaced by a [`crate::store`] backend.
///
/// Persistence failures never interrupt a request; the caller logs the
/// error (via `tracing`, when the `tracing` feature is enabled) and
/// continues serving from in-memory state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend's underlying I/O failed.
    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored record could not be decoded.
    #[error("corrupt persisted record for {0:?}")]
    Corrupt(String),
    /// The embedded key-value backend reported an error.
    #[error("key-value backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_mention_offending_content() {
        let warning = ParseWarning::BadVersion("d:xx:hello".to_string());
        assert!(warning.to_string().contains("d:xx:hello"));

        let slot = ParseWarning::BufferSlotOutOfRange { index: 5, size: 3 };
        assert!(slot.to_string().contains('5'));
        assert!(slot.to_string().contains('3'));
    }
}
