//! Recognized configuration keys shared by the engine and its registries.

use std::time::Duration;

/// Tuning knobs consumed by the sync engine and the registries it drives.
///
/// Field names match the configuration keys in the wire-protocol
/// specification; the daemon crate's CLI/config-file loader produces one of
/// these before constructing a [`crate::engine::SyncEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum length of a stored document, in `char`s. `0` means unlimited.
    /// When exceeded, the tail of the text is retained.
    pub max_chars: usize,
    /// Maximum number of concurrently tracked views. `0` means unlimited.
    pub max_views: usize,
    /// A view is evicted once idle beyond this duration.
    pub timeout_view: Duration,
    /// A text is evicted once idle beyond this duration and no view
    /// references it.
    pub timeout_text: Duration,
    /// An incomplete buffer is evicted once idle beyond this duration.
    pub timeout_buffer: Duration,
    /// Idle-read timeout for the Telnet-style stream transport.
    pub timeout_telnet: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_chars: 0,
            max_views: 1000,
            timeout_view: Duration::from_secs(30 * 60),
            timeout_text: Duration::from_secs(60 * 60),
            timeout_buffer: Duration::from_secs(15 * 60),
            timeout_telnet: Duration::from_secs(2),
        }
    }
}
