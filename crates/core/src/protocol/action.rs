//! The action record the parser produces, one per `n:`/`d:`/`r:` line.

use std::sync::Arc;

/// What kind of state change an [`Action`] asks the sync engine to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    /// Apply a compact diff against the view's shadow.
    Delta,
    /// Unconditionally reset the view (and possibly the master text) from a
    /// full-text payload.
    Raw,
    /// Erase the named document and destroy the session.
    Null,
}

/// One tokenized instruction from a client request, already resolved against
/// whatever `u:`/`f:` lines preceded it.
#[derive(Debug, Clone)]
pub struct Action {
    /// The user this action is attributed to.
    pub username: Arc<str>,
    /// The document this action targets.
    pub filename: Arc<str>,
    /// What kind of change this action describes.
    pub mode: ActionMode,
    /// Whether the command letter was uppercase: an authoritative overwrite
    /// for [`ActionMode::Raw`]/[`ActionMode::Delta`], unused for
    /// [`ActionMode::Null`].
    pub force: bool,
    /// The server version in scope when this action was sent (from the most
    /// recent `f:`/`F:` line).
    pub server_version: u64,
    /// The client version carried on a `d:`/`r:` line; `0` for
    /// [`ActionMode::Null`].
    pub client_version: u64,
    /// The delta or raw payload, still in wire encoding.
    pub data: String,
}
