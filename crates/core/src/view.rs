//! The per-(user, document) session registry (§3 "View (Session)", §4.4).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::RegistryError;

/// One pending, not-yet-acknowledged outbound delta or raw dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditStackEntry {
    /// The server version this entry was emitted at.
    pub server_version: u64,
    /// The full raw wire line (e.g. `"d:3:=5\n"`), ready for retransmission.
    pub raw_line: String,
}

/// A user's view of one document: the two-shadow state DifSync needs to
/// reconcile concurrent edits.
pub struct View {
    username: Arc<str>,
    doc_name: Arc<str>,
    state: Mutex<ViewState>,
}

struct ViewState {
    shadow: String,
    backup_shadow: String,
    shadow_client_version: u64,
    shadow_server_version: u64,
    backup_shadow_server_version: u64,
    edit_stack: Vec<EditStackEntry>,
    last_touched: Instant,
}

/// A snapshot of [`View`]'s mutable state, returned to callers that need to
/// read or update several fields atomically.
pub struct ViewGuard<'a> {
    username: Arc<str>,
    doc_name: Arc<str>,
    state: std::sync::MutexGuard<'a, ViewState>,
}

impl View {
    fn new(username: Arc<str>, doc_name: Arc<str>) -> Self {
        Self {
            username,
            doc_name,
            state: Mutex::new(ViewState {
                shadow: String::new(),
                backup_shadow: String::new(),
                shadow_client_version: 0,
                shadow_server_version: 0,
                backup_shadow_server_version: 0,
                edit_stack: Vec::new(),
                last_touched: Instant::now(),
            }),
        }
    }

    /// Builds a view from a persisted [`ViewRecord`], for [`crate::store`]
    /// backends reloading state after a restart.
    pub fn from_record(username: Arc<str>, doc_name: Arc<str>, record: ViewRecord) -> Self {
        Self {
            username,
            doc_name,
            state: Mutex::new(ViewState {
                shadow: record.shadow,
                backup_shadow: record.backup_shadow,
                shadow_client_version: record.shadow_client_version,
                shadow_server_version: record.shadow_server_version,
                backup_shadow_server_version: record.backup_shadow_server_version,
                edit_stack: record.edit_stack,
                last_touched: Instant::now(),
            }),
        }
    }

    /// The user this view belongs to.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The document this view tracks.
    pub fn doc_name(&self) -> &str {
        &self.doc_name
    }

    /// Locks the view's mutable state for the duration of a request's work
    /// on it — the per-view lock from §5 that serializes two parallel
    /// requests on the same session and blocks the reaper mid-use.
    pub fn lock(&self) -> ViewGuard<'_> {
        let mut state = self.state.lock().expect("view lock poisoned");
        state.last_touched = Instant::now();
        ViewGuard {
            username: self.username.clone(),
            doc_name: self.doc_name.clone(),
            state,
        }
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        self.state
            .lock()
            .expect("view lock poisoned")
            .last_touched
            .elapsed()
            > timeout
    }
}

impl ViewGuard<'_> {
    /// The user this view belongs to.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The document this view tracks.
    pub fn doc_name(&self) -> &str {
        &self.doc_name
    }

    /// The server's belief of what the client last saw.
    pub fn shadow(&self) -> &str {
        &self.state.shadow
    }

    /// The client-side sequence number for `shadow`.
    pub fn shadow_client_version(&self) -> u64 {
        self.state.shadow_client_version
    }

    /// The server-side sequence number for `shadow`.
    pub fn shadow_server_version(&self) -> u64 {
        self.state.shadow_server_version
    }

    /// The server version at which `backup_shadow` was promoted.
    pub fn backup_shadow_server_version(&self) -> u64 {
        self.state.backup_shadow_server_version
    }

    /// The unacknowledged outbound deltas, oldest first.
    pub fn edit_stack(&self) -> &[EditStackEntry] {
        &self.state.edit_stack
    }

    /// Rolls the view back to its backup shadow (§4.2 step 3): the prior
    /// server→client response was lost, so the client is still looking at
    /// what `backup_shadow` describes.
    pub fn rollback_to_backup(&mut self) {
        self.state.shadow = self.state.backup_shadow.clone();
        self.state.shadow_server_version = self.state.backup_shadow_server_version;
        self.state.edit_stack.clear();
    }

    /// Removes every edit-stack entry with `server_version <= acked`
    /// (§4.2 step 4). Idempotent: calling it again with the same or a lower
    /// version is a no-op.
    pub fn prune_acked(&mut self, acked: u64) {
        self.state
            .edit_stack
            .retain(|entry| entry.server_version > acked);
    }

    /// Unconditionally resets the view from a raw payload (§4.2 step 5):
    /// the authoritative resync path.
    pub fn reset_from_raw(&mut self, data: String, client_version: u64, server_version: u64) {
        self.state.shadow = data;
        self.state.shadow_client_version = client_version;
        self.state.shadow_server_version = server_version;
        self.state.backup_shadow = self.state.shadow.clone();
        self.state.backup_shadow_server_version = server_version;
        self.state.edit_stack.clear();
    }

    /// Applies the result of successfully expanding a client delta
    /// (§4.2 step 6, "newer semantics": shadow first, then promote backup).
    pub fn apply_delta_post_image(&mut self, new_shadow: String) {
        self.state.shadow_client_version += 1;
        self.state.shadow = new_shadow;
        self.state.backup_shadow = self.state.shadow.clone();
        self.state.backup_shadow_server_version = self.state.shadow_server_version;
    }

    /// Pushes a new outbound entry and advances the server version
    /// (§4.3 step 5, the `delta_ok` path).
    pub fn push_outbound(&mut self, raw_line: String) {
        let server_version = self.state.shadow_server_version;
        self.state.edit_stack.push(EditStackEntry {
            server_version,
            raw_line,
        });
        self.state.shadow_server_version += 1;
    }

    /// Pushes the raw-dump fallback entry without advancing the server
    /// version (§4.3 step 6: the client already knows this version, since
    /// nothing delta-shaped could be sent).
    pub fn push_raw_dump(&mut self, raw_line: String) {
        let server_version = self.state.shadow_server_version;
        self.state.edit_stack.push(EditStackEntry {
            server_version,
            raw_line,
        });
    }

    /// Advances the client version without pushing an edit-stack entry
    /// (§4.3 step 6, the raw-dump fallback path still bumps the client
    /// version it expects back).
    pub fn bump_client_version(&mut self) {
        self.state.shadow_client_version += 1;
    }

    /// Aligns the shadow with the text just conveyed to the client
    /// (§4.3 step 7).
    pub fn align_shadow(&mut self, text: String) {
        self.state.shadow = text;
    }

    /// Restores a view's state from a persisted record (used by
    /// [`crate::store`] backends when reloading after a restart).
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        &mut self,
        shadow: String,
        backup_shadow: String,
        shadow_client_version: u64,
        shadow_server_version: u64,
        backup_shadow_server_version: u64,
        edit_stack: Vec<EditStackEntry>,
    ) {
        self.state.shadow = shadow;
        self.state.backup_shadow = backup_shadow;
        self.state.shadow_client_version = shadow_client_version;
        self.state.shadow_server_version = shadow_server_version;
        self.state.backup_shadow_server_version = backup_shadow_server_version;
        self.state.edit_stack = edit_stack;
    }

    /// Copies the current state out as an owned, serializable snapshot for
    /// a [`crate::store`] backend.
    pub fn snapshot(&self) -> ViewRecord {
        ViewRecord {
            shadow: self.state.shadow.clone(),
            backup_shadow: self.state.backup_shadow.clone(),
            shadow_client_version: self.state.shadow_client_version,
            shadow_server_version: self.state.shadow_server_version,
            backup_shadow_server_version: self.state.backup_shadow_server_version,
            edit_stack: self.state.edit_stack.clone(),
        }
    }
}

/// An owned, serializable copy of a view's state, used by [`crate::store`]
/// backends to persist and reload sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRecord {
    /// The server's belief of what the client last saw.
    pub shadow: String,
    /// The prior shadow, kept to recover from one lost response.
    pub backup_shadow: String,
    /// The client-side sequence number for `shadow`.
    pub shadow_client_version: u64,
    /// The server-side sequence number for `shadow`.
    pub shadow_server_version: u64,
    /// The server version at which `backup_shadow` was promoted.
    pub backup_shadow_server_version: u64,
    /// Unacknowledged outbound deltas, oldest first.
    pub edit_stack: Vec<EditStackEntry>,
}

/// Key identifying a view: `(username, document name)`.
pub type ViewKey = (Arc<str>, Arc<str>);

/// Owns every (user, document) session. See [`View`] for the per-session
/// state and [`crate::text::TextRegistry`] for the document side.
pub struct ViewRegistry {
    views: DashMap<ViewKey, Arc<View>>,
    max_views: usize,
}

impl ViewRegistry {
    /// Creates a registry with the given `MAX_VIEWS` ceiling (`0` disables
    /// the cap).
    pub fn new(max_views: usize) -> Self {
        Self {
            views: DashMap::new(),
            max_views,
        }
    }

    /// Returns the view for `(username, doc_name)`, creating a fresh one
    /// (empty shadow, both versions zero) if it doesn't exist.
    ///
    /// Fails with [`RegistryError::Overloaded`] if creating a new view
    /// would exceed `MAX_VIEWS`; existing views are always returned
    /// regardless of the cap. The returned `bool` is `true` exactly when a
    /// new view was created, so the caller can attach the underlying text
    /// exactly once per session (there is a narrow race between two
    /// concurrent first-sight requests for the same key where both may
    /// observe `true`; the engine's extra attach in that case is harmless
    /// since the reaper only evicts a text once its refcount reaches zero).
    pub fn get_or_create(
        &self,
        username: &str,
        doc_name: &str,
    ) -> Result<(Arc<View>, bool), RegistryError> {
        let key: ViewKey = (Arc::from(username), Arc::from(doc_name));
        if let Some(existing) = self.views.get(&key) {
            return Ok((existing.clone(), false));
        }
        if self.max_views != 0 && self.views.len() >= self.max_views {
            return Err(RegistryError::Overloaded);
        }
        let view = self
            .views
            .entry(key.clone())
            .or_insert_with(|| Arc::new(View::new(key.0.clone(), key.1.clone())))
            .clone();
        Ok((view, true))
    }

    /// Inserts a view restored from persisted state, overwriting any
    /// existing entry for the same key. Used by [`crate::store`] backends
    /// when reloading after a restart.
    pub fn insert_restored(&self, view: Arc<View>) {
        let key: ViewKey = (view.username.clone(), view.doc_name.clone());
        self.views.insert(key, view);
    }

    /// Looks up an existing view without creating one.
    pub fn get(&self, username: &str, doc_name: &str) -> Option<Arc<View>> {
        self.views
            .get(&(Arc::from(username), Arc::from(doc_name)))
            .map(|entry| entry.clone())
    }

    /// Removes a view outright (the "nullify" and explicit-destroy paths).
    /// Returns the removed view, if any, so the caller can detach it from
    /// its text.
    pub fn remove(&self, username: &str, doc_name: &str) -> Option<Arc<View>> {
        self.views
            .remove(&(Arc::from(username), Arc::from(doc_name)))
            .map(|(_, view)| view)
    }

    /// Removes and returns every view idle beyond `timeout`.
    pub fn evict_idle(&self, timeout: Duration) -> Vec<Arc<View>> {
        let mut evicted = Vec::new();
        self.views.retain(|_, view| {
            let idle = view.is_idle(timeout);
            if idle {
                evicted.push(view.clone());
            }
            !idle
        });
        evicted
    }

    /// Number of tracked views.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Whether the registry currently tracks no views.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_view_starts_at_version_zero_with_empty_shadow() {
        let registry = ViewRegistry::new(0);
        let (view, created) = registry.get_or_create("alice", "doc").unwrap();
        assert!(created);
        let guard = view.lock();
        assert_eq!(guard.shadow(), "");
        assert_eq!(guard.shadow_client_version(), 0);
        assert_eq!(guard.shadow_server_version(), 0);
        assert!(guard.edit_stack().is_empty());
    }

    #[test]
    fn prune_acked_is_idempotent() {
        let registry = ViewRegistry::new(0);
        let (view, _) = registry.get_or_create("alice", "doc").unwrap();
        {
            let mut guard = view.lock();
            guard.push_outbound("d:0:=5\n".to_string());
            guard.push_outbound("d:1:=6\n".to_string());
        }
        let mut guard = view.lock();
        guard.prune_acked(0);
        assert_eq!(guard.edit_stack().len(), 1);
        guard.prune_acked(0);
        assert_eq!(guard.edit_stack().len(), 1);
    }

    #[test]
    fn rollback_restores_backup_shadow_and_clears_stack() {
        let registry = ViewRegistry::new(0);
        let (view, _) = registry.get_or_create("alice", "doc").unwrap();
        let mut guard = view.lock();
        guard.reset_from_raw("Hello".to_string(), 0, 0);
        guard.push_outbound("d:0:=5\n".to_string());
        guard.rollback_to_backup();
        assert_eq!(guard.shadow(), "Hello");
        assert_eq!(guard.shadow_server_version(), 0);
        assert!(guard.edit_stack().is_empty());
    }

    #[test]
    fn max_views_cap_rejects_new_sessions_but_not_existing_ones() {
        let registry = ViewRegistry::new(1);
        registry.get_or_create("alice", "doc").unwrap();
        assert!(registry.get_or_create("alice", "doc").is_ok());
        assert!(matches!(
            registry.get_or_create("bob", "doc"),
            Err(RegistryError::Overloaded)
        ));
    }
}
