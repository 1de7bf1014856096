//! The sync engine (§4.2, §4.3): walks a parsed action list, mutating the
//! view/text registries per the DifSync rules, and assembles the response.
//!
//! Processing an action happens in the order the specification lists:
//!
//! 1. fetch or create the (user, document) view, attaching its text;
//! 2. a `Null` action nullifies the text and destroys the view, then the
//!    loop continues without touching the rest of these steps;
//! 3. backup rollback, if the action's server version matches the backup's;
//! 4. ack-prune the edit stack up to the action's server version;
//! 5. a `Raw` action unconditionally resets the view from the payload;
//! 6. a `Delta` action is guarded by version checks before being expanded
//!    and merged into the master text.
//!
//! An outbound block is assembled once per contiguous run of actions
//! addressing the same (user, document) — see [`emit`].

mod emit;

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::BufferRegistry;
use crate::config::Config;
use crate::delta;
use crate::protocol::{self, Action, ActionMode};
use crate::text::TextRegistry;
use crate::view::{View, ViewRegistry};

/// Owns the three registries and drives [`Self::process_request`], the
/// single entry point a transport adapter needs.
pub struct SyncEngine {
    texts: TextRegistry,
    views: ViewRegistry,
    buffers: BufferRegistry,
    config: Config,
}

/// Per-group accumulator: the `delta_ok`/`force` flags §4.3 needs, carried
/// across however many actions land on the same (user, document) before the
/// next emission boundary.
struct GroupState {
    delta_ok: bool,
    force: bool,
    touched: bool,
}

impl Default for GroupState {
    /// `delta_ok` starts `true`: a freshly fetched view is assumed
    /// convergent until an action proves otherwise, matching the original's
    /// `delta_ok = True` at fetch time. A group whose only action is a
    /// duplicate delta (§7 `DuplicateDelta`, silently dropped) must leave
    /// this `true` so emission takes the empty-delta path, not the raw-dump
    /// fallback.
    fn default() -> Self {
        Self {
            delta_ok: true,
            force: false,
            touched: false,
        }
    }
}

impl SyncEngine {
    /// Builds an engine over fresh, empty registries.
    pub fn new(config: Config) -> Self {
        Self {
            texts: TextRegistry::new(),
            views: ViewRegistry::new(config.max_views),
            buffers: BufferRegistry::new(),
            config,
        }
    }

    /// The text registry, for a transport or store backend that needs to
    /// inspect or reload document state directly.
    pub fn texts(&self) -> &TextRegistry {
        &self.texts
    }

    /// The view registry, for the same reason.
    pub fn views(&self) -> &ViewRegistry {
        &self.views
    }

    /// The buffer registry, for the same reason.
    pub fn buffers(&self) -> &BufferRegistry {
        &self.buffers
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Processes one complete client request and returns the response to
    /// write back. Never fails: every error mode in §7 downgrades to an
    /// empty response, a skipped line, or a raw resync instead of
    /// propagating out of here.
    pub fn process_request(&self, raw: &str) -> String {
        let (actions, outcome) = match protocol::parse_request(raw, &self.buffers) {
            Ok(parsed) => parsed,
            Err(_truncated) => return String::new(),
        };

        if actions.is_empty() {
            return String::new();
        }

        let mut output = String::new();
        let mut last_emitted_username: Option<Arc<str>> = None;
        let mut last_emitted_filename: Option<Arc<str>> = None;

        let mut current_key: Option<(Arc<str>, Arc<str>)> = None;
        let mut current_view: Option<Arc<View>> = None;
        let mut group = GroupState::default();

        // Per-user cache of views already looked up this request, so a run
        // of contiguous actions on the same user doesn't re-query the view
        // registry for every action (§4.2 step 1/7).
        let mut cache_user: Option<Arc<str>> = None;
        let mut cache: HashMap<Arc<str>, Arc<View>> = HashMap::new();

        for (index, action) in actions.iter().enumerate() {
            let key = (action.username.clone(), action.filename.clone());

            if current_key.as_ref() != Some(&key) {
                if cache_user.as_deref() != Some(&*action.username) {
                    cache.clear();
                    cache_user = Some(action.username.clone());
                }
                let view = match cache.get(&action.filename) {
                    Some(view) => view.clone(),
                    None => match self.views.get_or_create(&action.username, &action.filename) {
                        Ok((view, created)) => {
                            if created {
                                let text = self.texts.get_or_create(&action.filename);
                                self.texts.attach(&text);
                            }
                            cache.insert(action.filename.clone(), view.clone());
                            view
                        }
                        Err(_overloaded) => return String::new(),
                    },
                };
                current_view = Some(view);
                current_key = Some(key);
                group = GroupState::default();
            }

            let view = current_view.as_ref().expect("just fetched above");
            let text = self.texts.get_or_create(&action.filename);

            if action.mode == ActionMode::Null {
                text.nullify();
                if let Some(removed) = self.views.remove(&action.username, &action.filename) {
                    debug_assert!(Arc::ptr_eq(&removed, view));
                    self.texts.detach(&text);
                }
                current_view = None;
                current_key = None;
                continue;
            }

            self.apply_rollback_and_prune(view, action);

            match action.mode {
                ActionMode::Raw => self.apply_raw(view, &text, action, &mut group),
                ActionMode::Delta => self.apply_delta(view, &text, action, &mut group),
                ActionMode::Null => unreachable!("handled above"),
            }

            let next_differs = actions
                .get(index + 1)
                .map(|next| (next.username.clone(), next.filename.clone()) != *current_key.as_ref().unwrap())
                .unwrap_or(true);

            if next_differs {
                if group.touched {
                    emit::build_outbound(
                        view,
                        &text,
                        emit::OutboundFlags {
                            echo_username: outcome.echo_username,
                            force: group.force,
                            delta_ok: group.delta_ok,
                        },
                        self.config.max_chars,
                        &mut output,
                        &mut last_emitted_username,
                        &mut last_emitted_filename,
                    );
                }
                let next_user_differs = actions
                    .get(index + 1)
                    .map(|next| next.username != action.username)
                    .unwrap_or(true);
                if next_user_differs {
                    cache.clear();
                    cache_user = None;
                }
                current_view = None;
                current_key = None;
            }
        }

        output
    }

    /// Steps 3 and 4: backup rollback, then ack-prune, applied before any
    /// action's type-specific handling.
    fn apply_rollback_and_prune(&self, view: &View, action: &Action) {
        let mut guard = view.lock();
        if action.server_version != guard.shadow_server_version()
            && action.server_version == guard.backup_shadow_server_version()
        {
            guard.rollback_to_backup();
        }
        guard.prune_acked(action.server_version);
    }

    /// Step 5: the raw resync path. Always succeeds, so `delta_ok` is
    /// unconditionally `true` afterward.
    fn apply_raw(&self, view: &View, text: &crate::text::Text, action: &Action, group: &mut GroupState) {
        let decoded = delta::unquote(&action.data).unwrap_or_else(|_| action.data.clone());

        {
            let mut guard = view.lock();
            guard.reset_from_raw(decoded.clone(), action.client_version, action.server_version);
        }

        let force = action.force;
        text.update(self.config.max_chars, |current| {
            (force || current.is_none()).then(|| decoded.clone())
        });

        group.delta_ok = true;
        group.force = force;
        group.touched = true;
    }

    /// Step 6: the delta path, guarded by the version checks in order.
    fn apply_delta(&self, view: &View, text: &crate::text::Text, action: &Action, group: &mut GroupState) {
        group.force = action.force;
        group.touched = true;

        let (shadow_server_version, shadow_client_version, old_shadow) = {
            let guard = view.lock();
            (
                guard.shadow_server_version(),
                guard.shadow_client_version(),
                guard.shadow().to_string(),
            )
        };

        if action.server_version != shadow_server_version {
            group.delta_ok = false;
            return;
        }
        if action.client_version > shadow_client_version {
            group.delta_ok = false;
            return;
        }
        if action.client_version < shadow_client_version {
            // Duplicate retransmission of an already-applied delta: ignore
            // silently, leaving `delta_ok` exactly as the prior action in
            // this group left it.
            return;
        }

        let diffs = match delta::from_delta(&old_shadow, &action.data) {
            Ok(diffs) => diffs,
            Err(_) => {
                group.delta_ok = false;
                return;
            }
        };

        let new_shadow = delta::post_image(&diffs);
        let patches = delta::make_patches(&old_shadow, &diffs);

        {
            let mut guard = view.lock();
            guard.apply_delta_post_image(new_shadow.clone());
        }

        // Decide the new master text under one write-lock acquisition, so a
        // concurrent request on the same document can't see the master
        // between our read and our write. A delta arriving for a text the
        // server has never heard of seeds the master from the client's
        // post-image and, from then on, is treated as unforced for the rest
        // of this step — mirroring the original's `action["force"] = False`
        // once it has done this seeding, so the patch-apply below runs
        // against that freshly seeded text rather than clobbering it again.
        let mut force = action.force;
        text.update(self.config.max_chars, |current| {
            let base = match current {
                None => {
                    force = false;
                    new_shadow.as_str()
                }
                Some(existing) => existing,
            };
            if force && delta::has_changes(&diffs) {
                Some(new_shadow.clone())
            } else {
                let (merged, _hunk_results) = delta::apply_patches(&patches, base);
                Some(merged)
            }
        });

        group.force = force;
        group.delta_ok = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_seed_produces_empty_converged_delta() {
        let engine = SyncEngine::new(Config::default());
        let response = engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
        assert!(response.contains("F:0:doc\n"), "response was {response:?}");
        assert!(response.contains("d:0:\n"), "response was {response:?}");
        assert_eq!(engine.texts().get("doc").unwrap().get().as_deref(), Some("Hello"));
    }

    #[test]
    fn incremental_edit_converges() {
        let engine = SyncEngine::new(Config::default());
        engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
        let response = engine.process_request("u:alice\nF:1:doc\nd:0:=5\n\n");
        assert!(response.contains("d:1:\n"), "response was {response:?}");
    }

    #[test]
    fn concurrent_edits_from_two_users_both_survive() {
        let engine = SyncEngine::new(Config::default());
        engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
        engine.process_request("u:bob\nF:0:doc\nR:0:Hello\n\n");

        // alice appends " world", bob appends "!" — both deltas are against
        // server version 0 from each one's own shadow perspective.
        let alice_delta = {
            let diffs = delta::diff("Hello", "Hello world");
            delta::to_delta(&diffs)
        };
        engine.process_request(&format!("u:alice\nF:1:doc\nd:0:{alice_delta}\n\n"));

        let bob_delta = {
            let diffs = delta::diff("Hello", "Hello!");
            delta::to_delta(&diffs)
        };
        engine.process_request(&format!("u:bob\nF:1:doc\nd:0:{bob_delta}\n\n"));

        let master = engine.texts().get("doc").unwrap().get().unwrap();
        assert!(master.contains("world"));
        assert!(master.contains('!'));
    }

    #[test]
    fn retried_request_after_lost_response_does_not_duplicate_the_edit() {
        let engine = SyncEngine::new(Config::default());
        engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");

        let diffs = delta::diff("Hello", "Hello world");
        let wire_delta = delta::to_delta(&diffs);
        let request = format!("u:alice\nF:1:doc\nd:0:{wire_delta}\n\n");

        let first = engine.process_request(&request);
        assert!(!first.is_empty());
        assert_eq!(
            engine.texts().get("doc").unwrap().get().as_deref(),
            Some("Hello world")
        );

        // The response above never reaches the client, so it retries the
        // identical request. The server recognizes the stale server_version
        // against its backup shadow, rolls back, and must not reapply — and
        // therefore not duplicate — the already-merged edit.
        let second = engine.process_request(&request);
        assert!(!second.is_empty());
        assert_eq!(
            engine.texts().get("doc").unwrap().get().as_deref(),
            Some("Hello world"),
            "retry must not duplicate the edit"
        );
    }

    #[test]
    fn nullify_destroys_view_and_text() {
        let engine = SyncEngine::new(Config::default());
        engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
        assert!(engine.views().get("alice", "doc").is_some());

        let response = engine.process_request("u:alice\nN:doc\n\n");
        assert_eq!(response, "");
        assert!(engine.views().get("alice", "doc").is_none());
        assert!(engine.texts().get("doc").unwrap().get().is_none());
    }

    #[test]
    fn force_raw_overwrites_master_unconditionally() {
        let engine = SyncEngine::new(Config::default());
        engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
        engine.process_request("u:alice\nF:1:doc\nR:0:Goodbye\n\n");
        assert_eq!(engine.texts().get("doc").unwrap().get().as_deref(), Some("Goodbye"));
    }

    #[test]
    fn duplicate_delta_is_ignored() {
        let engine = SyncEngine::new(Config::default());
        engine.process_request("u:alice\nF:0:doc\nR:0:Hello\n\n");
        engine.process_request("u:alice\nF:1:doc\nd:0:=5\n\n");
        // client_version now 1 on the server; resend client_version 0 again.
        let before = engine.texts().get("doc").unwrap().get().unwrap();
        engine.process_request("u:alice\nF:2:doc\nd:0:=5\n\n");
        let after = engine.texts().get("doc").unwrap().get().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn text_longer_than_max_chars_keeps_the_tail() {
        let mut config = Config::default();
        config.max_chars = 5;
        let engine = SyncEngine::new(config);
        engine.process_request("u:alice\nF:0:doc\nR:0:0123456789\n\n");
        assert_eq!(engine.texts().get("doc").unwrap().get().as_deref(), Some("56789"));
    }
}
