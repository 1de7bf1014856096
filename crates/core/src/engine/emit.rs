//! Outbound block assembly (§4.3), called once per contiguous run of
//! actions addressing the same (user, document).

use std::sync::Arc;

use crate::delta;
use crate::text::Text;
use crate::view::View;

/// The flags an emission needs beyond the view/text state itself.
pub(super) struct OutboundFlags {
    pub(super) echo_username: bool,
    pub(super) force: bool,
    pub(super) delta_ok: bool,
}

/// Appends one outbound block to `output` and updates the view so its
/// shadow matches what was just conveyed.
///
/// `last_username`/`last_filename` track what was prepended in the
/// *previous* emission within this request, so a run of several groups for
/// the same user doesn't repeat an unchanged `u:`/`F:` line.
pub(super) fn build_outbound(
    view: &View,
    text: &Text,
    flags: OutboundFlags,
    max_chars: usize,
    output: &mut String,
    last_username: &mut Option<Arc<str>>,
    last_filename: &mut Option<Arc<str>>,
) {
    let username: Arc<str> = Arc::from(view.username());
    let filename: Arc<str> = Arc::from(view.doc_name());

    let username_changed = last_username.as_deref() != Some(&*username);
    let filename_changed = last_filename.as_deref() != Some(&*filename);

    let mut guard = view.lock();

    if flags.echo_username && username_changed {
        output.push_str("u:");
        output.push_str(&username);
        output.push('\n');
    }

    if username_changed || filename_changed {
        output.push_str(&format!("F:{}:{}\n", guard.shadow_client_version(), filename));
    }

    // If the master is still unknown at emission time, accept this view's
    // shadow as the seed (only when `delta_ok`, so a server that couldn't
    // even parse the client's delta doesn't fabricate content) and treat
    // this action as unforced regardless, since there is nothing left to
    // overwrite.
    let mut force = flags.force;
    let delta_ok = flags.delta_ok;
    let shadow = guard.shadow().to_string();
    text.update(max_chars, |current| {
        if current.is_none() {
            force = false;
            delta_ok.then(|| shadow.clone())
        } else {
            None
        }
    });

    let master = text.get().unwrap_or_default();

    if flags.delta_ok {
        let diffs = delta::diff(guard.shadow(), &master);
        let wire_delta = delta::to_delta(&diffs);
        let server_version = guard.shadow_server_version();
        let raw_line = if force {
            format!("D:{server_version}:{wire_delta}\n")
        } else {
            format!("d:{server_version}:{wire_delta}\n")
        };
        guard.push_outbound(raw_line);
    } else {
        guard.bump_client_version();
        let server_version = guard.shadow_server_version();
        let raw_line = if master.is_empty() {
            format!("r:{server_version}:\n")
        } else {
            format!("R:{server_version}:{}\n", delta::quote(&master))
        };
        guard.push_raw_dump(raw_line);
    }

    guard.align_shadow(master);

    for entry in guard.edit_stack() {
        output.push_str(&entry.raw_line);
    }

    *last_username = Some(username);
    *last_filename = Some(filename);
}
