//! Periodic expiry of idle views, texts, and buffers (§4.6).
//!
//! This module is pure scheduling logic with no knowledge of a runtime: the
//! daemon crate drives [`sweep`] from a `tokio::time::interval`, but the
//! function itself takes a deadline and returns as soon as it's passed,
//! matching "best-effort … deferred to the next tick" from §4.6.

use std::time::Instant;

use crate::buffer::BufferRegistry;
use crate::config::Config;
use crate::text::TextRegistry;
use crate::view::ViewRegistry;

/// Counts of entities evicted by one [`sweep`] call, for the caller's
/// logging (`tracing::info!(evicted_texts, evicted_views, evicted_buffers)`
/// in the daemon crate).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Views evicted for being idle beyond `timeout_view`.
    pub evicted_views: usize,
    /// Texts evicted for being idle, unreferenced, beyond `timeout_text`.
    pub evicted_texts: usize,
    /// Incomplete buffers evicted for being idle beyond `timeout_buffer`.
    pub evicted_buffers: usize,
    /// `true` if the sweep stopped early because `deadline` was reached
    /// before every registry had been swept.
    pub deadline_exceeded: bool,
}

/// Evicts everything past its configured timeout across the three
/// registries, stopping early if `deadline` is reached.
///
/// Destroying a view decrements its text's reference count (§3 "View
/// destruction decrements the Text's reference count"), so views are always
/// swept before texts: a text that lost its last reference in this same
/// sweep becomes eligible for eviction immediately, without waiting for the
/// next tick.
pub fn sweep(
    views: &ViewRegistry,
    texts: &TextRegistry,
    buffers: &BufferRegistry,
    config: &Config,
    deadline: Instant,
) -> SweepReport {
    let mut report = SweepReport::default();

    let evicted_views = views.evict_idle(config.timeout_view);
    report.evicted_views = evicted_views.len();
    for view in &evicted_views {
        if let Some(text) = texts.get(view.doc_name()) {
            texts.detach(&text);
        }
    }

    if Instant::now() >= deadline {
        report.deadline_exceeded = true;
        return report;
    }

    report.evicted_texts = texts.evict_idle(config.timeout_text);

    if Instant::now() >= deadline {
        report.deadline_exceeded = true;
        return report;
    }

    report.evicted_buffers = buffers.evict_idle(config.timeout_buffer);

    report
}
