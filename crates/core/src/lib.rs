//! # Overview
//!
//! `mobwrite-core` implements the Differential Synchronization (DifSync)
//! engine at the heart of the MobWrite collaborative text service: the
//! per-(user, document) session state machine, the delta/patch exchange
//! protocol, shadow/backup-shadow rollback, the edit-stack resend discipline,
//! and the multi-slot buffer assembly used to reconstruct oversized client
//! requests.
//!
//! # Design
//!
//! [`text::TextRegistry`] and [`view::ViewRegistry`] own the master texts and
//! per-session shadows respectively; [`buffer::BufferRegistry`] reassembles
//! fragmented requests. [`protocol`] tokenizes a raw client request into an
//! ordered [`protocol::Action`] list, and [`engine::SyncEngine`] walks that
//! list applying the rules in the module-level docs of [`engine`]. Callers
//! that need a concrete transport see the sibling `mobwrite-daemon` crate;
//! this crate has no knowledge of sockets or HTTP.
//!
//! # Invariants
//!
//! - A single [`engine::SyncEngine::process_request`] call is the entire
//!   unit of statefulness the wire protocol requires: nothing about a
//!   connection survives between requests except what is recorded in the
//!   registries.
//! - Every mutation of a [`text::Text`]'s master content goes through
//!   [`text::Text::update`], which normalizes line endings, enforces
//!   `max_chars` truncation, and holds the text's write lock across the
//!   whole read-decide-write sequence so two requests touching the same
//!   document can't interleave a lost update.
//!
//! # Errors
//!
//! Malformed client input never produces a hard error — see [`error`] for
//! the taxonomy of warnings that are logged and downgraded to a raw resync
//! or an empty response instead.

pub mod buffer;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod reaper;
pub mod store;
pub mod text;
pub mod view;

pub use config::Config;
pub use engine::SyncEngine;
