//! Concrete front-ends speaking the wire protocol over a real socket (§4.7,
//! §6 "External interfaces").
//!
//! Both adapters reduce to the same call:
//! [`mobwrite_core::engine::SyncEngine::process_request`]. Neither owns any
//! convergence logic; they only know how to recognize a complete request on
//! the wire and how to shuttle the response back.

pub mod http;
pub mod stream;
