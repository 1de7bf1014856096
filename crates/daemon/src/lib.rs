//! # Overview
//!
//! `mobwrite-daemon` wires [`mobwrite_core::engine::SyncEngine`] up to a
//! concrete transport: a Telnet-style TCP stream and an HTTP form endpoint,
//! both carrying the same wire protocol the engine already parses. Neither
//! transport changes convergence behavior — they only decide how a raw
//! request string reaches [`SyncEngine::process_request`](mobwrite_core::engine::SyncEngine::process_request)
//! and how the response gets back to the client.
//!
//! This crate also owns the pieces that only make sense once a process is
//! actually running: CLI/config-file loading ([`config::RuntimeOptions`])
//! and the periodic reaper tick ([`reaper_task`]).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mobwrite_core::SyncEngine;

pub mod config;
pub mod transport;

/// Problems that prevent the daemon from starting or loading its
/// configuration. Once running, a request-level failure never reaches this
/// type — see [`mobwrite_core::error`] for that taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// `--config PATH` named a file that could not be read.
    #[error("failed to read config file {0:?}: {1}")]
    ConfigRead(PathBuf, #[source] std::io::Error),
    /// `--config PATH` named a file that was not valid TOML.
    #[error("failed to parse config file {0:?}: {1}")]
    ConfigParse(PathBuf, #[source] toml::de::Error),
    /// The stream or HTTP transport could not bind its listening socket.
    #[error("failed to bind {0}: {1}")]
    Bind(std::net::SocketAddr, #[source] std::io::Error),
}

/// Drives [`mobwrite_core::reaper::sweep`] on a fixed interval until the
/// returned handle is dropped or the process exits.
///
/// Each tick gets `tick_period` as its own deadline, so a sweep that falls
/// behind (a very large registry, a slow store) simply does less work this
/// tick rather than starving the interval indefinitely — see `sweep`'s
/// early-return-on-deadline behavior.
pub fn spawn_reaper(engine: Arc<SyncEngine>, tick_period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_period);
        loop {
            interval.tick().await;
            let deadline = std::time::Instant::now() + tick_period;
            let report = mobwrite_core::reaper::sweep(
                engine.views(),
                engine.texts(),
                engine.buffers(),
                engine.config(),
                deadline,
            );
            #[cfg(feature = "tracing")]
            tracing::info!(
                evicted_views = report.evicted_views,
                evicted_texts = report.evicted_texts,
                evicted_buffers = report.evicted_buffers,
                deadline_exceeded = report.deadline_exceeded,
                "reaper sweep complete"
            );
            #[cfg(not(feature = "tracing"))]
            let _ = report;
        }
    })
}
