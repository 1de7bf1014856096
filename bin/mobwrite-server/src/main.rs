//! `mobwrite-server`: parses [`RuntimeOptions`](mobwrite_daemon::config::RuntimeOptions),
//! builds a [`SyncEngine`], and runs the stream and HTTP transports plus the
//! background reaper until killed.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use mobwrite_core::SyncEngine;
use mobwrite_daemon::config::RuntimeOptions;
use mobwrite_daemon::transport::{http, stream};

const REAPER_TICK: Duration = Duration::from_secs(60);

fn main() -> ExitCode {
    #[cfg(feature = "tracing")]
    init_tracing();

    let options = match RuntimeOptions::from_args(std::env::args_os()) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("mobwrite-server: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("mobwrite-server: failed to start the async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(options))
}

async fn run(options: RuntimeOptions) -> ExitCode {
    let timeout_telnet = options.engine.timeout_telnet;
    let connection_origin = options.connection_origin;
    let stream_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), options.listen_port);
    let http_port = options.http_port;

    let engine = Arc::new(SyncEngine::new(options.engine));
    mobwrite_daemon::spawn_reaper(Arc::clone(&engine), REAPER_TICK);

    let http_handle = match http_port {
        Some(port) => {
            let http_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
            match http::spawn(Arc::clone(&engine), http_addr) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    eprintln!("mobwrite-server: {err}");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => None,
    };

    let stream_result = stream::serve(engine, stream_addr, timeout_telnet, connection_origin).await;

    if let Err(err) = stream_result {
        eprintln!("mobwrite-server: {err}");
        return ExitCode::FAILURE;
    }

    // stream::serve only returns on an unrecoverable bind error above; if it
    // ever returns Ok, fall through and let the HTTP thread keep serving.
    if let Some(handle) = http_handle {
        let _ = handle.join();
    }
    ExitCode::SUCCESS
}

#[cfg(feature = "tracing")]
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
