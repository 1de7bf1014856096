//! The Telnet-style stream transport (§4.7, §6).
//!
//! One request per connection: accept, optionally check the peer's address
//! against `connection_origin`, read until a blank-line terminator or the
//! idle timeout elapses (whichever comes first), hand the accumulated bytes
//! to the engine, write the response, and let the connection close when the
//! handling task returns.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use mobwrite_core::SyncEngine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::DaemonError;

/// Binds `addr` and serves connections until the process is killed or the
/// accept loop hits an unrecoverable error.
pub async fn serve(
    engine: Arc<SyncEngine>,
    addr: SocketAddr,
    idle_timeout: Duration,
    connection_origin: Option<IpAddr>,
) -> Result<(), DaemonError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| DaemonError::Bind(addr, err))?;

    #[cfg(feature = "tracing")]
    tracing::info!(%addr, "stream transport listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "failed to accept stream connection");
                #[cfg(not(feature = "tracing"))]
                let _ = err;
                continue;
            }
        };

        if let Some(origin) = connection_origin {
            if peer.ip() != origin {
                #[cfg(feature = "tracing")]
                tracing::warn!(%peer, %origin, "rejecting connection from disallowed origin");
                continue;
            }
        }

        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(_err) = handle_connection(stream, &engine, idle_timeout).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, %peer, "stream connection ended with an I/O error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, engine: &SyncEngine, idle_timeout: Duration) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match timeout(idle_timeout, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                if has_blank_line_terminator(&buf) {
                    break;
                }
            }
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => break,
        }
    }

    let request = String::from_utf8_lossy(&buf);
    let response = engine.process_request(&request);
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// `true` once `buf` contains two adjacent line terminators (any mix of
/// `\n`, `\r`, `\r\n`), matching every blank-line form the protocol accepts.
fn has_blank_line_terminator(buf: &[u8]) -> bool {
    let mut i = 0;
    let mut prev_terminator_end: Option<usize> = None;
    while i < buf.len() {
        let term_len = if buf[i] == b'\r' && buf.get(i + 1) == Some(&b'\n') {
            2
        } else if buf[i] == b'\r' || buf[i] == b'\n' {
            1
        } else {
            0
        };

        if term_len > 0 {
            if prev_terminator_end == Some(i) {
                return true;
            }
            prev_terminator_end = Some(i + term_len);
            i += term_len;
        } else {
            prev_terminator_end = None;
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration as StdDuration;

    use mobwrite_core::Config;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpStream as ClientStream;

    #[test]
    fn recognizes_every_blank_line_form() {
        assert!(has_blank_line_terminator(b"u:alice\n\n"));
        assert!(has_blank_line_terminator(b"u:alice\r\r"));
        assert!(has_blank_line_terminator(b"u:alice\r\n\r\n"));
        assert!(has_blank_line_terminator(b"u:alice\n\r\n"));
        assert!(!has_blank_line_terminator(b"u:alice\n"));
        assert!(!has_blank_line_terminator(b""));
    }

    #[tokio::test]
    async fn a_complete_request_receives_a_response_and_the_connection_closes() {
        let engine = Arc::new(SyncEngine::new(Config::default()));
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            handle_connection(stream, &engine, StdDuration::from_secs(2)).await.unwrap();
        });

        let mut client = ClientStream::connect(bound).await.unwrap();
        client.write_all(b"u:alice\nf:0:doc\nR:0:Hi\n\n").await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(!response.is_empty());
    }

    #[tokio::test]
    async fn an_idle_connection_is_answered_with_an_empty_response() {
        let engine = Arc::new(SyncEngine::new(Config::default()));
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            handle_connection(stream, &engine, StdDuration::from_millis(50)).await.unwrap();
        });

        let mut client = ClientStream::connect(bound).await.unwrap();
        client.write_all(b"u:alice\n").await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
    }
}
