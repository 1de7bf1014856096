//! The HTTP transport (§6 "HTTP surface").
//!
//! A client posts (or GETs) one of three form fields: `q` gets a
//! `text/plain` response body verbatim; `p` gets the same response wrapped
//! as `mobwrite.callback("<escaped>");` for script-tag polling; `clean`
//! triggers an out-of-band reaper sweep and always answers
//! `"Database clean."`. Anything else is an empty `200`.
//!
//! `tiny_http` runs its own accept loop on whichever thread calls
//! [`Server::recv`]; [`spawn`] dedicates one OS thread to it rather than
//! pulling the stream transport's async runtime into a concern this small.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use mobwrite_core::SyncEngine;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::DaemonError;

/// Starts the HTTP listener on a dedicated thread and returns its handle.
pub fn spawn(engine: Arc<SyncEngine>, addr: SocketAddr) -> Result<JoinHandle<()>, DaemonError> {
    let server = Server::http(addr).map_err(|err| {
        DaemonError::Bind(addr, std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
    })?;

    #[cfg(feature = "tracing")]
    tracing::info!(%addr, "http transport listening");

    Ok(std::thread::spawn(move || {
        for request in server.incoming_requests() {
            handle_request(request, &engine);
        }
    }))
}

fn handle_request(mut request: Request, engine: &SyncEngine) {
    let query = request.url().split_once('?').map(|(_, q)| q.to_string());
    let body = if matches!(request.method(), Method::Post) {
        let mut body = String::new();
        if std::io::Read::read_to_string(request.as_reader(), &mut body).is_err() {
            let _ = request.respond(Response::from_string(String::new()).with_status_code(400));
            return;
        }
        Some(body)
    } else {
        None
    };

    let params = parse_form(body.as_deref().unwrap_or(""), query.as_deref().unwrap_or(""));

    let (content_type, response_body) = if let Some(raw_request) = params.get("q") {
        ("text/plain", engine.process_request(raw_request))
    } else if let Some(raw_request) = params.get("p") {
        let raw_response = engine.process_request(raw_request);
        (
            "text/javascript",
            format!("mobwrite.callback(\"{}\");", escape_for_javascript(&raw_response)),
        )
    } else if params.contains_key("clean") {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
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
            "reaper sweep triggered via the clean endpoint"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = report;
        ("text/plain", "Database clean.".to_string())
    } else {
        ("text/plain", String::new())
    };

    let header = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()).expect("static header is valid");
    let _ = request.respond(Response::from_string(response_body).with_header(header));
}

/// Parses `a=b&c=d`-shaped pairs out of a request body and, as a fallback
/// for the fields the body doesn't carry, the query string — either source
/// may hold `q`/`p`/`clean` per §6.
fn parse_form(body: &str, query: &str) -> std::collections::HashMap<String, String> {
    let mut params = std::collections::HashMap::new();
    for source in [body, query] {
        for pair in source.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key).map(|s| s.into_owned()).unwrap_or_else(|_| key.to_string());
            let value = urlencoding::decode(value).map(|s| s.into_owned()).unwrap_or_else(|_| value.to_string());
            params.entry(key).or_insert(value);
        }
    }
    params
}

/// Escapes the four characters that would otherwise break out of the
/// double-quoted string literal in `mobwrite.callback("...")`.
fn escape_for_javascript(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_newlines() {
        let escaped = escape_for_javascript("line one\r\nsays \"hi\" and \\ backslash");
        assert_eq!(escaped, "line one\\r\\nsays \\\"hi\\\" and \\\\ backslash");
    }

    #[test]
    fn parse_form_prefers_body_over_query() {
        let params = parse_form("q=from-body", "q=from-query");
        assert_eq!(params.get("q").unwrap(), "from-body");
    }

    #[test]
    fn parse_form_falls_back_to_the_query_string() {
        let params = parse_form("", "clean=1");
        assert!(params.contains_key("clean"));
    }

    #[test]
    fn parse_form_url_decodes_values() {
        let params = parse_form("q=u%3Aalice%0A%0A", "");
        assert_eq!(params.get("q").unwrap(), "u:alice\n\n");
    }
}
