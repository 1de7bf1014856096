//! Tokenizes a raw client request into an ordered [`Action`] list (§4.1).
//!
//! The wire format is line-oriented (`\n`, `\r`, or `\r\n` line endings, any
//! of which may be mixed within one request) and terminated by a blank line.
//! Each line either carries parser state (`u:`/`f:`) or appends an action
//! (`n:`/`d:`/`r:`); `b:`/`B:` lines instead feed a [`crate::buffer`] and, on
//! completion, recursively reparse the reassembled request.

pub mod action;

pub use action::{Action, ActionMode};

use std::sync::Arc;

use crate::buffer::{BufferRegistry, FragmentOutcome};
use crate::error::ParseWarning;

/// Flags accompanying the action list that apply to the whole request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Whether a `U:` line requested the username be echoed back.
    pub echo_username: bool,
}

/// Splits `raw` on any of `\r\n`, `\r`, or `\n`, treating each as a single
/// line terminator. Two adjacent terminators (in any combination, which
/// covers all four blank-line forms in §4.1) therefore produce an empty
/// entry between them.
fn split_lines(raw: &str) -> Vec<&str> {
    let bytes = raw.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                lines.push(&raw[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            b'\n' => {
                lines.push(&raw[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        lines.push(&raw[start..]);
    }
    lines
}

/// Parses `V:REST`, requiring `V` to be a non-negative integer.
fn parse_versioned(s: &str) -> Option<(u64, &str)> {
    let (version, rest) = s.split_once(':')?;
    let version = version.parse().ok()?;
    Some((version, rest))
}

/// Parses a `b:`/`B:` payload of the form `NAME SIZE INDEX TEXT`.
fn parse_fragment(s: &str) -> Option<(&str, usize, usize, &str)> {
    let mut parts = s.splitn(4, ' ');
    let name = parts.next()?;
    let size = parts.next()?.parse().ok()?;
    let index = parts.next()?.parse().ok()?;
    let text = parts.next()?;
    Some((name, size, index, text))
}

/// Tokenizes `raw` into an action list plus request-wide flags.
///
/// Fails with [`ParseWarning::TransportTruncated`] if no blank-line
/// terminator is found anywhere in `raw`; every other malformed line is
/// logged (when the `tracing` feature is enabled) and skipped, matching §7's
/// "no error here is fatal" taxonomy.
pub fn parse_request(
    raw: &str,
    buffers: &BufferRegistry,
) -> Result<(Vec<Action>, ParseOutcome), ParseWarning> {
    let lines = split_lines(raw);

    let mut actions = Vec::new();
    let mut outcome = ParseOutcome::default();
    let mut username: Option<Arc<str>> = None;
    let mut filename: Option<Arc<str>> = None;
    let mut server_version: u64 = 0;
    let mut terminated = false;

    for line in lines {
        if line.is_empty() {
            terminated = true;
            break;
        }

        if line.as_bytes().get(1) != Some(&b':') {
            #[cfg(feature = "tracing")]
            tracing::warn!(line, "skipping malformed request line");
            continue;
        }
        let cmd = line.as_bytes()[0] as char;
        let rest = &line[2..];

        match cmd.to_ascii_lowercase() {
            'u' => {
                username = Some(Arc::from(rest));
                outcome.echo_username = cmd == 'U';
            }
            'f' => match parse_versioned(rest) {
                Some((version, name)) => {
                    server_version = version;
                    filename = Some(Arc::from(name));
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(line, "skipping f: line with bad version prefix");
                }
            },
            'n' => {
                if let Some(user) = username.clone() {
                    let doc: Arc<str> = Arc::from(rest);
                    actions.push(Action {
                        username: user,
                        filename: doc.clone(),
                        mode: ActionMode::Null,
                        force: cmd == 'N',
                        server_version,
                        client_version: 0,
                        data: String::new(),
                    });
                    filename = Some(doc);
                }
            }
            'd' => match parse_versioned(rest) {
                Some((client_version, data)) => {
                    if let (Some(user), Some(file)) = (username.clone(), filename.clone()) {
                        actions.push(Action {
                            username: user,
                            filename: file,
                            mode: ActionMode::Delta,
                            force: cmd == 'D',
                            server_version,
                            client_version,
                            data: data.to_string(),
                        });
                    }
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(line, "skipping d: line with bad version prefix");
                }
            },
            'r' => match parse_versioned(rest) {
                Some((client_version, data)) => {
                    if let (Some(user), Some(file)) = (username.clone(), filename.clone()) {
                        actions.push(Action {
                            username: user,
                            filename: file,
                            mode: ActionMode::Raw,
                            force: cmd == 'R',
                            server_version,
                            client_version,
                            data: data.to_string(),
                        });
                    }
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(line, "skipping r: line with bad version prefix");
                }
            },
            'b' => match parse_fragment(rest) {
                Some((name, size, index, text)) => {
                    match buffers.accept_fragment(name, size, index, text) {
                        Ok(FragmentOutcome::Complete(assembled)) => match crate::delta::unquote(&assembled) {
                            Ok(mut nested) => {
                                if let Some(last) = nested.chars().last() {
                                    nested.push(last);
                                }
                                let (mut nested_actions, nested_outcome) =
                                    parse_request(&nested, buffers)?;
                                actions.append(&mut nested_actions);
                                outcome.echo_username |= nested_outcome.echo_username;
                            }
                            Err(_warning) => {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(line, "reassembled buffer failed URL-unescaping");
                            }
                        },
                        Ok(FragmentOutcome::Incomplete) => {}
                        Err(_warning) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(line, "skipping out-of-range buffer fragment");
                        }
                    }
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(line, "skipping malformed b: line");
                }
            },
            _ => {
                #[cfg(feature = "tracing")]
                tracing::warn!(line, "skipping unrecognized command");
            }
        }
    }

    if !terminated {
        return Err(ParseWarning::TransportTruncated);
    }

    Ok((actions, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_request_with_no_blank_line_terminator() {
        let buffers = BufferRegistry::new();
        let err = parse_request("u:alice\nF:0:doc\n", &buffers).unwrap_err();
        assert_eq!(err, ParseWarning::TransportTruncated);
    }

    #[test]
    fn recognizes_every_blank_line_terminator_form() {
        let buffers = BufferRegistry::new();
        for terminator in ["\n\n", "\r\r", "\r\n\r\n", "\n\r\n\r"] {
            let raw = format!("u:alice\nF:0:doc\nR:0:Hello{terminator}");
            let (actions, _) = parse_request(&raw, &buffers).unwrap();
            assert_eq!(actions.len(), 1, "terminator {terminator:?} failed to parse");
        }
    }

    #[test]
    fn parses_a_full_create_and_seed_request() {
        let buffers = BufferRegistry::new();
        let (actions, outcome) =
            parse_request("u:alice\nF:0:doc\nR:0:Hello\n\n", &buffers).unwrap();
        assert_eq!(actions.len(), 1);
        let action = &actions[0];
        assert_eq!(&*action.username, "alice");
        assert_eq!(&*action.filename, "doc");
        assert_eq!(action.mode, ActionMode::Raw);
        assert!(!action.force);
        assert_eq!(action.server_version, 0);
        assert_eq!(action.client_version, 0);
        assert_eq!(action.data, "Hello");
        assert!(!outcome.echo_username);
    }

    #[test]
    fn uppercase_u_enables_username_echo() {
        let buffers = BufferRegistry::new();
        let (_, outcome) = parse_request("U:alice\nF:0:doc\nR:0:Hi\n\n", &buffers).unwrap();
        assert!(outcome.echo_username);
    }

    #[test]
    fn force_flag_follows_command_case() {
        let buffers = BufferRegistry::new();
        let (actions, _) = parse_request("u:alice\nF:0:doc\nD:0:=5\n\n", &buffers).unwrap();
        assert!(actions[0].force);
        assert_eq!(actions[0].mode, ActionMode::Delta);
    }

    #[test]
    fn line_with_bad_version_prefix_is_skipped() {
        let buffers = BufferRegistry::new();
        let (actions, _) = parse_request("u:alice\nF:0:doc\nd:xx:=5\n\n", &buffers).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn action_is_dropped_without_a_preceding_username_or_filename() {
        let buffers = BufferRegistry::new();
        let (actions, _) = parse_request("F:0:doc\nr:0:Hi\n\n", &buffers).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn malformed_line_without_colon_shape_is_silently_skipped() {
        let buffers = BufferRegistry::new();
        let (actions, _) =
            parse_request("u:alice\nF:0:doc\ngarbage\nr:0:Hi\n\n", &buffers).unwrap();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn nullify_action_uses_current_username_and_given_document() {
        let buffers = BufferRegistry::new();
        let (actions, _) = parse_request("u:alice\nN:doc\n\n", &buffers).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].mode, ActionMode::Null);
        assert_eq!(&*actions[0].username, "alice");
        assert_eq!(&*actions[0].filename, "doc");
        assert!(actions[0].force);
    }

    #[test]
    fn completed_buffer_fragment_is_reparsed_as_a_nested_request() {
        let buffers = BufferRegistry::new();
        let whole = crate::delta::quote("u:alice\nF:0:doc\nR:0:Hi\n\n");
        let (first, second) = whole.split_at(whole.len() / 2);
        let (actions, _) =
            parse_request(&format!("b:x 2 1 {first}\n\n"), &buffers).unwrap();
        assert!(actions.is_empty());
        let (actions, _) =
            parse_request(&format!("b:x 2 2 {second}\n\n"), &buffers).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(&*actions[0].username, "alice");
    }
}
