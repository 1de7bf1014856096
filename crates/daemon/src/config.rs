//! CLI/config-file loading for the daemon binary (§6 "Configuration loading").
//!
//! [`RuntimeOptions`] wraps [`mobwrite_core::Config`] with the two knobs the
//! core engine has no use for (`listen_port`, `connection_origin`) and
//! layers three sources in increasing precedence: built-in defaults, an
//! optional TOML file (`--config PATH`), then CLI flags. A flag is only
//! treated as an override if the user actually passed it — `clap` gives each
//! field `Option<T>` for that reason, and [`RuntimeOptions::resolve`] folds
//! the three layers down to a plain [`Config`](mobwrite_core::Config) plus
//! the two daemon-only fields.

use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mobwrite_core::Config;
use serde::Deserialize;

use crate::DaemonError;

/// Command-line surface for `mobwrite-server`.
///
/// Every tuning knob is optional here; an absent flag falls through to the
/// config file, then to [`Config::default`]. `--config` itself is the only
/// flag with no fallback layer beneath it.
#[derive(Parser, Debug)]
#[command(name = "mobwrite-server")]
#[command(about = "Real-time collaborative text synchronization daemon", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file layered beneath these flags.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Maximum stored document length in characters. 0 means unlimited.
    #[arg(long, value_name = "N")]
    pub max_chars: Option<usize>,

    /// Maximum number of concurrently tracked views. 0 means unlimited.
    #[arg(long, value_name = "N")]
    pub max_views: Option<usize>,

    /// Idle timeout, in seconds, before a view is evicted.
    #[arg(long, value_name = "SECS")]
    pub timeout_view: Option<u64>,

    /// Idle timeout, in seconds, before an unreferenced text is evicted.
    #[arg(long, value_name = "SECS")]
    pub timeout_text: Option<u64>,

    /// Idle timeout, in seconds, before an incomplete buffer is evicted.
    #[arg(long, value_name = "SECS")]
    pub timeout_buffer: Option<u64>,

    /// Idle-read timeout, in seconds, for the Telnet-style stream transport.
    #[arg(long, value_name = "SECS")]
    pub timeout_telnet: Option<u64>,

    /// TCP port the stream transport listens on.
    #[arg(short = 'p', long, value_name = "PORT")]
    pub listen_port: Option<u16>,

    /// TCP port the HTTP transport listens on. If unset, the HTTP transport
    /// is not started.
    #[arg(long, value_name = "PORT")]
    pub http_port: Option<u16>,

    /// If set, only accept stream-transport connections from this address.
    #[arg(long, value_name = "ADDR")]
    pub connection_origin: Option<IpAddr>,
}

/// Mirrors [`Cli`]'s fields for deserializing an optional TOML config file.
/// Every field is optional so a file only needs to mention the keys it
/// overrides.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "snake_case")]
struct FileConfig {
    max_chars: Option<usize>,
    max_views: Option<usize>,
    timeout_view: Option<u64>,
    timeout_text: Option<u64>,
    timeout_buffer: Option<u64>,
    timeout_telnet: Option<u64>,
    listen_port: Option<u16>,
    http_port: Option<u16>,
    connection_origin: Option<IpAddr>,
}

/// The fully resolved configuration a running daemon is built from: the
/// core engine's [`Config`] plus the daemon-only transport knobs.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Knobs consumed by [`mobwrite_core::engine::SyncEngine`] and its
    /// registries.
    pub engine: Config,
    /// TCP port the stream transport listens on.
    pub listen_port: u16,
    /// TCP port the HTTP transport listens on, if it should run at all.
    pub http_port: Option<u16>,
    /// If set, the stream transport rejects connections from any other
    /// source address.
    pub connection_origin: Option<IpAddr>,
}

const DEFAULT_LISTEN_PORT: u16 = 3017;

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            engine: Config::default(),
            listen_port: DEFAULT_LISTEN_PORT,
            http_port: None,
            connection_origin: None,
        }
    }
}

impl RuntimeOptions {
    /// Parses `argv`-style arguments and layers them over an optional
    /// config file over the built-in defaults.
    pub fn from_args<I, T>(args: I) -> Result<Self, DaemonError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::parse_from(args);
        Self::resolve(cli)
    }

    /// Folds an already-parsed [`Cli`] down to a concrete [`RuntimeOptions`],
    /// reading `--config` if one was given.
    pub fn resolve(cli: Cli) -> Result<Self, DaemonError> {
        let file = match &cli.config {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .map_err(|err| DaemonError::ConfigRead(path.clone(), err))?;
                toml::from_str::<FileConfig>(&contents)
                    .map_err(|err| DaemonError::ConfigParse(path.clone(), err))?
            }
            None => FileConfig::default(),
        };

        let defaults = Config::default();
        let engine = Config {
            max_chars: cli.max_chars.or(file.max_chars).unwrap_or(defaults.max_chars),
            max_views: cli.max_views.or(file.max_views).unwrap_or(defaults.max_views),
            timeout_view: cli
                .timeout_view
                .or(file.timeout_view)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout_view),
            timeout_text: cli
                .timeout_text
                .or(file.timeout_text)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout_text),
            timeout_buffer: cli
                .timeout_buffer
                .or(file.timeout_buffer)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout_buffer),
            timeout_telnet: cli
                .timeout_telnet
                .or(file.timeout_telnet)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout_telnet),
        };

        Ok(Self {
            engine,
            listen_port: cli.listen_port.or(file.listen_port).unwrap_or(DEFAULT_LISTEN_PORT),
            http_port: cli.http_port.or(file.http_port),
            connection_origin: cli.connection_origin.or(file.connection_origin),
        })
    }
}
