//! Command-line argument parsing for the panel-sync watcher.
//!
//! Flags take their value either as the next argument or inline
//! (`--server=<uuid>`).

use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::models::{PowerSignal, ServerIdentity};

/// Options of the watch command.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchArgs {
    /// Server to watch
    pub server: ServerIdentity,
    /// Overrides `PANEL_SYNC_API_URL`
    pub api_url: Option<String>,
    /// Overrides `PANEL_SYNC_API_KEY`
    pub api_key: Option<String>,
    /// Power signal to issue once mounted
    pub power: Option<PowerSignal>,
}

/// Parsed CLI command to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Show version information
    Version,
    /// Show usage
    Help,
    /// Mount a server and log its live state
    Watch(WatchArgs),
}

pub const USAGE: &str = "\
usage: panel-sync --server <uuid> [--api-url <url>] [--api-key <key>] [--power <signal>]

  --server <uuid>     server to watch
  --api-url <url>     panel client API base URL (env PANEL_SYNC_API_URL)
  --api-key <key>     client API key (env PANEL_SYNC_API_KEY)
  --power <signal>    send start, stop, restart or kill after connecting
  -V, --version       print version
  -h, --help          print this help";

/// Parse command-line arguments, program name included.
///
/// # Examples
///
/// ```
/// use panel_sync::cli::args::{parse_args, CliCommand};
///
/// let args = vec!["panel-sync".to_string(), "--version".to_string()];
/// assert_eq!(parse_args(args.into_iter()).unwrap(), CliCommand::Version);
/// ```
pub fn parse_args<I>(args: I) -> SyncResult<CliCommand>
where
    I: Iterator<Item = String>,
{
    let mut server = None;
    let mut api_url = None;
    let mut api_key = None;
    let mut power = None;

    let mut args = args.skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> SyncResult<String> {
            inline
                .clone()
                .or_else(|| args.next())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SyncError::config(name, "missing value"))
        };
        match flag.as_str() {
            "--version" | "-V" => return Ok(CliCommand::Version),
            "--help" | "-h" => return Ok(CliCommand::Help),
            "--server" => {
                let raw = value("--server")?;
                let uuid = Uuid::parse_str(&raw)
                    .map_err(|e| SyncError::config("--server", format!("'{}' is not a server uuid: {}", raw, e)))?;
                server = Some(ServerIdentity::from_uuid(uuid));
            }
            "--api-url" => api_url = Some(value("--api-url")?),
            "--api-key" => api_key = Some(value("--api-key")?),
            "--power" => {
                let raw = value("--power")?;
                power = Some(PowerSignal::parse(&raw).ok_or_else(|| {
                    SyncError::config("--power", format!("unknown signal '{}'", raw))
                })?);
            }
            other => return Err(SyncError::config(other, "unknown argument")),
        }
    }

    let server = server.ok_or_else(|| SyncError::config("--server", "is required"))?;
    Ok(CliCommand::Watch(WatchArgs {
        server,
        api_url,
        api_key,
        power,
    }))
}
