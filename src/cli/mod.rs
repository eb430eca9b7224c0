//! CLI module for the panel-sync watcher.
//!
//! - Argument parsing
//! - Version and usage display
//! - The watch command
//!
//! # Usage
//!
//! ```ignore
//! use panel_sync::cli::{parse_args, run_cli_command};
//!
//! let command = parse_args(std::env::args())?;
//! runtime.block_on(run_cli_command(command))?;
//! ```

pub mod args;
pub mod watch;

pub use args::{parse_args, CliCommand, WatchArgs, USAGE};
pub use watch::run_watch;

use color_eyre::Result;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run a parsed command to completion.
pub async fn run_cli_command(command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Version => {
            println!("panel-sync {}", VERSION);
            Ok(())
        }
        CliCommand::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        CliCommand::Watch(args) => run_watch(args).await,
    }
}
