use color_eyre::Result;
use panel_sync::cli::{parse_args, run_cli_command, CliCommand, USAGE};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let command = match parse_args(std::env::args()) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    // Version and help print without touching the runtime
    if matches!(command, CliCommand::Version | CliCommand::Help) {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        return runtime.block_on(run_cli_command(command));
    }

    color_eyre::install()?;
    init_logging();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_cli_command(command))
}
