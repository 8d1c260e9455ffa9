//! Glacier upload command-line entry point.

mod app;
mod args;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let command = match args::parse(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {e:#}");
            args::print_usage();
            std::process::exit(2);
        }
    };
    if matches!(command, args::Command::Help) {
        args::print_usage();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::load()?;
    tracing::debug!(?config, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    if let Err(e) = rt.block_on(app::run(command, config)) {
        eprintln!("error: {e:#}");
        std::process::exit(app::exit_code(&e));
    }
    Ok(())
}
