use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let directive = if cli.verbose {
        "exepatch=debug"
    } else {
        "exepatch=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Command::Patch(args) => commands::patch::run(args, config),
        Command::Codepages { po } => commands::codepages::run(&po, config),
        Command::Scan { exe, po, codepage } => {
            commands::scan::run(&exe, &po, codepage.as_deref(), config)
        }
        Command::Exclusions { action } => commands::exclusions::run(action, config),
    }
}
