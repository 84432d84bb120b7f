//! A command line tool for resolving Choixe configuration templates.

use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;

pub mod commands;

/// The command line interface.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Command,

    /// The verbosity flags.
    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity,
}

/// The supported subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Resolves a configuration template into plain documents.
    Resolve(commands::resolve::ResolveArgs),

    /// Reports the variables, imports, and symbols a template requires.
    Inspect(commands::inspect::InspectArgs),
}

/// Runs the Choixe command line interface.
pub fn choixe_main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(cli.verbosity.tracing_level_filter().into())
                .from_env_lossy(),
        )
        .init();

    let result = match cli.command {
        Command::Resolve(args) => commands::resolve::resolve(args),
        Command::Inspect(args) => commands::inspect::inspect(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
