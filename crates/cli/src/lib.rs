pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "shopassist",
    about = "ShopAssist operator CLI",
    long_about = "Inspect ShopAssist configuration, run readiness checks, and validate the product catalog.",
    after_help = "Examples:\n  shopassist doctor --json\n  shopassist config\n  shopassist catalog --path catalog.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, oracle credentials, and catalog loading")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Load the catalog and print its normalized entries as JSON")]
    Catalog {
        #[arg(long, help = "Catalog file to load instead of the configured catalog.path")]
        path: Option<PathBuf>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Catalog { path } => commands::catalog::run(path.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
