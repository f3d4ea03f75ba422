pub mod commands;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "enquote",
    about = "Enquote operator CLI",
    long_about = "Operate the Enquote quotation engine: migrations, demo data, expiry sweeps, config inspection, and smoke validation.",
    after_help = "Examples:\n  enquote doctor --json\n  enquote expire --as-of 2026-07-01T00:00:00Z\n  enquote smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load demo customers, enquiries and approval rules (idempotent)")]
    Seed,
    #[command(about = "Expire Draft and Sent quotations whose validity has lapsed")]
    Expire {
        #[arg(long, help = "Sweep as of this RFC 3339 instant instead of now")]
        as_of: Option<DateTime<Utc>>,
    },
    #[command(about = "Run readiness checks and an in-memory lifecycle walkthrough")]
    Smoke,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, schema state and approval rules")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Expire { as_of } => commands::expire::run(as_of),
        Command::Smoke => commands::smoke::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
