//! CLI entry point (spec.md §2 ambient "CLI" row): wires transports,
//! stores, and the coordinator together. Grounded in the teacher SDK's
//! `clap`-derive `Cli`/`Commands` shape.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Multi-transport conversational agent bot")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect configured transports and run the bot until interrupted.
    Run(RunArgs),
    /// Validate a config file without connecting to any transport.
    CheckConfig(CheckConfigArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the TOML config file. Defaults to the platform config dir.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite history database.
    #[arg(long, default_value = "history.sqlite3")]
    pub history_db: PathBuf,
}

#[derive(Parser, Debug)]
pub struct CheckConfigArgs {
    #[arg(short, long)]
    pub config: PathBuf,
}
