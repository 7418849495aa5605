use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cairn",
    about = "cairn: an embedded, content-addressed document database",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Database directory
    #[arg(long, global = true, default_value = ".cairn")]
    pub root: PathBuf,

    /// TOML config file; `--root` still wins for the directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Save a document from a JSON object of slots
    Put(PutArgs),
    /// Print a document
    Get(GetArgs),
    /// Show a document's versions, newest first
    Log(LogArgs),
    /// Verify a document's version chain
    Verify(VerifyArgs),
    /// Query the all-slots view
    Find(FindArgs),
}

#[derive(Args)]
pub struct PutArgs {
    /// Slots as a JSON object, e.g. '{"name": "ann"}'
    pub slots: String,
    /// Update this document instead of creating one
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: String,
    /// Version hex; defaults to the head
    #[arg(long)]
    pub version: Option<String>,
}

#[derive(Args)]
pub struct LogArgs {
    pub id: String,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct VerifyArgs {
    pub id: String,
}

#[derive(Args)]
pub struct FindArgs {
    /// Exact key or array prefix, as JSON: '["name", "ann"]'
    #[arg(long)]
    pub key: Option<String>,
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub end: Option<String>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    #[arg(long)]
    pub reverse: bool,
}
