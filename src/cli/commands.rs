use std::path::PathBuf;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pocscan", version, about = "Rule-driven PoC vulnerability scanner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress the progress bar and finding lines
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run rules against targets
    Scan(ScanArgs),
    /// Load and compile rules without scanning
    Validate(ValidateArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct ScanArgs {
    /// Target URL or host:port (repeatable)
    #[arg(short = 't', long = "target")]
    pub targets: Vec<String>,

    /// File with one target per line
    #[arg(short = 'T', long)]
    pub target_file: Option<PathBuf>,

    /// Rule file or directory (repeatable)
    #[arg(short = 'P', long = "rules", required_unless_present = "builtin")]
    pub rules: Vec<PathBuf>,

    /// Include the rule pack compiled into the binary
    #[arg(long)]
    pub builtin: bool,

    /// YAML engine configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum concurrent work items
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// HTTP(S) or SOCKS5 proxy for probe requests
    #[arg(long)]
    pub proxy: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries for transient network errors
    #[arg(long)]
    pub retries: Option<u32>,

    /// Default OOB wait in seconds
    #[arg(long)]
    pub oob_timeout: Option<u64>,

    /// Resume identifier; reuse it to continue an interrupted scan
    #[arg(long)]
    pub resume: Option<String>,

    /// Directory for progress logs
    #[arg(long)]
    pub resume_dir: Option<PathBuf>,

    /// Write verdicts as JSON lines to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only run rules with these severities (comma separated)
    #[arg(long)]
    pub severity: Option<String>,

    /// Only run rules whose id contains this text
    #[arg(long)]
    pub rule_id: Option<String>,

    /// Print non-vulnerable and error verdicts too
    #[arg(long)]
    pub show_all: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Rule file or directory (repeatable)
    #[arg(short = 'P', long = "rules", required_unless_present = "builtin")]
    pub rules: Vec<PathBuf>,

    /// Include the rule pack compiled into the binary
    #[arg(long)]
    pub builtin: bool,

    /// Also validate this engine configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
