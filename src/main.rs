use clap::Parser;
use pocscan::cli;
use pocscan::errors::PocScanError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(!cli.no_color)
            .with_writer(std::io::stderr)
            .init();
    }

    if cli.no_color {
        console::set_colors_enabled(false);
    }

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        built = env!("BUILD_TIMESTAMP"),
        git = env!("GIT_HASH"),
        "pocscan starting"
    );

    let result = match cli.command {
        cli::Commands::Scan(args) => cli::scan::handle_scan(args, cli.quiet).await,
        cli::Commands::Validate(args) => cli::validate::handle_validate(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let exit_code = match &e {
            PocScanError::Config(_) => 2,
            PocScanError::RuleDefinition(_) => 3,
            PocScanError::Progress(_) => 4,
            PocScanError::InvalidTarget(_) => 5,
            PocScanError::Cancelled(_) => 130,
            _ => 1,
        };
        std::process::exit(exit_code);
    }
}
