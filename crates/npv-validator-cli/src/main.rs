mod artifacts;
mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use commands::npv::NpvArgs;
use commands::stress::StressArgs;
use commands::validate::ValidateArgs;

/// Independent challenger revalidation of loan NPV models
#[derive(Parser)]
#[command(
    name = "npvv",
    version,
    about = "Independent challenger revalidation of loan NPV models",
    long_about = "Re-values a loan portfolio with an independent challenger NPV engine, \
                  compares it against the production champion, back-tests against \
                  realized cash flows, stress-tests it under rate and cash-flow shocks, \
                  and evaluates governance thresholds. Every run is audited."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full validation pipeline and write run artifacts
    Validate(ValidateArgs),
    /// Value a portfolio with the challenger NPV engine
    Npv(NpvArgs),
    /// Run stress scenarios with waterfall attribution
    Stress(StressArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<(serde_json::Value, i32), Box<dyn std::error::Error>> = match cli.command {
        Commands::Validate(args) => commands::validate::run_validate(args),
        Commands::Npv(args) => commands::npv::run_npv(args).map(|v| (v, 0)),
        Commands::Stress(args) => commands::stress::run_stress(args).map(|v| (v, 0)),
        Commands::Version => {
            println!("npvv {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok((value, code)) => {
            output::format_output(&cli.output, &value);
            process::exit(code);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(2);
        }
    }
}
