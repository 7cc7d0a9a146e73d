use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "reelcheck", about = "Evaluate short-form videos against a rubric")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage provider API keys
    Auth(commands::auth::AuthArgs),
    /// List evaluation backends and whether they can run here
    Backends(commands::backends::BackendsArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Summarize the cost ledger
    Costs(commands::costs::CostsArgs),
    /// Evaluate one video
    Evaluate(commands::evaluate::EvaluateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Auth(args) => commands::auth::run(args),
        Commands::Backends(args) => commands::backends::run(args).await,
        Commands::Config(args) => commands::config::run(args),
        Commands::Costs(args) => commands::costs::run(args).await,
        Commands::Evaluate(args) => commands::evaluate::run(args).await,
    }
}
