//! Chainsaw - declarative end-to-end tests for Kubernetes-style APIs
//!
//! Runs YAML test definitions against one or more clusters and reports
//! the outcome of every operation.

use clap::Parser;
use chainsaw::{cli, commands, common::logging};
use commands::Commands;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "chainsaw", about = "Declarative Kubernetes end-to-end testing")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _guard = match &cli.command {
        Commands::Test(args) => logging::init_cli(args.verbose, args.log_file.as_deref()),
        Commands::Lint { .. } => logging::init_cli(0, None),
    };

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling running tests");
            signal.cancel();
        }
    });

    if let Err(e) = cli::dispatch(cli.command, cancel).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
