//! Workflow tester CLI
//!
//! Runs workflow test suites against a Galaxy server and compares the
//! produced outputs with the expected ones.

use clap::Parser;
use commands::Commands;
use wftester::common::logging::{self, Verbosity};
use wftester::{cli, commands};

#[derive(Parser)]
#[command(name = "wft", about = "Workflow tester for Galaxy")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (verbosity, log_file) = match &cli.command {
        Commands::Run(args) => (
            Verbosity::from_flags(args.enable_logger, args.debug),
            args.log_file.clone(),
        ),
        Commands::Validate { .. } => (Verbosity::Quiet, None),
    };
    let (log, guard) = logging::init_cli(verbosity, log_file.as_deref());

    let code = match cli::dispatch(cli.command, log).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_configuration() {
                cli::CONFIG_ERROR_EXIT_CODE
            } else {
                1
            }
        }
    };

    // process::exit skips destructors; flush the log file first
    drop(guard);
    std::process::exit(code);
}
