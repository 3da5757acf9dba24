//! CLI command definitions
//!
//! Defines the clap commands for the workflow tester CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Suite file used when `-f` is not given
pub const DEFAULT_SUITE_FILE: &str = "workflow-test-suite.yml";

#[derive(Subcommand)]
pub enum Commands {
    /// Run the workflow tests of a suite file
    Run(RunArgs),

    /// Check a suite file without contacting the server
    Validate {
        /// Suite configuration file (YAML or JSON)
        #[arg(short = 'f', long = "file", default_value = DEFAULT_SUITE_FILE)]
        file: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Names of the tests to run (default: all)
    pub tests: Vec<String>,

    /// Suite configuration file (YAML or JSON)
    #[arg(short = 'f', long = "file", default_value = DEFAULT_SUITE_FILE)]
    pub file: PathBuf,

    /// Galaxy server URL
    #[arg(long)]
    pub server: Option<String>,

    /// Galaxy API key
    #[arg(long)]
    pub api_key: Option<String>,

    /// Show progress messages
    #[arg(long)]
    pub enable_logger: bool,

    /// Show debug messages
    #[arg(long)]
    pub debug: bool,

    /// Keep histories, workflows and downloaded outputs
    #[arg(long)]
    pub disable_cleanup: bool,

    /// Record failures without raising them per test
    #[arg(long)]
    pub disable_assertions: bool,

    /// Folder for downloaded outputs
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Write an xUnit report to stdout instead of the plaintext one
    #[arg(long)]
    pub xunit: bool,

    /// Write an xUnit report to this file
    #[arg(long)]
    pub xunit_file: Option<PathBuf>,

    /// Write the plaintext report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
