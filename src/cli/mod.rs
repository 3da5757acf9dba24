//! CLI command handling
//!
//! Resolves the server connection, runs the suite and prints the results.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use colored::Colorize;

use crate::commands::{Commands, RunArgs};
use crate::common::config::{Config, ServerDefaults};
use crate::common::logging::LogControl;
use crate::common::{Error, Result};
use crate::service::galaxy::GalaxyClient;
use crate::testing::report::{self, ReportFormat};
use crate::testing::{
    ComparatorRegistry, RunContext, RunOptions, ServerConfig, TestSuiteResult, TestSuiteRunner,
    TestSuiteSpec,
};

/// Exit code for configuration problems
pub const CONFIG_ERROR_EXIT_CODE: i32 = 99;

/// Dispatch a CLI command; returns the process exit code
pub async fn dispatch(command: Commands, log: LogControl) -> Result<i32> {
    match command {
        Commands::Run(args) => run(args, log).await,
        Commands::Validate { file } => validate(&file),
    }
}

/// Connection settings after applying every source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConnection {
    pub url: String,
    pub api_key: String,
}

/// Pick the server connection: CLI flag > suite file > environment > user config
pub fn resolve_server(
    cli: &ServerConfig,
    suite: &ServerConfig,
    env: &ServerConfig,
    user: &ServerDefaults,
) -> Result<ServerConnection> {
    let url = cli
        .url
        .clone()
        .or_else(|| suite.url.clone())
        .or_else(|| env.url.clone())
        .or_else(|| user.url.clone())
        .ok_or_else(|| {
            Error::Config("Galaxy URL not set (use --server, galaxy_url or GALAXY_URL)".into())
        })?;
    let api_key = cli
        .api_key
        .clone()
        .or_else(|| suite.api_key.clone())
        .or_else(|| env.api_key.clone())
        .or_else(|| user.api_key.clone())
        .ok_or_else(|| {
            Error::Config(
                "Galaxy API key not set (use --api-key, galaxy_api_key or GALAXY_API_KEY)".into(),
            )
        })?;
    Ok(ServerConnection { url, api_key })
}

fn env_server() -> ServerConfig {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    ServerConfig {
        url: var("GALAXY_URL"),
        api_key: var("GALAXY_API_KEY"),
    }
}

/// Flags given on the command line; unset ones defer to the suite file
fn cli_overrides(args: &RunArgs) -> RunOptions {
    let flag = |set: bool| set.then_some(true);
    RunOptions {
        enable_logger: flag(args.enable_logger),
        enable_debug: flag(args.debug),
        disable_cleanup: flag(args.disable_cleanup),
        disable_assertions: flag(args.disable_assertions),
    }
}

async fn run(args: RunArgs, log: LogControl) -> Result<i32> {
    let config = Config::load()?;
    let suite = TestSuiteSpec::load_with_default(
        &args.file,
        args.output.as_deref(),
        Path::new(&config.output.folder),
    )?;

    let server = resolve_server(
        &ServerConfig {
            url: args.server.clone(),
            api_key: args.api_key.clone(),
        },
        &suite.server,
        &env_server(),
        &config.server,
    )?;
    tracing::debug!("Using Galaxy server {}", server.url);

    let client = GalaxyClient::new(&server.url, &server.api_key)?;
    let ctx = RunContext::new(Arc::new(client))
        .with_poll(config.poll_settings())
        .with_log(log);

    write_banner(
        &mut std::io::stdout(),
        &mut std::io::stderr(),
        args.xunit,
        &suite.name,
        &args.file,
    )?;

    let mut runner = TestSuiteRunner::new(ctx, suite).with_overrides(cli_overrides(&args));
    let filter = (!args.tests.is_empty()).then_some(args.tests.as_slice());
    let result = runner.run(filter).await?;

    if args.xunit {
        report::write_report(&mut std::io::stdout(), &result, ReportFormat::Xunit)?;
    } else {
        print_results(&result);
    }
    if let Some(path) = &args.xunit_file {
        write_report_file(path, &result, ReportFormat::Xunit)?;
    }
    if let Some(path) = &args.report {
        write_report_file(path, &result, ReportFormat::Plaintext)?;
    }

    Ok(result.exit_code())
}

/// Announce the suite; stdout is left to the report in xUnit mode
fn write_banner<'a>(
    out: &'a mut dyn Write,
    err: &'a mut dyn Write,
    xunit: bool,
    suite: &str,
    file: &Path,
) -> std::io::Result<()> {
    let banner = format!(
        "\n{} {} ({})",
        "Running Suite:".blue().bold(),
        suite.white().bold(),
        file.display()
    );
    let target = if xunit { err } else { out };
    writeln!(target, "{}", banner)
}

fn write_report_file(path: &Path, result: &TestSuiteResult, format: ReportFormat) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::fs::File::create(path)?;
    report::write_report(&mut file, result, format)?;
    println!("Report written to {}", path.display());
    Ok(())
}

fn print_results(result: &TestSuiteResult) {
    println!();
    for case in result.results() {
        if case.passed() {
            println!(
                "  {} {} {}",
                "✓".green(),
                case.case_name,
                format!("({:.2}s)", case.duration.as_secs_f64()).dimmed()
            );
            continue;
        }

        println!("  {} {}", "✗".red(), case.case_name.red());
        for output in case.failed_outputs() {
            println!("      {} {}", "differs:".yellow(), output);
        }
        for error in &case.errors {
            println!("      {} {}", "error:".red(), error.dimmed());
        }
    }

    println!();
    let summary = format!(
        "{} passed, {} failed ({} tests, {:.2}s)",
        result.passed_count(),
        result.failed_count(),
        result.len(),
        result.duration.as_secs_f64()
    );
    if result.failed_count() == 0 {
        println!("{} {}", "PASSED".green().bold(), summary);
    } else {
        println!("{} {}", "FAILED".red().bold(), summary);
    }
}

fn validate(file: &Path) -> Result<i32> {
    let suite = TestSuiteSpec::load(file, None)?;
    let comparators = ComparatorRegistry::with_defaults();

    println!(
        "\n{} {}",
        "Validating Suite:".blue().bold(),
        suite.name.white().bold()
    );

    let mut invalid = 0;
    for case in suite.cases() {
        let problems = case.validate(&comparators);
        if problems.is_empty() {
            println!("  {} {}", "✓".green(), case.name);
            continue;
        }
        invalid += 1;
        println!("  {} {}", "✗".red(), case.name.red());
        for problem in problems {
            println!("      {}", problem.dimmed());
        }
    }

    if invalid == 0 {
        println!("\n{} {} tests", "VALID".green().bold(), suite.cases().len());
        Ok(0)
    } else {
        println!("\n{} {} of {} tests", "INVALID".red().bold(), invalid, suite.cases().len());
        Ok(CONFIG_ERROR_EXIT_CODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(url: Option<&str>, key: Option<&str>) -> ServerConfig {
        ServerConfig {
            url: url.map(str::to_string),
            api_key: key.map(str::to_string),
        }
    }

    #[test]
    fn test_cli_wins() {
        let resolved = resolve_server(
            &server(Some("http://cli"), None),
            &server(Some("http://suite"), Some("suite-key")),
            &server(Some("http://env"), Some("env-key")),
            &ServerDefaults::default(),
        )
        .unwrap();
        assert_eq!(resolved.url, "http://cli");
        assert_eq!(resolved.api_key, "suite-key");
    }

    #[test]
    fn test_env_before_user_config() {
        let user = ServerDefaults {
            url: Some("http://user".into()),
            api_key: Some("user-key".into()),
        };
        let resolved = resolve_server(
            &server(None, None),
            &server(None, None),
            &server(Some("http://env"), None),
            &user,
        )
        .unwrap();
        assert_eq!(resolved.url, "http://env");
        assert_eq!(resolved.api_key, "user-key");
    }

    #[test]
    fn test_banner_stays_off_xunit_stdout() {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        write_banner(&mut out, &mut err, true, "suite", Path::new("suite.yml")).unwrap();
        assert!(out.is_empty());
        assert!(String::from_utf8(err).unwrap().contains("suite.yml"));

        let (mut out, mut err) = (Vec::new(), Vec::new());
        write_banner(&mut out, &mut err, false, "suite", Path::new("suite.yml")).unwrap();
        assert!(err.is_empty());
        assert!(String::from_utf8(out).unwrap().contains("suite.yml"));
    }

    #[test]
    fn test_missing_server_is_config_error() {
        let err = resolve_server(
            &server(None, Some("k")),
            &server(None, None),
            &server(None, None),
            &ServerDefaults::default(),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }
}
