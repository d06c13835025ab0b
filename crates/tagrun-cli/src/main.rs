//! tagrun - tag-filtered script test runner
//!
//! ## Commands
//!
//! - `run`: discover and execute the suite
//! - `list`: print discovered tests and their skip state
//! - `tags`: print the tags resolved for this host

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use tagrun_core::{
    build_discoverer, write_session_report_json, ConsoleSink, Outcome, OutputSink, RunnerConfig,
    SessionOptions, SessionReport, TagResolver, TestSession, TestUnit, CONFIG_FILE_NAME,
};

#[derive(Parser, Debug)]
#[command(name = "tagrun")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Discover and run tag-filtered script test suites", long_about = None)]
struct Cli {
    /// Configuration file (default: ./tagrun.toml when present)
    #[arg(long, global = true, env = "TAGRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Interpreter executable, overriding the configuration
    #[arg(long, global = true, env = "TAGRUN_INTERPRETER")]
    interpreter: Option<PathBuf>,

    /// Test suite root, overriding the configuration
    #[arg(long, global = true, env = "TAGRUN_TESTS_DIR")]
    tests_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover and run the suite
    Run {
        /// Only run tests whose `category/name` contains this text
        #[arg(short, long)]
        filter: Option<String>,

        /// Maximum concurrent interpreter processes
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Write a JSON session report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List discovered tests without running them
    List,

    /// Print the resolved tag set
    Tags,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tagrun_core::init_tracing(cli.json, level);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run {
            filter,
            jobs,
            report,
        } => cmd_run(&config, filter, jobs, report.as_deref()).await,
        Commands::List => cmd_list(&config).await,
        Commands::Tags => cmd_tags(&config).await,
    }
}

/// Explicit `--config`, else `./tagrun.toml` if present, else defaults.
/// Command-line overrides are applied last.
fn load_config(cli: &Cli) -> Result<RunnerConfig> {
    let default_path = Path::new(CONFIG_FILE_NAME);
    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load(path)
            .with_context(|| format!("Failed to load configuration {:?}", path))?,
        None if default_path.is_file() => RunnerConfig::load(default_path)
            .with_context(|| format!("Failed to load configuration {:?}", default_path))?,
        None => RunnerConfig::default(),
    };

    if let Some(interpreter) = &cli.interpreter {
        config.interpreter = interpreter.clone();
    }
    if let Some(tests_dir) = &cli.tests_dir {
        config.tests_dir = tests_dir.clone();
    }
    Ok(config)
}

async fn cmd_run(
    config: &RunnerConfig,
    filter: Option<String>,
    jobs: Option<usize>,
    report: Option<&Path>,
) -> Result<()> {
    let discoverer = build_discoverer(config)?;
    let jobs = jobs.unwrap_or(config.jobs);
    if jobs == 0 {
        anyhow::bail!("--jobs must be at least 1");
    }

    // Interleaved output needs a label per line once tests run side by side.
    let sinks = move |unit: &TestUnit| -> Arc<dyn OutputSink> {
        if jobs > 1 {
            Arc::new(ConsoleSink::labelled(unit.full_name()))
        } else {
            Arc::new(ConsoleSink::new())
        }
    };

    let session = TestSession::new(
        discoverer.as_ref(),
        SessionOptions {
            jobs,
            name_filter: filter,
        },
    );
    let result = session.run(&sinks).await.context("Test session aborted")?;

    println!();
    for outcome in &result.outcomes {
        let (mark, detail) = match &outcome.outcome {
            Outcome::Passed(exec) => ("✓", format!("{} ms", exec.duration_ms)),
            Outcome::Failed(exec) if exec.timed_out => ("✗", "timed out".to_string()),
            Outcome::Failed(exec) => ("✗", format!("exit code {:?}", exec.exit_code)),
            Outcome::Skipped { reason } => ("-", reason.clone().unwrap_or_default()),
        };
        println!("  {} {} {}", mark, outcome.unit.full_name(), detail);
    }
    println!();
    println!(
        "Summary: {} passed, {} failed, {} skipped ({} ms)",
        result.passed_count(),
        result.failed_count(),
        result.skipped_count(),
        result.duration_ms
    );

    if let Some(path) = report {
        let artifact = SessionReport::from_result(&result);
        write_session_report_json(path, &artifact)?;
        info!(path = ?path, digest = %artifact.suite_digest, "wrote session report");
    }

    if result.success() {
        println!("\n✓ All tests passed!");
        Ok(())
    } else {
        println!("Failures:");
        for failed in result.failures() {
            println!("  - {} ({})", failed.unit.full_name(), failed.unit.path.display());
        }
        anyhow::bail!("{} test(s) failed", result.failed_count())
    }
}

async fn cmd_list(config: &RunnerConfig) -> Result<()> {
    let discoverer = build_discoverer(config)?;
    let discovery = discoverer.discover().await.context("Discovery failed")?;

    for unit in &discovery.units {
        match unit.skip_reason() {
            _ if unit.is_runnable() => println!("{}", unit.full_name()),
            Some(reason) => println!("{} [skip: {}]", unit.full_name(), reason),
            None => println!("{} [skip]", unit.full_name()),
        }
    }
    println!("\n{} test(s)", discovery.units.len());
    Ok(())
}

async fn cmd_tags(config: &RunnerConfig) -> Result<()> {
    config.validate()?;
    let tags = TagResolver::new(&config.interpreter, config.tags_script_path())
        .compute_tags()
        .await
        .context("Failed to resolve tags")?;

    for (key, value) in tags.iter() {
        println!("{}={}", key, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "tagrun", "--verbose", "run", "--filter", "lang/", "--jobs", "4", "--report",
            "out.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                filter,
                jobs,
                report,
            } => {
                assert_eq!(filter.as_deref(), Some("lang/"));
                assert_eq!(jobs, Some(4));
                assert_eq!(report, Some(PathBuf::from("out.json")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tagrun",
            "list",
            "--interpreter",
            "/opt/luajit",
            "--tests-dir",
            "suite",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.interpreter, Some(PathBuf::from("/opt/luajit")));
        assert_eq!(cli.tests_dir, Some(PathBuf::from("suite")));
    }

    #[test]
    fn test_overrides_apply_on_top_of_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "interpreter = \"luajit\"\njobs = 3\n").unwrap();
        let cli = Cli::try_parse_from([
            "tagrun".to_string(),
            "--config".to_string(),
            path.display().to_string(),
            "--interpreter".to_string(),
            "/usr/bin/luajit".to_string(),
            "tags".to_string(),
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.interpreter, PathBuf::from("/usr/bin/luajit"));
        assert_eq!(config.jobs, 3);
        assert_eq!(config.tests_dir, dir.path().join("tests"));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from(["tagrun", "--config", "/nonexistent/tagrun.toml", "tags"])
            .unwrap();
        assert!(load_config(&cli).is_err());
    }
}
