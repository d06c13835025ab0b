//! Shared-driver mode.
//!
//! A single driver script is handed to the interpreter together with mode
//! flags. With `--list` the driver enumerates the suite itself, one test path
//! per line relative to the tests root; a skipped test is written as
//! `!<path> <reason>`. Otherwise the driver runs the test path it is given.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, RunnerError};
use crate::orchestrator::{ExecutionResult, OutputSink, ProcessRunner};

/// Marks a skipped line in `--list` output.
pub const SKIP_MARKER: char = '!';

/// Flag asking the driver to enumerate tests.
pub const LIST_FLAG: &str = "--list";

/// One line of `--list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedTest {
    pub path: String,
    pub skip_reason: Option<String>,
}

/// Parse `--list` output. Blank lines are ignored.
pub fn parse_list_output(stdout: &str) -> Vec<ListedTest> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.strip_prefix(SKIP_MARKER) {
            Some(rest) => {
                let (path, reason) = match rest.split_once(' ') {
                    Some((path, reason)) => (path, Some(reason.trim().to_string())),
                    None => (rest, None),
                };
                ListedTest {
                    path: path.to_string(),
                    skip_reason: Some(reason.filter(|r| !r.is_empty()).unwrap_or_default()),
                }
            }
            None => ListedTest {
                path: line.to_string(),
                skip_reason: None,
            },
        })
        .collect()
}

/// Runs and enumerates tests through a shared driver script.
#[derive(Debug, Clone)]
pub struct DriverRunner {
    process: ProcessRunner,
    driver: PathBuf,
    flags: Vec<String>,
    tests_root: PathBuf,
}

impl DriverRunner {
    pub fn new(
        process: ProcessRunner,
        driver: impl Into<PathBuf>,
        flags: Vec<String>,
        tests_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            process,
            driver: driver.into(),
            flags,
            tests_root: tests_root.into(),
        }
    }

    pub fn tests_root(&self) -> &Path {
        &self.tests_root
    }

    fn base_args(&self) -> Vec<std::ffi::OsString> {
        let mut args = vec![self.driver.clone().into_os_string()];
        args.extend(self.flags.iter().map(Into::into));
        args
    }

    /// Ask the driver to enumerate the suite. Any stderr output is fatal.
    pub async fn list(&self) -> Result<Vec<ListedTest>> {
        let output = Command::new(self.process.interpreter())
            .args(self.base_args())
            .arg(LIST_FLAG)
            .current_dir(&self.tests_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RunnerError::Spawn {
                interpreter: self.process.interpreter().to_path_buf(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            return Err(RunnerError::ListQueryFailed { stderr });
        }
        if !output.status.success() {
            return Err(RunnerError::ListQueryFailed {
                stderr: format!("driver exited with {:?}", output.status.code()),
            });
        }

        let listed = parse_list_output(&String::from_utf8_lossy(&output.stdout));
        debug!(count = listed.len(), driver = ?self.driver, "driver listed tests");
        Ok(listed)
    }

    /// Run `<interpreter> <driver> <flags..> <path>` from the tests root.
    pub async fn run_test(
        &self,
        path: &Path,
        sink: Arc<dyn OutputSink>,
    ) -> Result<ExecutionResult> {
        let mut args = self.base_args();
        args.push(path.as_os_str().to_os_string());
        self.process
            .execute(args, Some(&self.tests_root), sink)
            .await
    }
}
