//! Interpreter subprocess execution.
//!
//! Both output pipes are drained by their own task for the whole life of the
//! child; the exit status is only collected once both drains have finished.
//! Reading a single pipe while the child blocks on the other one would hang.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

/// Lines with this prefix are interpreter diagnostics and are never surfaced.
pub const SEED_PREFIX: &str = "seed: ";

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives transformed output lines from running tests.
pub trait OutputSink: Send + Sync {
    fn emit(&self, stream: OutputStream, line: &str);
}

/// Writes every line to the console, optionally prefixed with a label.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    label: Option<String>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }
}

impl OutputSink for ConsoleSink {
    fn emit(&self, _stream: OutputStream, line: &str) {
        match &self.label {
            Some(label) => println!("[{label}] {line}"),
            None => println!("{line}"),
        }
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct CapturedOutput {
    lines: Mutex<Vec<(OutputStream, String)>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(OutputStream, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn stream_lines(&self, stream: OutputStream) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line)
            .collect()
    }
}

impl OutputSink for CapturedOutput {
    fn emit(&self, stream: OutputStream, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((stream, line.to_string()));
        }
    }
}

/// Drops seed lines and strips the `<interpreter>: ` prefix.
#[derive(Debug, Clone)]
pub struct LineFilter {
    exe_prefix: String,
}

impl LineFilter {
    pub fn for_interpreter(interpreter: &Path) -> Self {
        Self {
            exe_prefix: format!("{}: ", interpreter.display()),
        }
    }

    pub fn apply<'l>(&self, line: &'l str) -> Option<&'l str> {
        if line.starts_with(SEED_PREFIX) {
            return None;
        }
        let n = self.exe_prefix.len();
        match line.get(..n) {
            Some(head) if head.eq_ignore_ascii_case(&self.exe_prefix) => Some(&line[n..]),
            _ => Some(line),
        }
    }
}

/// Outcome of one interpreter run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code, `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the child was killed after exceeding the timeout.
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Passed iff the interpreter exited with code 0 on its own.
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

async fn drain<R>(
    reader: R,
    stream: OutputStream,
    filter: LineFilter,
    sink: Arc<dyn OutputSink>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    while let Some(raw) = segments.next_segment().await? {
        let decoded = String::from_utf8_lossy(&raw);
        let line = decoded.strip_suffix('\r').unwrap_or(decoded.as_ref());
        if let Some(line) = filter.apply(line) {
            sink.emit(stream, line);
        }
    }
    Ok(())
}

async fn join_drain(task: &mut JoinHandle<std::io::Result<()>>) -> Result<()> {
    match task.await {
        Ok(res) => res.map_err(RunnerError::from),
        Err(join_err) => Err(RunnerError::Io(std::io::Error::other(join_err))),
    }
}

/// Spawns the interpreter and turns its exit status into an [`ExecutionResult`].
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: PathBuf,
    filter: LineFilter,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        let interpreter = interpreter.into();
        Self {
            filter: LineFilter::for_interpreter(&interpreter),
            interpreter,
            timeout: None,
        }
    }

    /// Kill children still running after `timeout`. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `<interpreter> <args..>` in `cwd`, streaming output into `sink`.
    pub async fn execute<I, S>(
        &self,
        args: I,
        cwd: Option<&Path>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<ExecutionResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let start = Instant::now();

        let mut command = Command::new(&self.interpreter);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            interpreter: self.interpreter.clone(),
            source,
        })?;

        let missing =
            |name: &str| RunnerError::Io(std::io::Error::other(format!("{name} not captured")));
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let mut stdout_task = tokio::spawn(drain(
            stdout,
            OutputStream::Stdout,
            self.filter.clone(),
            sink.clone(),
        ));
        let mut stderr_task = tokio::spawn(drain(
            stderr,
            OutputStream::Stderr,
            self.filter.clone(),
            sink,
        ));

        // The deadline covers the exit as well: a child may close both pipes
        // and keep running.
        let finished = async {
            join_drain(&mut stdout_task).await?;
            join_drain(&mut stderr_task).await?;
            Ok::<_, RunnerError>(child.wait().await?)
        };
        let (status, timed_out) = match self.timeout {
            None => (finished.await?, false),
            Some(limit) => {
                let bounded = tokio::time::timeout(limit, finished).await;
                match bounded {
                    Ok(res) => (res?, false),
                    Err(_) => {
                        warn!(
                            interpreter = ?self.interpreter,
                            timeout = ?limit,
                            "killing interpreter after timeout"
                        );
                        if let Err(err) = child.start_kill() {
                            debug!(error = %err, "interpreter already gone");
                        }
                        stdout_task.abort();
                        stderr_task.abort();
                        (child.wait().await?, true)
                    }
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(exit_code = ?status.code(), duration_ms, timed_out, "interpreter exited");

        Ok(ExecutionResult {
            exit_code: status.code(),
            duration_ms,
            timed_out,
        })
    }
}

/// Direct mode: the interpreter runs each script on its own.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    process: ProcessRunner,
}

impl ScriptRunner {
    pub fn new(process: ProcessRunner) -> Self {
        Self { process }
    }

    pub fn process(&self) -> &ProcessRunner {
        &self.process
    }

    /// Run `<interpreter> <file name>` from the script's own directory.
    pub async fn run_test(
        &self,
        script: &Path,
        sink: Arc<dyn OutputSink>,
    ) -> Result<ExecutionResult> {
        let file_name = script.file_name().ok_or_else(|| {
            RunnerError::io_at(
                script,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a script path"),
            )
        })?;
        let cwd = script.parent().filter(|p| !p.as_os_str().is_empty());
        self.process.execute([file_name], cwd, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_lines_dropped() {
        let filter = LineFilter::for_interpreter(Path::new("/opt/luajit"));
        assert_eq!(filter.apply("seed: 12345"), None);
        assert_eq!(filter.apply(" seed: 12345"), Some(" seed: 12345"));
    }

    #[test]
    fn test_interpreter_prefix_stripped_case_insensitively() {
        let filter = LineFilter::for_interpreter(Path::new("C:\\bin\\LuaJIT.exe"));
        assert_eq!(
            filter.apply("c:\\bin\\luajit.exe: test.lua:3: boom"),
            Some("test.lua:3: boom")
        );
        assert_eq!(filter.apply("plain line"), Some("plain line"));
    }

    #[test]
    fn test_prefix_check_respects_char_boundaries() {
        let filter = LineFilter::for_interpreter(Path::new("lj"));
        assert_eq!(filter.apply("l\u{e9}"), Some("l\u{e9}"));
    }

    #[test]
    fn test_execution_result_passed() {
        let ok = ExecutionResult {
            exit_code: Some(0),
            duration_ms: 5,
            timed_out: false,
        };
        assert!(ok.passed());

        let failed = ExecutionResult {
            exit_code: Some(2),
            ..ok.clone()
        };
        assert!(!failed.passed());

        let killed = ExecutionResult {
            exit_code: None,
            timed_out: true,
            ..ok
        };
        assert!(!killed.passed());
    }

    #[test]
    fn test_captured_output_by_stream() {
        let out = CapturedOutput::new();
        out.emit(OutputStream::Stdout, "a");
        out.emit(OutputStream::Stderr, "b");
        assert_eq!(out.stream_lines(OutputStream::Stdout), vec!["a"]);
        assert_eq!(out.stream_lines(OutputStream::Stderr), vec!["b"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_drives_verdict() {
        let runner = ProcessRunner::new("sh");
        let out: Arc<dyn OutputSink> = Arc::new(CapturedOutput::new());

        let ok = runner
            .execute(["-c", "echo oops >&2; exit 0"], None, out.clone())
            .await
            .unwrap();
        assert!(ok.passed());

        let failed = runner
            .execute(["-c", "exit 2"], None, out)
            .await
            .unwrap();
        assert!(!failed.passed());
        assert_eq!(failed.exit_code, Some(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = ProcessRunner::new("sh").with_timeout(Some(Duration::from_millis(200)));
        let out: Arc<dyn OutputSink> = Arc::new(CapturedOutput::new());
        let result = runner
            .execute(["-c", "exec sleep 30"], None, out)
            .await
            .unwrap();
        assert!(result.timed_out);
        assert!(!result.passed());
        assert!(result.duration_ms < 30_000);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let runner = ProcessRunner::new("/nonexistent/tagrun-interpreter");
        let out: Arc<dyn OutputSink> = Arc::new(CapturedOutput::new());
        let err = runner
            .execute(Vec::<String>::new(), None, out)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child_with_closed_pipes() {
        let runner = ProcessRunner::new("/bin/sh").with_timeout(Some(Duration::from_millis(300)));
        let out: Arc<dyn OutputSink> = Arc::new(CapturedOutput::new());
        let result = runner
            .execute(["-c", "exec >/dev/null 2>&1; sleep 30"], None, out)
            .await
            .unwrap();
        assert!(result.timed_out);
        assert!(!result.passed());
        assert!(result.duration_ms < 10_000);
    }
}
