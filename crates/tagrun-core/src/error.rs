//! Error taxonomy for discovery and execution.

use std::path::PathBuf;

/// Errors produced while resolving tags, discovering tests or spawning the interpreter.
///
/// A nonzero exit code from a test script is *not* an error: it is reported
/// through [`crate::ExecutionResult`]. Everything here aborts the session.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("malformed tag line {line_no}: {line:?} (expected key=value)")]
    MalformedTagLine { line_no: usize, line: String },

    #[error("tag {key:?} repeated on line {line_no}")]
    DuplicateTag { line_no: usize, key: String },

    #[error("malformed tag expression {expr:?}: {reason}")]
    MalformedTagExpr { expr: String, reason: String },

    #[error("tags script {script:?} exited with code {exit_code:?}: {stderr}")]
    TagScriptFailed {
        script: PathBuf,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("test list query failed: {stderr}")]
    ListQueryFailed { stderr: String },

    #[error("manifest {manifest:?} names missing script {path:?}")]
    MissingScript { manifest: PathBuf, path: PathBuf },

    #[error("manifest {manifest:?} names missing directory {path:?}")]
    MissingDirectory { manifest: PathBuf, path: PathBuf },

    #[error("failed to spawn interpreter {interpreter:?}: {source}")]
    Spawn {
        interpreter: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error at {path:?}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Attach a path to an I/O error.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Whether this error stems from configuration rather than the environment.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MalformedTagLine { .. }
                | Self::DuplicateTag { .. }
                | Self::MalformedTagExpr { .. }
                | Self::InvalidConfig(_)
                | Self::ConfigParse(_)
        )
    }
}

/// Result type for tagrun operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
