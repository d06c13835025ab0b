//! Runner configuration (`tagrun.toml`).
//!
//! ```toml
//! interpreter = "bin/luajit"
//! tests_dir = "tests"
//! runner_dir = "testRunner"
//! timeout_secs = 120
//! jobs = 4
//!
//! [strategy]
//! kind = "driver"
//! script = "testRunner/driver.lua"
//! flags = ["--quiet"]
//! ```
//!
//! Relative paths in a loaded file are resolved against the file's directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "tagrun.toml";

/// How tests are discovered and launched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Walk `index` manifests and run each script directly.
    #[default]
    Index,

    /// Ask a shared driver script to list and run tests.
    Driver {
        script: PathBuf,
        #[serde(default)]
        flags: Vec<String>,
    },
}

/// Configuration for a discovery/execution session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interpreter executable.
    pub interpreter: PathBuf,

    /// Root of the test suite.
    pub tests_dir: PathBuf,

    /// Directory holding the tags script and the audit file.
    pub runner_dir: PathBuf,

    /// Tags script, relative to `runner_dir`.
    pub tags_script: String,

    /// Audit file, relative to `runner_dir`.
    pub audit_file: String,

    /// Script extension without the dot.
    pub script_extension: String,

    /// Per-test timeout in seconds (0 = none).
    pub timeout_secs: u64,

    /// Maximum concurrent test processes.
    pub jobs: usize,

    pub strategy: Strategy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("luajit"),
            tests_dir: PathBuf::from("tests"),
            runner_dir: PathBuf::from("testRunner"),
            tags_script: "tags.lua".to_string(),
            audit_file: "discovery.txt".to_string(),
            script_extension: "lua".to_string(),
            timeout_secs: 0,
            jobs: 1,
            strategy: Strategy::Index,
        }
    }
}

impl RunnerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| RunnerError::io_at(path, e))?;
        let config = Self::from_toml_str(&text)?;
        let base = path.parent().unwrap_or(Path::new(""));
        Ok(config.resolved_against(base))
    }

    /// Join relative paths onto `base`. Bare interpreter names stay on `PATH`.
    pub fn resolved_against(mut self, base: &Path) -> Self {
        let join = |p: &Path| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        if self.interpreter.components().count() > 1 {
            self.interpreter = join(&self.interpreter);
        }
        self.tests_dir = join(&self.tests_dir);
        self.runner_dir = join(&self.runner_dir);
        if let Strategy::Driver { script, .. } = &mut self.strategy {
            *script = join(script);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interpreter.as_os_str().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "interpreter must not be empty".to_string(),
            ));
        }
        if self.jobs == 0 {
            return Err(RunnerError::InvalidConfig(
                "jobs must be at least 1".to_string(),
            ));
        }
        if self.script_extension.is_empty() || self.script_extension.starts_with('.') {
            return Err(RunnerError::InvalidConfig(format!(
                "script_extension must be non-empty without a leading dot, got {:?}",
                self.script_extension
            )));
        }
        if let Strategy::Driver { script, .. } = &self.strategy {
            if script.as_os_str().is_empty() {
                return Err(RunnerError::InvalidConfig(
                    "driver strategy needs a script".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn tags_script_path(&self) -> PathBuf {
        self.runner_dir.join(&self.tags_script)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.runner_dir.join(&self.audit_file)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.interpreter, PathBuf::from("luajit"));
        assert_eq!(config.tags_script_path(), PathBuf::from("testRunner/tags.lua"));
        assert_eq!(config.audit_path(), PathBuf::from("testRunner/discovery.txt"));
        assert_eq!(config.strategy, Strategy::Index);
        assert!(config.timeout().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RunnerConfig::from_toml_str("jobs = 4\ntimeout_secs = 30\n").unwrap();
        assert_eq!(config.jobs, 4);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.script_extension, "lua");
    }

    #[test]
    fn test_driver_strategy_from_toml() {
        let config = RunnerConfig::from_toml_str(
            r#"
            [strategy]
            kind = "driver"
            script = "driver.lua"
            flags = ["--mode", "conformance"]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.strategy,
            Strategy::Driver {
                script: PathBuf::from("driver.lua"),
                flags: vec!["--mode".to_string(), "conformance".to_string()],
            }
        );
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let err = RunnerConfig::from_toml_str("[strategy]\nkind = \"magic\"\n").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RunnerConfig {
            jobs: 0,
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RunnerConfig {
            script_extension: ".lua".to_string(),
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "interpreter = \"bin/luajit\"\ntests_dir = \"suite\"\n\n[strategy]\nkind = \"driver\"\nscript = \"drv.lua\"\n",
        )
        .unwrap();

        let config = RunnerConfig::load(&path).unwrap();
        assert_eq!(config.interpreter, dir.path().join("bin/luajit"));
        assert_eq!(config.tests_dir, dir.path().join("suite"));
        assert_eq!(config.runner_dir, dir.path().join("testRunner"));
        match config.strategy {
            Strategy::Driver { script, flags } => {
                assert_eq!(script, dir.path().join("drv.lua"));
                assert!(flags.is_empty());
            }
            Strategy::Index => panic!("expected driver strategy"),
        }
    }

    #[test]
    fn test_bare_interpreter_name_not_resolved() {
        let config = RunnerConfig::default().resolved_against(Path::new("/etc/tagrun"));
        assert_eq!(config.interpreter, PathBuf::from("luajit"));
    }
}
