//! Test discovery strategies.
//!
//! Both strategies implement [`TestDiscoverer`]; which one a session uses is
//! decided by [`Strategy`] in the configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::audit::{AuditSink, FileAuditLog};
use crate::config::{RunnerConfig, Strategy};
use crate::driver::DriverRunner;
use crate::error::{Result, RunnerError};
use crate::obs::{emit_discovery_finished, emit_discovery_started};
use crate::orchestrator::{ExecutionResult, OutputSink, ProcessRunner, ScriptRunner};
use crate::tags::{TagResolver, TagSet};
use crate::unit::{SkipState, TestUnit};
use crate::walker::IndexWalker;

/// Units found by one discovery run.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Resolved tags, when the strategy resolves any.
    pub tags: Option<TagSet>,
    pub units: Vec<TestUnit>,
}

/// Finds test units and runs them.
#[async_trait]
pub trait TestDiscoverer: Send + Sync {
    /// Short strategy name for logs and reports.
    fn strategy_name(&self) -> &'static str;

    /// Enumerate every unit. Errors are fatal to the session.
    async fn discover(&self) -> Result<Discovery>;

    /// Execute one runnable unit.
    async fn run(&self, unit: &TestUnit, sink: Arc<dyn OutputSink>) -> Result<ExecutionResult>;
}

/// Walks `index` manifests under the tests root and runs scripts directly.
pub struct IndexDiscoverer {
    resolver: TagResolver,
    runner: ScriptRunner,
    tests_root: PathBuf,
    audit_path: PathBuf,
    extension: String,
}

impl IndexDiscoverer {
    pub fn new(
        resolver: TagResolver,
        runner: ScriptRunner,
        tests_root: impl Into<PathBuf>,
        audit_path: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            runner,
            tests_root: tests_root.into(),
            audit_path: audit_path.into(),
            extension: extension.into(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        let process = ProcessRunner::new(&config.interpreter).with_timeout(config.timeout());
        Self::new(
            TagResolver::new(&config.interpreter, config.tags_script_path()),
            ScriptRunner::new(process),
            &config.tests_dir,
            config.audit_path(),
            &config.script_extension,
        )
    }

    /// Resolve tags only, without walking the suite.
    pub async fn resolve_tags(&self) -> Result<TagSet> {
        self.resolver.compute_tags().await
    }
}

#[async_trait]
impl TestDiscoverer for IndexDiscoverer {
    fn strategy_name(&self) -> &'static str {
        "index"
    }

    async fn discover(&self) -> Result<Discovery> {
        let start = Instant::now();
        emit_discovery_started(self.strategy_name(), &self.tests_root);

        // Created up front so a failed run never leaves a stale trail behind.
        let mut audit = FileAuditLog::create(&self.audit_path)?;
        let tags = self.resolver.compute_tags().await?;
        audit.record_tags(&tags)?;

        let units = IndexWalker::new(&self.tests_root, &tags, &mut audit, self.extension.as_str())
            .collect::<Result<Vec<_>>>()?;
        audit.finish()?;

        emit_discovery_finished(
            self.strategy_name(),
            units.len(),
            start.elapsed().as_millis() as u64,
        );
        Ok(Discovery {
            tags: Some(tags),
            units,
        })
    }

    async fn run(&self, unit: &TestUnit, sink: Arc<dyn OutputSink>) -> Result<ExecutionResult> {
        self.runner.run_test(&unit.path, sink).await
    }
}

/// Lets a shared driver script list, classify and run tests.
pub struct DriverDiscoverer {
    driver: DriverRunner,
    driver_script: PathBuf,
}

impl DriverDiscoverer {
    pub fn new(driver: DriverRunner, driver_script: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            driver_script: driver_script.into(),
        }
    }

    pub fn from_config(config: &RunnerConfig, script: &std::path::Path, flags: &[String]) -> Self {
        let process = ProcessRunner::new(&config.interpreter).with_timeout(config.timeout());
        Self::new(
            DriverRunner::new(process, script, flags.to_vec(), &config.tests_dir),
            script,
        )
    }
}

#[async_trait]
impl TestDiscoverer for DriverDiscoverer {
    fn strategy_name(&self) -> &'static str {
        "driver"
    }

    async fn discover(&self) -> Result<Discovery> {
        let start = Instant::now();
        let root = self.driver.tests_root();
        emit_discovery_started(self.strategy_name(), root);

        let root = std::path::absolute(root).map_err(|e| RunnerError::io_at(root, e))?;
        let mut units = Vec::new();
        for listed in self.driver.list().await? {
            let path = root.join(&listed.path);
            if !path.is_file() {
                return Err(RunnerError::MissingScript {
                    manifest: self.driver_script.clone(),
                    path,
                });
            }
            let skip = match listed.skip_reason {
                None => SkipState::Runnable,
                Some(reason) => SkipState::Ignored {
                    reason: (!reason.is_empty()).then_some(reason),
                },
            };
            units.push(TestUnit::new(&root, path, skip));
        }

        emit_discovery_finished(
            self.strategy_name(),
            units.len(),
            start.elapsed().as_millis() as u64,
        );
        Ok(Discovery { tags: None, units })
    }

    async fn run(&self, unit: &TestUnit, sink: Arc<dyn OutputSink>) -> Result<ExecutionResult> {
        self.driver.run_test(&unit.path, sink).await
    }
}

/// Build the discoverer selected by `config.strategy`.
pub fn build_discoverer(config: &RunnerConfig) -> Result<Box<dyn TestDiscoverer>> {
    config.validate()?;
    Ok(match &config.strategy {
        Strategy::Index => Box::new(IndexDiscoverer::from_config(config)),
        Strategy::Driver { script, flags } => {
            Box::new(DriverDiscoverer::from_config(config, script, flags))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_discoverer_follows_strategy() {
        let config = RunnerConfig::default();
        assert_eq!(build_discoverer(&config).unwrap().strategy_name(), "index");

        let config = RunnerConfig {
            strategy: Strategy::Driver {
                script: PathBuf::from("driver.lua"),
                flags: vec![],
            },
            ..RunnerConfig::default()
        };
        assert_eq!(build_discoverer(&config).unwrap().strategy_name(), "driver");
    }

    #[test]
    fn test_build_discoverer_validates() {
        let config = RunnerConfig {
            jobs: 0,
            ..RunnerConfig::default()
        };
        assert!(build_discoverer(&config).is_err());
    }
}
