//! Session orchestration: discover once, then run every unit.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::discoverer::TestDiscoverer;
use crate::error::Result;
use crate::obs::{
    emit_session_finished, emit_test_finished, emit_test_skipped, emit_test_started, session_span,
};
use crate::orchestrator::{ExecutionResult, OutputSink};
use crate::tags::TagSet;
use crate::unit::{SkipState, TestUnit};

/// Produces the output sink for each executed unit.
pub type SinkFactory = dyn Fn(&TestUnit) -> Arc<dyn OutputSink> + Send + Sync;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Maximum concurrent interpreter processes.
    pub jobs: usize,

    /// Only units whose `category/name` contains this substring run.
    pub name_filter: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            name_filter: None,
        }
    }
}

/// Verdict for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed(ExecutionResult),
    Failed(ExecutionResult),
    Skipped { reason: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: TestUnit,
    pub outcome: Outcome,
}

/// Result of a complete session.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub session_id: String,
    pub strategy: String,
    pub tags: Option<TagSet>,
    /// Outcomes in discovery order.
    pub outcomes: Vec<UnitOutcome>,
    pub duration_ms: u64,
}

impl SessionResult {
    pub fn passed_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed(_)))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    /// True when nothing failed.
    pub fn success(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}

/// Runs every discovered unit through its discoverer.
pub struct TestSession<'a> {
    discoverer: &'a dyn TestDiscoverer,
    options: SessionOptions,
}

impl<'a> TestSession<'a> {
    pub fn new(discoverer: &'a dyn TestDiscoverer, options: SessionOptions) -> Self {
        Self {
            discoverer,
            options,
        }
    }

    /// Discover, then execute. Discovery and spawn errors abort the session;
    /// failing tests do not.
    pub async fn run(&self, sinks: &SinkFactory) -> Result<SessionResult> {
        let session_id = Uuid::new_v4().to_string();
        let span = session_span(&session_id);
        self.run_session(session_id, sinks).instrument(span).await
    }

    async fn run_session(&self, session_id: String, sinks: &SinkFactory) -> Result<SessionResult> {
        let start = Instant::now();
        let discovery = self.discoverer.discover().await?;
        let units: Vec<TestUnit> = discovery
            .units
            .into_iter()
            .filter(|unit| match &self.options.name_filter {
                Some(needle) => unit.full_name().contains(needle.as_str()),
                None => true,
            })
            .collect();

        info!(
            units = units.len(),
            jobs = self.options.jobs,
            strategy = self.discoverer.strategy_name(),
            "running tests"
        );

        let discoverer = self.discoverer;
        let outcomes: Vec<UnitOutcome> = stream::iter(units)
            .map(|unit| async move {
                let name = unit.full_name();
                let outcome = match &unit.skip {
                    SkipState::Ignored { reason } => {
                        emit_test_skipped(&name, reason.as_deref());
                        Outcome::Skipped {
                            reason: reason.clone(),
                        }
                    }
                    SkipState::Runnable => {
                        emit_test_started(&name);
                        let result = discoverer.run(&unit, sinks(&unit)).await?;
                        emit_test_finished(
                            &name,
                            result.passed(),
                            result.exit_code,
                            result.duration_ms,
                        );
                        if result.passed() {
                            Outcome::Passed(result)
                        } else {
                            Outcome::Failed(result)
                        }
                    }
                };
                Ok::<_, crate::error::RunnerError>(UnitOutcome { unit, outcome })
            })
            .buffered(self.options.jobs.max(1))
            .try_collect()
            .await?;

        let result = SessionResult {
            session_id,
            strategy: self.discoverer.strategy_name().to_string(),
            tags: discovery.tags,
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        emit_session_finished(
            result.passed_count(),
            result.failed_count(),
            result.skipped_count(),
            result.duration_ms,
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discoverer::Discovery;
    use crate::error::RunnerError;
    use crate::orchestrator::CapturedOutput;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct FakeDiscoverer {
        units: Vec<TestUnit>,
        fail_spawn: bool,
    }

    fn unit(rel: &str, skip: SkipState) -> TestUnit {
        TestUnit::new(Path::new("/suite"), PathBuf::from("/suite").join(rel), skip)
    }

    #[async_trait]
    impl TestDiscoverer for FakeDiscoverer {
        fn strategy_name(&self) -> &'static str {
            "fake"
        }

        async fn discover(&self) -> Result<Discovery> {
            Ok(Discovery {
                tags: Some(TagSet::baseline()),
                units: self.units.clone(),
            })
        }

        async fn run(
            &self,
            unit: &TestUnit,
            _sink: Arc<dyn OutputSink>,
        ) -> Result<ExecutionResult> {
            if self.fail_spawn {
                return Err(RunnerError::Io(std::io::Error::other("spawn refused")));
            }
            let exit_code = if unit.name.starts_with("bad") { 1 } else { 0 };
            Ok(ExecutionResult {
                exit_code: Some(exit_code),
                duration_ms: 1,
                timed_out: false,
            })
        }
    }

    fn captured(_: &TestUnit) -> Arc<dyn OutputSink> {
        Arc::new(CapturedOutput::new())
    }

    #[tokio::test]
    async fn test_session_counts_and_order() {
        let discoverer = FakeDiscoverer {
            units: vec![
                unit("a/good.lua", SkipState::Runnable),
                unit("a/bad.lua", SkipState::Runnable),
                unit(
                    "b/skipped.lua",
                    SkipState::Ignored {
                        reason: Some("no jit".to_string()),
                    },
                ),
            ],
            fail_spawn: false,
        };
        let session = TestSession::new(
            &discoverer,
            SessionOptions {
                jobs: 2,
                name_filter: None,
            },
        );
        let result = session.run(&captured).await.unwrap();

        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.skipped_count(), 1);
        assert!(!result.success());
        let names: Vec<String> = result.outcomes.iter().map(|o| o.unit.full_name()).collect();
        assert_eq!(names, vec!["a/good", "a/bad", "b/skipped"]);
        assert_eq!(
            result.outcomes[2].outcome,
            Outcome::Skipped {
                reason: Some("no jit".to_string())
            }
        );
        assert_eq!(result.failures().count(), 1);
    }

    #[tokio::test]
    async fn test_name_filter() {
        let discoverer = FakeDiscoverer {
            units: vec![
                unit("lang/gc.lua", SkipState::Runnable),
                unit("ffi/bad_cdata.lua", SkipState::Runnable),
            ],
            fail_spawn: false,
        };
        let session = TestSession::new(
            &discoverer,
            SessionOptions {
                jobs: 1,
                name_filter: Some("lang/".to_string()),
            },
        );
        let result = session.run(&captured).await.unwrap();
        assert_eq!(result.outcomes.len(), 1);
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_spawn_error_aborts_session() {
        let discoverer = FakeDiscoverer {
            units: vec![unit("a/good.lua", SkipState::Runnable)],
            fail_spawn: true,
        };
        let session = TestSession::new(&discoverer, SessionOptions::default());
        assert!(session.run(&captured).await.is_err());
    }
}
