use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::session::{Outcome, SessionResult, UnitOutcome};
use crate::tags::TagSet;

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

/// Counts persisted in the session report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummaryArtifact {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success: bool,
}

/// Persisted record of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub schema_version: String,
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub strategy: String,
    pub suite_digest: String,
    pub duration_ms: u64,
    pub tags: Option<TagSet>,
    pub summary: SessionSummaryArtifact,
    pub results: Vec<UnitOutcome>,
}

impl SessionReport {
    pub fn from_result(result: &SessionResult) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            session_id: result.session_id.clone(),
            generated_at: Utc::now(),
            strategy: result.strategy.clone(),
            suite_digest: compute_suite_digest(&result.outcomes, result.tags.as_ref()),
            duration_ms: result.duration_ms,
            tags: result.tags.clone(),
            summary: SessionSummaryArtifact {
                total: result.outcomes.len(),
                passed: result.passed_count(),
                failed: result.failed_count(),
                skipped: result.skipped_count(),
                success: result.success(),
            },
            results: result.outcomes.clone(),
        }
    }
}

/// SHA-256 over the ordered unit paths, their skip states and the tag set.
///
/// Two sessions with the same digest selected the same tests in the same order.
pub fn compute_suite_digest(outcomes: &[UnitOutcome], tags: Option<&TagSet>) -> String {
    let mut hasher = Sha256::new();
    if let Some(tags) = tags {
        for (key, value) in tags.iter() {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
    }
    hasher.update(b"\x01");
    for outcome in outcomes {
        hasher.update(outcome.unit.path.to_string_lossy().as_bytes());
        let skipped = matches!(outcome.outcome, Outcome::Skipped { .. });
        hasher.update(if skipped { b"\0s" } else { b"\0r" });
    }
    hex::encode(hasher.finalize())
}

/// Write the session report as pretty JSON.
pub fn write_session_report_json(path: &Path, report: &SessionReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize session report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
