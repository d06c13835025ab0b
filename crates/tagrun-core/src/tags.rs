//! Tag resolution: ask the interpreter which build/environment tags apply.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, RunnerError};

/// Tag present in every resolved set unless the tags script overrides it.
pub const BASELINE_TAG: (&str, &str) = ("slow", "true");

/// Immutable mapping of tag name to tag value for one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// A set holding only the baseline tag.
    pub fn baseline() -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(BASELINE_TAG.0.to_string(), BASELINE_TAG.1.to_string());
        Self { tags }
    }

    /// Parse `key=value` lines from the tags script on top of the baseline.
    ///
    /// The first `=` separates key from value. Blank lines are skipped; any
    /// other line without a non-empty key and value is rejected. The script
    /// may override the baseline once but may not repeat a key.
    pub fn parse(output: &str) -> Result<Self> {
        let mut set = Self::baseline();
        let mut seen = BTreeSet::new();
        for (idx, line) in output.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once('=') {
                Some((key, _)) if seen.contains(key) => {
                    return Err(RunnerError::DuplicateTag {
                        line_no: idx + 1,
                        key: key.to_string(),
                    })
                }
                Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                    seen.insert(key);
                    set.tags.insert(key.to_string(), value.to_string());
                }
                _ => {
                    return Err(RunnerError::MalformedTagLine {
                        line_no: idx + 1,
                        line: line.to_string(),
                    })
                }
            }
        }
        Ok(set)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            tags: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Runs the interpreter against the tags script.
#[derive(Debug, Clone)]
pub struct TagResolver {
    interpreter: PathBuf,
    script: PathBuf,
}

impl TagResolver {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Spawn `<interpreter> <script>`, wait for it and parse its stdout.
    pub async fn compute_tags(&self) -> Result<TagSet> {
        let output = Command::new(&self.interpreter)
            .arg(&self.script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RunnerError::Spawn {
                interpreter: self.interpreter.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RunnerError::TagScriptFailed {
                script: self.script.clone(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tags = TagSet::parse(&stdout)?;
        debug!(count = tags.len(), script = ?self.script, "resolved tags");
        Ok(tags)
    }
}
