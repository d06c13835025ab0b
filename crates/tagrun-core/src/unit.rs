//! Discovered test units.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Whether a unit should be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SkipState {
    Runnable,
    Ignored { reason: Option<String> },
}

/// One runnable script test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUnit {
    /// Absolute path of the script.
    pub path: PathBuf,

    /// File name of the script without its extension.
    pub name: String,

    /// Parent directory relative to the tests root, `/`-separated; empty at the root.
    pub category: String,

    pub skip: SkipState,
}

impl TestUnit {
    /// Build a unit for `path`, deriving name and category relative to `root`.
    pub fn new(root: &Path, path: PathBuf, skip: SkipState) -> Self {
        let rel = path.strip_prefix(root).unwrap_or(&path);
        let name = rel
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let category = rel
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();
        Self {
            path,
            name,
            category,
            skip,
        }
    }

    /// `category/name`, or just `name` at the root.
    pub fn full_name(&self) -> String {
        if self.category.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.category, self.name)
        }
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.skip, SkipState::Runnable)
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match &self.skip {
            SkipState::Runnable => None,
            SkipState::Ignored { reason } => reason.as_deref(),
        }
    }
}
