//! Per-directory `index` manifests.
//!
//! One entry per line, `NAME[ TAG_EXPR]`. `NAME` is a script file or a
//! subdirectory relative to the manifest's directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, RunnerError};

/// File name of a directory manifest.
pub const MANIFEST_FILE_NAME: &str = "index";

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub tag_expr: Option<String>,
}

impl IndexEntry {
    /// Split a manifest line on its first space. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (name, rest) = match line.split_once(' ') {
            Some((name, rest)) => (name, Some(rest.trim())),
            None => (line, None),
        };
        Some(Self {
            name: name.to_string(),
            tag_expr: rest.filter(|r| !r.is_empty()).map(str::to_string),
        })
    }

    /// Whether `name` carries `extension` (ASCII case-insensitive, no leading dot).
    pub fn is_script(&self, extension: &str) -> bool {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
    }
}

/// Parse manifest text into entries, skipping blank lines.
pub fn parse_manifest(text: &str) -> Vec<IndexEntry> {
    text.lines().filter_map(IndexEntry::parse).collect()
}

/// Path of the manifest for `dir`.
pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE_NAME)
}

/// Read `dir/index` if it exists.
pub fn read_manifest(dir: &Path) -> Result<Option<Vec<IndexEntry>>> {
    let path = manifest_path(dir);
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).map_err(|e| RunnerError::io_at(&path, e))?;
    Ok(Some(parse_manifest(&text)))
}
