//! Discovery audit trail (`discovery.txt`).
//!
//! Records every resolved tag followed by every manifest decision:
//!
//! ```text
//! Tag: arch=x64
//! Included test /suite/basic/a.lua
//! Included test /suite/ffi ffi
//! Ignored test /suite/jit/trace.lua -nojit
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, RunnerError};
use crate::tags::TagSet;

/// Receives discovery decisions. Borrowed mutably for the whole walk.
pub trait AuditSink {
    fn write_line(&mut self, line: &str) -> Result<()>;

    fn record_tags(&mut self, tags: &TagSet) -> Result<()> {
        for (key, value) in tags.iter() {
            self.write_line(&format!("Tag: {key}={value}"))?;
        }
        Ok(())
    }

    fn record_included(&mut self, path: &Path, tag_expr: Option<&str>) -> Result<()> {
        match tag_expr {
            Some(expr) => self.write_line(&format!("Included test {} {expr}", path.display())),
            None => self.write_line(&format!("Included test {}", path.display())),
        }
    }

    fn record_ignored(&mut self, path: &Path, tag_expr: &str) -> Result<()> {
        self.write_line(&format!("Ignored test {} {tag_expr}", path.display()))
    }
}

/// Audit file, truncated on creation. Flushed by [`FileAuditLog::finish`] or on drop.
pub struct FileAuditLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileAuditLog {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RunnerError::io_at(parent, e))?;
        }
        let file = File::create(&path).map_err(|e| RunnerError::io_at(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close, surfacing any write error.
    pub fn finish(mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| RunnerError::io_at(&self.path, e))
    }
}

impl AuditSink for FileAuditLog {
    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}").map_err(|e| RunnerError::io_at(&self.path, e))
    }
}

/// In-memory audit trail.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditLog {
    pub lines: Vec<String>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditSink for MemoryAuditLog {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.lines.push(line.to_string());
        Ok(())
    }
}
