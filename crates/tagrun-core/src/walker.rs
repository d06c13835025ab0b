//! Depth-first walk over `index` manifests.
//!
//! [`IndexWalker`] is a lazy iterator: a manifest is read only when the walk
//! reaches its directory. Entries filtered out by their tag expression are
//! recorded in the audit trail and produce no unit at all. Directories without
//! a manifest are traversed by listing their subdirectories in name order.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::audit::AuditSink;
use crate::error::{Result, RunnerError};
use crate::filter::TagExpr;
use crate::manifest::{manifest_path, read_manifest, IndexEntry};
use crate::tags::TagSet;
use crate::unit::{SkipState, TestUnit};

enum Frame {
    Manifest {
        dir: PathBuf,
        entries: std::vec::IntoIter<IndexEntry>,
    },
    Listing {
        dirs: std::vec::IntoIter<PathBuf>,
    },
}

/// Iterator over the test units below a tests root.
///
/// Yields at most one error, after which it is exhausted.
pub struct IndexWalker<'a> {
    root: PathBuf,
    pending_root: Option<PathBuf>,
    tags: &'a TagSet,
    audit: &'a mut dyn AuditSink,
    extension: String,
    stack: Vec<Frame>,
    done: bool,
}

impl<'a> IndexWalker<'a> {
    /// `extension` is the script extension without its dot, e.g. `lua`.
    pub fn new(
        root: impl Into<PathBuf>,
        tags: &'a TagSet,
        audit: &'a mut dyn AuditSink,
        extension: impl Into<String>,
    ) -> Self {
        let root = root.into();
        Self {
            root: root.clone(),
            pending_root: Some(root),
            tags,
            audit,
            extension: extension.into(),
            stack: Vec::new(),
            done: false,
        }
    }

    /// Absolute tests root once the walk has started.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn enter(&mut self, dir: &Path) -> Result<()> {
        if let Some(entries) = read_manifest(dir)? {
            trace!(dir = ?dir, entries = entries.len(), "entering manifest directory");
            self.stack.push(Frame::Manifest {
                dir: dir.to_path_buf(),
                entries: entries.into_iter(),
            });
            return Ok(());
        }

        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| RunnerError::io_at(dir, e))? {
            let path = entry.map_err(|e| RunnerError::io_at(dir, e))?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        trace!(dir = ?dir, subdirs = dirs.len(), "listing directory without manifest");
        self.stack.push(Frame::Listing {
            dirs: dirs.into_iter(),
        });
        Ok(())
    }

    fn visit(&mut self, dir: &Path, entry: IndexEntry) -> Result<Option<TestUnit>> {
        let path = dir.join(&entry.name);

        if let Some(raw) = entry.tag_expr.as_deref() {
            let expr = TagExpr::parse(raw)?;
            if !expr.evaluate(self.tags) {
                debug!(path = ?path, expr = %raw, "excluded by tag expression");
                self.audit.record_ignored(&path, raw)?;
                return Ok(None);
            }
        }
        self.audit
            .record_included(&path, entry.tag_expr.as_deref())?;

        if entry.is_script(&self.extension) {
            if !path.is_file() {
                return Err(RunnerError::MissingScript {
                    manifest: manifest_path(dir),
                    path,
                });
            }
            return Ok(Some(TestUnit::new(&self.root, path, SkipState::Runnable)));
        }

        if !path.is_dir() {
            return Err(RunnerError::MissingDirectory {
                manifest: manifest_path(dir),
                path,
            });
        }
        self.enter(&path)?;
        Ok(None)
    }

    fn advance(&mut self) -> Result<Option<TestUnit>> {
        if let Some(root) = self.pending_root.take() {
            let root = std::path::absolute(&root).map_err(|e| RunnerError::io_at(&root, e))?;
            self.root = root.clone();
            self.enter(&root)?;
        }

        while let Some(frame) = self.stack.last_mut() {
            match frame {
                Frame::Manifest { dir, entries } => {
                    let Some(entry) = entries.next() else {
                        self.stack.pop();
                        continue;
                    };
                    let dir = dir.clone();
                    if let Some(unit) = self.visit(&dir, entry)? {
                        return Ok(Some(unit));
                    }
                }
                Frame::Listing { dirs } => {
                    let Some(sub) = dirs.next() else {
                        self.stack.pop();
                        continue;
                    };
                    self.enter(&sub)?;
                }
            }
        }
        Ok(None)
    }
}

impl Iterator for IndexWalker<'_> {
    type Item = Result<TestUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(unit)) => Some(Ok(unit)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn names(root: &Path, tags: &TagSet) -> Vec<String> {
        let mut audit = MemoryAuditLog::new();
        IndexWalker::new(root, tags, &mut audit, "lua")
            .map(|u| u.unwrap().full_name())
            .collect()
    }

    #[test]
    fn test_manifest_order_and_recursion() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index", "z.lua\nsub\na.lua\n");
        write(root, "z.lua", "");
        write(root, "a.lua", "");
        write(root, "sub/index", "inner.lua\n");
        write(root, "sub/inner.lua", "");

        let tags = TagSet::baseline();
        assert_eq!(names(root, &tags), vec!["z", "sub/inner", "a"]);
    }

    #[test]
    fn test_tag_filtered_entry_is_omitted_and_audited() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index", "foo.lua slow>0\nbar.lua\n");
        write(root, "foo.lua", "");
        write(root, "bar.lua", "");

        let tags = TagSet::parse("slow=0").unwrap();
        let mut audit = MemoryAuditLog::new();
        let units: Vec<_> = IndexWalker::new(root, &tags, &mut audit, "lua")
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "bar");
        assert!(audit.lines[0].starts_with("Ignored test "));
        assert!(audit.lines[0].ends_with("foo.lua slow>0"));
        assert!(audit.lines[1].starts_with("Included test "));
        assert!(audit.lines[1].ends_with("bar.lua"));
    }

    #[test]
    fn test_excluded_directory_is_not_entered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index", "ffi -slow\n");
        // Would fail with MissingScript if entered.
        write(root, "ffi/index", "missing.lua\n");

        let tags = TagSet::baseline();
        assert!(names(root, &tags).is_empty());
    }

    #[test]
    fn test_missing_script_is_fatal_and_fuses() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index", "ghost.lua\nreal.lua\n");
        write(root, "real.lua", "");

        let tags = TagSet::baseline();
        let mut audit = MemoryAuditLog::new();
        let mut walker = IndexWalker::new(root, &tags, &mut audit, "lua");
        assert!(matches!(
            walker.next(),
            Some(Err(RunnerError::MissingScript { .. }))
        ));
        assert!(walker.next().is_none());
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index", "nowhere\n");
        let tags = TagSet::baseline();
        let mut audit = MemoryAuditLog::new();
        let result: Result<Vec<_>> =
            IndexWalker::new(dir.path(), &tags, &mut audit, "lua").collect();
        assert!(matches!(result, Err(RunnerError::MissingDirectory { .. })));
    }

    #[test]
    fn test_malformed_expression_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index", "a.lua >3\n");
        write(dir.path(), "a.lua", "");
        let tags = TagSet::baseline();
        let mut audit = MemoryAuditLog::new();
        let result: Result<Vec<_>> =
            IndexWalker::new(dir.path(), &tags, &mut audit, "lua").collect();
        assert!(matches!(result, Err(RunnerError::MalformedTagExpr { .. })));
    }

    #[test]
    fn test_walk_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index", "a.lua\n");
        write(dir.path(), "a.lua", "");
        let tags = TagSet::baseline();
        assert_eq!(names(dir.path(), &tags), names(dir.path(), &tags));
    }
}
