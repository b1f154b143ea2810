//! Local directory walk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use super::{CandidateStream, ScanError, ScanStats};
use crate::filter::ExtensionFilter;
use crate::model::types::{Candidate, Origin};

/// A single entry the walk could not use. Logged and counted, never fatal.
#[derive(Error, Debug)]
pub enum TraversalError {
    #[error("Cannot read {}: {message}", path.display())]
    Unreadable { path: PathBuf, message: String },

    #[error("Skipping path that is not valid UTF-8: {}", .0.display())]
    NonUtf8(PathBuf),
}

impl TraversalError {
    fn from_walk(err: &walkdir::Error, root: &Path) -> Self {
        Self::Unreadable {
            path: err.path().unwrap_or(root).to_path_buf(),
            message: err
                .io_error()
                .map_or_else(|| err.to_string(), ToString::to_string),
        }
    }
}

/// Recursive walk over a local tree, following symlinks.
pub struct LocalScan {
    root: String,
    root_path: PathBuf,
    walker: walkdir::IntoIter,
    filter: ExtensionFilter,
    stats: ScanStats,
}

/// Start a walk rooted at `root`.
///
/// Fails up front if the root does not exist, is not a directory, or cannot
/// be listed. Candidate paths are absolute.
pub fn scan_local(root: &Path, filter: &ExtensionFilter) -> Result<LocalScan, ScanError> {
    let unreadable = |source| ScanError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    };

    let root_path = std::path::absolute(root).map_err(unreadable)?;
    let meta = fs::metadata(&root_path).map_err(unreadable)?;
    if !meta.is_dir() {
        return Err(ScanError::RootNotDirectory(root.to_path_buf()));
    }
    fs::read_dir(&root_path).map_err(unreadable)?;

    let walker = WalkDir::new(&root_path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    Ok(LocalScan {
        root: root.to_string_lossy().into_owned(),
        root_path,
        walker,
        filter: filter.clone(),
        stats: ScanStats::default(),
    })
}

impl LocalScan {
    fn skip(&mut self, err: &TraversalError) {
        warn!(root = %self.root, error = %err, "skipping local entry");
        self.stats.skipped += 1;
    }
}

impl Iterator for LocalScan {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let err = TraversalError::from_walk(&err, &self.root_path);
                    self.skip(&err);
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }

            let Some(path) = entry.path().to_str() else {
                self.skip(&TraversalError::NonUtf8(entry.path().to_path_buf()));
                continue;
            };

            if !self.filter.allows(path) {
                self.stats.filtered += 1;
                continue;
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(err) => {
                    let err = TraversalError::from_walk(&err, &self.root_path);
                    self.skip(&err);
                    continue;
                }
            };
            if !meta.is_file() {
                // Sockets, fifos and devices are never media.
                self.stats.filtered += 1;
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            self.stats.accepted += 1;
            return Some(Candidate::local(path, name, meta.len()));
        }
    }
}

impl CandidateStream for LocalScan {
    fn origin(&self) -> Origin {
        Origin::Local
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn stats(&self) -> ScanStats {
        self.stats
    }
}
