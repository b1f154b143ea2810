//! Zip export of every file that still needs a backup.
//!
//! Entries are named by their path relative to a root (the home directory by
//! default) with `/` separators. A file that cannot be opened or read is
//! skipped and counted; it never aborts the archive.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::storage::sqlite::{InventoryStore, StorageError};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to create archive {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("Archive write failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub archived: u64,
    pub skipped: u64,
    pub bytes: u64,
}

/// Archive entry name for `path`: relative to `root` when it lives under it,
/// otherwise the path without its root or drive prefix.
pub fn archive_entry_name(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Write all missing-from-remote files under `root` into a zip at `output`.
pub fn export_missing(
    store: &InventoryStore,
    output: &Path,
    root: &Path,
) -> Result<ExportStats, ExportError> {
    let records = store.missing_from_remote()?;
    let file = File::create(output).map_err(|source| ExportError::Create {
        path: output.to_path_buf(),
        source,
    })?;

    let mut zip = ZipWriter::new(file);
    let mut stats = ExportStats::default();
    let mut names = HashSet::new();

    for record in &records {
        let Some(local) = record.local_path.as_deref() else {
            continue;
        };
        let path = Path::new(local);
        let name = archive_entry_name(path, root);
        if name.is_empty() || !names.insert(name.clone()) {
            warn!(path = %local, entry = %name, "skipping duplicate archive entry");
            stats.skipped += 1;
            continue;
        }

        let mut source = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %local, error = %e, "skipping unreadable file");
                stats.skipped += 1;
                continue;
            }
        };
        let len = source.metadata().map(|m| m.len()).unwrap_or(0);

        // Media is already compressed; store it as-is.
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .large_file(len >= u64::from(u32::MAX));
        zip.start_file(name.as_str(), options)?;

        match io::copy(&mut source, &mut zip) {
            Ok(written) => {
                stats.archived += 1;
                stats.bytes += written;
            }
            Err(e) => {
                warn!(path = %local, error = %e, "read failed mid-copy, dropping entry");
                zip.abort_file()?;
                names.remove(&name);
                stats.skipped += 1;
            }
        }
    }

    zip.finish()?;
    info!(
        output = %output.display(),
        archived = stats.archived,
        skipped = stats.skipped,
        bytes = stats.bytes,
        "export complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_name_is_relative_with_forward_slashes() {
        let root = Path::new("/home/me");
        assert_eq!(
            archive_entry_name(Path::new("/home/me/Pictures/vacation/missing.jpg"), root),
            "Pictures/vacation/missing.jpg"
        );
    }

    #[test]
    fn entry_name_outside_root_drops_leading_separator() {
        assert_eq!(
            archive_entry_name(Path::new("/mnt/card/DCIM/1.jpg"), Path::new("/home/me")),
            "mnt/card/DCIM/1.jpg"
        );
    }

    #[test]
    fn entry_name_never_climbs_out() {
        assert_eq!(
            archive_entry_name(Path::new("/home/me/../x/a.jpg"), Path::new("/home/me")),
            "x/a.jpg"
        );
    }
}
