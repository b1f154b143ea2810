//! Reconciliation reports.
//!
//! Every report is built from a read-only store query and carries the count
//! of its result set. Rendering (text or JSON) never filters or reorders the
//! rows the query returned.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::model::types::{ScanRun, SizeMismatch};
use crate::storage::sqlite::{InventoryCounts, InventoryStore, StorageError};

const RULE: &str = "---------------------------------------------------------";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportMode {
    /// Missing-from-remote, counted per containing directory.
    #[default]
    Grouped,
    /// Missing-from-remote, one local path per line.
    Flat,
    /// Same name on both sides with different sizes.
    SizeMismatch,
    /// Seen on the remote but never locally.
    MissingFromLocal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryCount {
    pub directory: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    MissingGrouped {
        groups: Vec<DirectoryCount>,
        count: u64,
    },
    MissingFlat {
        paths: Vec<String>,
        count: u64,
    },
    SizeMismatch {
        pairs: Vec<SizeMismatch>,
        count: u64,
    },
    MissingFromLocal {
        paths: Vec<String>,
        count: u64,
    },
}

/// Run the query behind `mode`.
pub fn report(store: &InventoryStore, mode: ReportMode) -> Result<Report, StorageError> {
    let report = match mode {
        ReportMode::Grouped => {
            let paths = missing_local_paths(store)?;
            Report::MissingGrouped {
                count: paths.len() as u64,
                groups: group_by_directory(paths.iter().map(String::as_str)),
            }
        }
        ReportMode::Flat => {
            let paths = missing_local_paths(store)?;
            Report::MissingFlat {
                count: paths.len() as u64,
                paths,
            }
        }
        ReportMode::SizeMismatch => {
            let pairs = store.size_mismatches()?;
            Report::SizeMismatch {
                count: pairs.len() as u64,
                pairs,
            }
        }
        ReportMode::MissingFromLocal => {
            let paths: Vec<String> = store
                .missing_from_local()?
                .into_iter()
                .filter_map(|r| r.remote_path)
                .collect();
            Report::MissingFromLocal {
                count: paths.len() as u64,
                paths,
            }
        }
    };
    Ok(report)
}

fn missing_local_paths(store: &InventoryStore) -> Result<Vec<String>, StorageError> {
    Ok(store
        .missing_from_remote()?
        .into_iter()
        .filter_map(|r| r.local_path)
        .collect())
}

/// Count paths per containing directory, sorted by directory.
///
/// A bare file name counts towards `.`.
pub fn group_by_directory<'a>(paths: impl IntoIterator<Item = &'a str>) -> Vec<DirectoryCount> {
    let mut summary: BTreeMap<String, u64> = BTreeMap::new();
    for path in paths {
        let dir = match Path::new(path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        };
        *summary.entry(dir).or_default() += 1;
    }
    summary
        .into_iter()
        .map(|(directory, count)| DirectoryCount { directory, count })
        .collect()
}

impl Report {
    pub fn count(&self) -> u64 {
        match self {
            Self::MissingGrouped { count, .. }
            | Self::MissingFlat { count, .. }
            | Self::SizeMismatch { count, .. }
            | Self::MissingFromLocal { count, .. } => *count,
        }
    }

    /// Line-oriented text for a terminal.
    pub fn render(&self, out: &mut impl Write) -> io::Result<()> {
        match self {
            Self::MissingGrouped { groups, count } => {
                writeln!(out, "--- Summary of Missing Files (by Directory) ---")?;
                for group in groups {
                    writeln!(out, "{}: {}", group.directory, group.count)?;
                }
                writeln!(out, "{RULE}")?;
                writeln!(out, "Total Missing from Remote: {count}")?;
                writeln!(out, "(Use -v or --verbose to see full file list)")?;
            }
            Self::MissingFlat { paths, count } => {
                writeln!(
                    out,
                    "--- Files on Local Machine but MISSING from Remote (Backup needed) ---"
                )?;
                for path in paths {
                    writeln!(out, "{path}")?;
                }
                writeln!(out, "{RULE}")?;
                writeln!(out, "Total Missing from Remote: {count}")?;
            }
            Self::SizeMismatch { pairs, count } => {
                writeln!(out, "--- Files with Name Match but Size Mismatch ---")?;
                for pair in pairs {
                    writeln!(out, "Local:  {} ({} bytes)", pair.local_path, pair.local_size)?;
                    writeln!(
                        out,
                        "Remote: {} ({} bytes)",
                        pair.remote_path, pair.remote_size
                    )?;
                    writeln!(out)?;
                }
                writeln!(out, "{RULE}")?;
                writeln!(out, "Total Mismatches: {count}")?;
            }
            Self::MissingFromLocal { paths, count } => {
                writeln!(out, "--- Files on Remote but never seen Locally ---")?;
                for path in paths {
                    writeln!(out, "{path}")?;
                }
                writeln!(out, "{RULE}")?;
                writeln!(out, "Total Missing from Local: {count}")?;
            }
        }
        Ok(())
    }
}

/// Inventory totals plus the latest scan runs.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub counts: InventoryCounts,
    pub recent_scans: Vec<ScanRun>,
}

pub fn stats(store: &InventoryStore, recent: usize) -> Result<StatsReport, StorageError> {
    Ok(StatsReport {
        counts: store.counts()?,
        recent_scans: store.recent_scans(recent)?,
    })
}

impl StatsReport {
    pub fn render(&self, out: &mut impl Write) -> io::Result<()> {
        let c = &self.counts;
        writeln!(out, "--- Inventory ---")?;
        writeln!(out, "Tracked files:      {}", c.total)?;
        writeln!(out, "On both sides:      {}", c.both)?;
        writeln!(out, "Local only:         {}", c.local_only)?;
        writeln!(out, "Remote only:        {}", c.remote_only)?;
        if self.recent_scans.is_empty() {
            writeln!(out, "No scans recorded yet.")?;
            return Ok(());
        }
        writeln!(out, "--- Recent Scans ---")?;
        for run in &self.recent_scans {
            let location = match &run.host {
                Some(host) => format!("{host}:{}", run.root),
                None => run.root.clone(),
            };
            let secs = (run.finished_at - run.started_at) as f64 / 1000.0;
            writeln!(
                out,
                "{:<6} {location}  accepted={} skipped={} ({secs:.1}s)",
                run.origin.as_str(),
                run.accepted,
                run.skipped,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_sorts_directories() {
        let groups = group_by_directory([
            "/pics/dirY/c.jpg",
            "/pics/dirX/a.jpg",
            "/pics/dirX/b.jpg",
        ]);
        assert_eq!(
            groups,
            vec![
                DirectoryCount {
                    directory: "/pics/dirX".into(),
                    count: 2
                },
                DirectoryCount {
                    directory: "/pics/dirY".into(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn bare_names_group_under_dot() {
        let groups = group_by_directory(["a.jpg", "b.jpg"]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].directory, ".");
        assert_eq!(groups[0].count, 2);
    }

    #[test]
    fn grouped_render_lists_counts_and_total() {
        let report = Report::MissingGrouped {
            groups: group_by_directory(["/x/dirX/a.jpg", "/x/dirX/b.jpg", "/x/dirY/c.jpg"]),
            count: 3,
        };
        let mut buf = Vec::new();
        report.render(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("/x/dirX: 2\n/x/dirY: 1\n"), "{text}");
        assert!(text.contains("Total Missing from Remote: 3"));
        assert_eq!(report.count(), 3);
    }

    #[test]
    fn mismatch_render_pairs_sizes() {
        let report = Report::SizeMismatch {
            pairs: vec![SizeMismatch {
                local_path: "/l/img.jpg".into(),
                local_size: 100,
                remote_path: "/r/img.jpg".into(),
                remote_size: 200,
            }],
            count: 1,
        };
        let mut buf = Vec::new();
        report.render(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("Local:  /l/img.jpg (100 bytes)\nRemote: /r/img.jpg (200 bytes)"));
        assert!(text.contains("Total Mismatches: 1"));
    }

    #[test]
    fn json_is_tagged_by_kind() {
        let report = Report::MissingFlat {
            paths: vec!["/l/a.jpg".into()],
            count: 1,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "missing_flat");
        assert_eq!(json["count"], 1);
        assert_eq!(json["paths"][0], "/l/a.jpg");
    }
}
