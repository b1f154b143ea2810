//! Scan ingestion: feed a candidate stream into the inventory store.
//!
//! A whole scan run is one [`ScanBatch`] transaction. Candidates that cannot
//! be given an identity are skipped and counted; a storage failure aborts the
//! run and rolls the batch back, leaving earlier runs untouched.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::model::types::{Origin, ScanRun};
use crate::sources::{CandidateStream, RemoteShell, SshTransport, scan_local, scan_remote};
use crate::storage::sqlite::{InventoryStore, MergeError, MergeTarget, now_millis};

/// Progress message is refreshed every this many merges.
const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Directory to scan, local or on the remote host.
    pub root: PathBuf,
    /// Remote host (`user@host` or an ssh alias). Local scan when `None`.
    pub remote: Option<String>,
    /// Overrides the configured remote timeout.
    pub timeout: Option<Duration>,
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub run: ScanRun,
    /// Files ignored by the extension filter.
    pub filtered: u64,
}

/// Open the store and run the scan described by `opts`.
pub fn run_scan(opts: &ScanOptions, config: &Config, progress: &ProgressBar) -> Result<ScanSummary> {
    let mut store = InventoryStore::open(&opts.db_path)
        .with_context(|| format!("merge phase: opening store {}", opts.db_path.display()))?;

    match &opts.remote {
        Some(host) => {
            let timeout = opts
                .timeout
                .unwrap_or_else(|| Duration::from_secs(config.remote_timeout_secs));
            let transport = SshTransport::new()
                .with_connect_timeout(config.connect_timeout_secs)
                .with_timeout(timeout);
            let root = opts.root.to_string_lossy();
            index_remote(&mut store, &transport, host, &root, config, progress)
        }
        None => index_local(&mut store, &opts.root, config, progress),
    }
}

pub fn index_local(
    store: &mut InventoryStore,
    root: &Path,
    config: &Config,
    progress: &ProgressBar,
) -> Result<ScanSummary> {
    let scan = scan_local(root, &config.filter())
        .with_context(|| format!("scan phase: local tree {}", root.display()))?;
    ingest(store, scan, progress)
}

pub fn index_remote(
    store: &mut InventoryStore,
    shell: &dyn RemoteShell,
    host: &str,
    root: &str,
    config: &Config,
    progress: &ProgressBar,
) -> Result<ScanSummary> {
    progress.set_message(format!("listing {host}:{root}"));
    let scan = scan_remote(shell, host, root, &config.filter())
        .with_context(|| format!("scan phase: remote listing {host}:{root}"))?;
    ingest(store, scan, progress)
}

/// Merge every candidate of `stream` inside one transaction.
pub fn ingest<S: CandidateStream>(
    store: &mut InventoryStore,
    mut stream: S,
    progress: &ProgressBar,
) -> Result<ScanSummary> {
    let origin = stream.origin();
    let started_at = now_millis();
    let batch = store
        .begin_scan()
        .context("merge phase: starting scan transaction")?;

    let mut merged = 0u64;
    let mut rejected = 0u64;
    for candidate in stream.by_ref() {
        match batch.merge(&candidate) {
            Ok(_) => {
                merged += 1;
                if merged % PROGRESS_EVERY == 0 {
                    progress.set_message(format!("processed {merged} {origin} files"));
                }
            }
            Err(MergeError::Identity(err)) => {
                warn!(path = %candidate.raw_path, error = %err, "skipping candidate");
                rejected += 1;
            }
            Err(MergeError::Storage(err)) => {
                return Err(err).with_context(|| {
                    format!("merge phase: storing {} candidate {}", origin, candidate.raw_path)
                });
            }
        }
    }

    let stats = stream.stats();
    let run = ScanRun {
        origin,
        host: stream.host().map(String::from),
        root: stream.root().to_string(),
        started_at,
        finished_at: now_millis(),
        accepted: merged,
        skipped: stats.skipped + rejected,
    };
    batch
        .record_scan(&run)
        .context("merge phase: recording scan run")?;
    batch.commit().context("merge phase: committing scan")?;

    info!(
        origin = %origin,
        host = run.host.as_deref().unwrap_or("-"),
        root = %run.root,
        accepted = run.accepted,
        filtered = stats.filtered,
        skipped = run.skipped,
        "scan complete"
    );

    Ok(ScanSummary {
        run,
        filtered: stats.filtered,
    })
}

impl ScanSummary {
    pub fn origin(&self) -> Origin {
        self.run.origin
    }
}
