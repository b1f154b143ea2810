pub mod config;
pub mod export;
pub mod filter;
pub mod indexer;
pub mod model;
pub mod report;
pub mod sources;
pub mod storage;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use config::Config;
use indexer::ScanOptions;
use model::types::Origin;
use report::ReportMode;
use storage::sqlite::InventoryStore;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "photoinv",
    version,
    about = "Track which media files on this machine are missing from a remote backup"
)]
pub struct Cli {
    /// Path to the SQLite inventory (defaults to config, then platform data dir)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Path to the TOML config (defaults to $PHOTOINV_CONFIG, then platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a directory and add its files to the inventory
    Add {
        /// Directory to scan (on the remote host when --remote is set)
        #[arg(long)]
        path: PathBuf,

        /// Remote host (e.g. user@192.168.1.100 or an ssh alias). Scans locally if omitted.
        #[arg(long)]
        remote: Option<String>,

        /// Overall timeout for the remote listing, in seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
    },
    /// Report files on this machine that are missing from the remote
    Report {
        /// Show the full file list instead of a per-directory summary
        #[arg(short, long)]
        verbose: bool,

        /// Report files present on both sides under the same name but with different sizes
        #[arg(long, conflicts_with_all = ["verbose", "remote_only"])]
        wrong_size: bool,

        /// Report files seen on the remote but never on this machine
        #[arg(long, conflicts_with = "verbose")]
        remote_only: bool,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show inventory totals and recent scans
    Stats {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        /// Number of recent scans to list
        #[arg(long, default_value_t = 5)]
        recent: usize,
    },
    /// Pack every file missing from the remote into one zip archive
    Export {
        /// Archive to write
        #[arg(long)]
        output: PathBuf,

        /// Entry names are relative to this directory (defaults to home)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub fn run() -> Result<()> {
    run_with(Cli::parse())
}

pub fn run_with(cli: Cli) -> Result<()> {
    let Cli {
        db,
        config,
        command,
    } = cli;
    // Completions and man pages must work before any config exists.
    let setup = || -> Result<(Config, PathBuf)> {
        let config = load_config(config.as_deref())?;
        let db_path = config.db_path(db.as_deref());
        Ok((config, db_path))
    };
    let mut out = std::io::stdout().lock();

    match command {
        Commands::Add {
            path,
            remote,
            timeout,
        } => {
            let (config, db_path) = setup()?;
            let opts = ScanOptions {
                root: path,
                remote,
                timeout: timeout.map(Duration::from_secs),
                db_path,
            };
            let progress = spinner();
            let summary = indexer::run_scan(&opts, &config, &progress);
            progress.finish_and_clear();
            let summary = summary?;

            let side = match summary.origin() {
                Origin::Local => "local",
                Origin::Remote => "remote",
            };
            writeln!(
                out,
                "Complete. Processed {} matching {side} files ({} skipped).",
                summary.run.accepted, summary.run.skipped
            )?;
        }
        Commands::Report {
            verbose,
            wrong_size,
            remote_only,
            json,
        } => {
            let (_, db_path) = setup()?;
            let mode = if wrong_size {
                ReportMode::SizeMismatch
            } else if remote_only {
                ReportMode::MissingFromLocal
            } else if verbose {
                ReportMode::Flat
            } else {
                ReportMode::Grouped
            };
            let store = open_store(&db_path, "report")?;
            let report = report::report(&store, mode).context("report phase")?;
            if json {
                serde_json::to_writer_pretty(&mut out, &report)?;
                writeln!(out)?;
            } else {
                report.render(&mut out)?;
            }
        }
        Commands::Stats { json, recent } => {
            let (_, db_path) = setup()?;
            let store = open_store(&db_path, "report")?;
            let stats = report::stats(&store, recent).context("report phase")?;
            if json {
                serde_json::to_writer_pretty(&mut out, &stats)?;
                writeln!(out)?;
            } else {
                stats.render(&mut out)?;
            }
        }
        Commands::Export { output, root } => {
            let (_, db_path) = setup()?;
            let root = match root {
                Some(root) => root,
                None => directories::BaseDirs::new()
                    .map(|dirs| dirs.home_dir().to_path_buf())
                    .context("export phase: no home directory; pass --root")?,
            };
            let store = open_store(&db_path, "export")?;
            let stats = export::export_missing(&store, &output, &root)
                .with_context(|| format!("export phase: writing {}", output.display()))?;
            writeln!(
                out,
                "Archived {} files ({} bytes) to {}; {} skipped.",
                stats.archived,
                stats.bytes,
                output.display(),
                stats.skipped
            )?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "photoinv", &mut out);
        }
        Commands::Man => {
            clap_mangen::Man::new(Cli::command()).render(&mut out)?;
        }
    }
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = Config::resolve_path(explicit).context("config phase")?;
    Config::load_or_create(&path).context("config phase")
}

fn open_store(db_path: &Path, phase: &str) -> Result<InventoryStore> {
    InventoryStore::open(db_path)
        .with_context(|| format!("{phase} phase: opening store {}", db_path.display()))
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
