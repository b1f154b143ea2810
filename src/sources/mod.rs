//! Candidate sources: where observations come from.
//!
//! - **local**: recursive walk of a directory tree on this machine
//! - **remote**: one `find` listing over ssh, parsed line by line
//!
//! Both produce [`Candidate`]s lazily through [`CandidateStream`] and keep a
//! running [`ScanStats`] so the caller can report how many entries were
//! accepted, filtered out, or skipped because they were unreadable or
//! malformed. Only failures that would make the whole result misleading
//! (missing root, broken transport) are returned as [`ScanError`].
//!
//! ```rust,ignore
//! use photo_inventory::sources::{scan_local, CandidateStream};
//!
//! let mut scan = scan_local(Path::new("/home/me/Pictures"), &config.filter())?;
//! for candidate in scan.by_ref() {
//!     store.merge(&candidate)?;
//! }
//! println!("{} accepted, {} skipped", scan.stats().accepted, scan.stats().skipped);
//! ```

pub mod local;
pub mod remote;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::model::types::{Candidate, Origin};

pub use local::{LocalScan, TraversalError, scan_local};
pub use remote::{
    ParseError, RemoteScan, RemoteShell, SshTransport, TransportError, find_command, scan_remote,
};

/// Fatal scan failures. Anything affecting a single entry is counted in
/// [`ScanStats`] instead.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan root {path} is missing or unreadable: {source}")]
    RootUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Scan root {0} is not a directory")]
    RootNotDirectory(PathBuf),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Running counts for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Candidates handed to the caller.
    pub accepted: u64,
    /// Files ignored by the extension filter.
    pub filtered: u64,
    /// Unreadable entries or malformed lines.
    pub skipped: u64,
}

/// A lazily produced sequence of candidates from one origin.
pub trait CandidateStream: Iterator<Item = Candidate> {
    fn origin(&self) -> Origin;

    /// Remote host label, if any.
    fn host(&self) -> Option<&str> {
        None
    }

    /// Root the scan started from, as given by the user.
    fn root(&self) -> &str;

    /// Counts so far; final once the iterator is exhausted.
    fn stats(&self) -> ScanStats;
}
