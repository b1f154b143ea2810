//! Inventory entity structs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which filesystem a file was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single in-scope file observed by one scan, before identity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub origin: Origin,
    /// Path as reported by the origin (absolute for local scans).
    pub raw_path: String,
    /// Base name of the file.
    pub name: String,
    pub size: Option<u64>,
    /// Remote host label; `None` for local candidates.
    pub host: Option<String>,
}

impl Candidate {
    pub fn local(raw_path: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            origin: Origin::Local,
            raw_path: raw_path.into(),
            name: name.into(),
            size: Some(size),
            host: None,
        }
    }

    pub fn remote(
        host: impl Into<String>,
        raw_path: impl Into<String>,
        name: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            origin: Origin::Remote,
            raw_path: raw_path.into(),
            name: name.into(),
            size: Some(size),
            host: Some(host.into()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("candidate {0} has no size; cannot derive a name+size identity")]
    MissingSize(String),
    #[error("candidate {0} has an empty file name")]
    EmptyName(String),
}

/// Identity scheme tag stamped into every store.
///
/// Stores created under one scheme cannot be reused under another; there is
/// no migration path, a fresh store is required.
pub const IDENTITY_SCHEME: &str = "name_size";

/// Composite identity: base name plus byte size.
///
/// Two files with the same name and size anywhere in either tree are treated
/// as the same logical file. Files relocated between directories still match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub size: u64,
}

impl Identity {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Derive the identity of a candidate. Pure; no I/O.
    pub fn of(candidate: &Candidate) -> Result<Self, IdentityError> {
        if candidate.name.is_empty() {
            return Err(IdentityError::EmptyName(candidate.raw_path.clone()));
        }
        let size = candidate
            .size
            .ok_or_else(|| IdentityError::MissingSize(candidate.raw_path.clone()))?;
        Ok(Self::new(candidate.name.clone(), size))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.name, self.size)
    }
}

/// Durable merged state for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub identity: Identity,
    pub seen_locally: bool,
    pub seen_remotely: bool,
    pub local_path: Option<String>,
    pub remote_path: Option<String>,
    pub remote_host: Option<String>,
    /// Millis since epoch of the first observation from either origin.
    pub first_seen_at: i64,
}

/// Same file name on both sides, but the sizes never matched up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeMismatch {
    pub local_path: String,
    pub local_size: u64,
    pub remote_path: String,
    pub remote_size: u64,
}

/// One completed scan, as recorded for `stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRun {
    pub origin: Origin,
    pub host: Option<String>,
    pub root: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub accepted: u64,
    pub skipped: u64,
}
