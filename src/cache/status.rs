//! Cache entry validity states and lookup results

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::metadata::CacheMetadata;

/// Validity of a cache entry, ordered by trustworthiness.
///
/// `Missing < Invalid < Outdated < Corrupted < Valid`: each step up means
/// more of the entry survived inspection. Only `Valid` counts as a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// No artifact file on disk
    Missing,
    /// Artifact present but metadata is absent or unreadable
    Invalid,
    /// Metadata parses but version differs or the entry exceeded max age
    Outdated,
    /// Metadata is consistent but the artifact failed verification
    Corrupted,
    /// Fully consistent and verified
    Valid,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CacheStatus::Missing => "missing",
            CacheStatus::Invalid => "invalid",
            CacheStatus::Outdated => "outdated",
            CacheStatus::Corrupted => "corrupted",
            CacheStatus::Valid => "valid",
        };
        write!(f, "{s}")
    }
}

/// Result of a cache lookup.
///
/// One variant per [`CacheStatus`], each carrying only the fields that
/// status can have, so impossible combinations (a hit with no file, a miss
/// with metadata) cannot be constructed.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// No artifact file for this key
    Missing {
        /// Why the lookup missed
        reason: String,
    },
    /// Artifact exists but its metadata is absent or unparseable
    Invalid {
        /// Why the entry was demoted
        reason: String,
    },
    /// Entry is stale; the file may still be reusable by caller policy
    Outdated {
        /// Path to the stale artifact file
        file_path: PathBuf,
        /// Parsed metadata of the stale entry
        metadata: CacheMetadata,
        /// Why the entry is considered stale
        reason: String,
    },
    /// Artifact failed integrity verification
    Corrupted {
        /// Path to the failing artifact file
        file_path: PathBuf,
        /// Verifier rejection reasons
        errors: Vec<String>,
    },
    /// Entry is fully consistent and verified
    Valid {
        /// Path to the cached artifact file
        file_path: PathBuf,
        /// Entry metadata
        metadata: CacheMetadata,
    },
}

impl CacheLookup {
    /// Whether this lookup satisfies the request without a network fetch
    pub fn hit(&self) -> bool {
        matches!(self, CacheLookup::Valid { .. })
    }

    /// The validity state of the entry
    pub fn status(&self) -> CacheStatus {
        match self {
            CacheLookup::Missing { .. } => CacheStatus::Missing,
            CacheLookup::Invalid { .. } => CacheStatus::Invalid,
            CacheLookup::Outdated { .. } => CacheStatus::Outdated,
            CacheLookup::Corrupted { .. } => CacheStatus::Corrupted,
            CacheLookup::Valid { .. } => CacheStatus::Valid,
        }
    }

    /// Artifact file path, for states where a file exists
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            CacheLookup::Outdated { file_path, .. }
            | CacheLookup::Corrupted { file_path, .. }
            | CacheLookup::Valid { file_path, .. } => Some(file_path),
            _ => None,
        }
    }

    /// Entry metadata, for states where it parsed
    pub fn metadata(&self) -> Option<&CacheMetadata> {
        match self {
            CacheLookup::Outdated { metadata, .. } | CacheLookup::Valid { metadata, .. } => {
                Some(metadata)
            }
            _ => None,
        }
    }

    /// Human-readable reason for non-valid states
    pub fn reason(&self) -> Option<String> {
        match self {
            CacheLookup::Missing { reason }
            | CacheLookup::Invalid { reason }
            | CacheLookup::Outdated { reason, .. } => Some(reason.clone()),
            CacheLookup::Corrupted { errors, .. } => Some(errors.join("; ")),
            CacheLookup::Valid { .. } => None,
        }
    }
}
