//! Integrity verification trait boundary
//!
//! The cache and downloader consume verification as a black box: any
//! [`Verifier`] implementation can be injected. The built-in
//! [`Sha256Verifier`] checks file presence, size, and SHA-256 digest;
//! format-aware validation (ONNX graph checks, etc.) lives behind the same
//! trait in external crates.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::ArtifactConfig;

/// Outcome of an integrity check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Whether the file matches the expected artifact
    pub valid: bool,
    /// Reasons the file was rejected
    pub errors: Vec<String>,
    /// Non-fatal observations
    pub warnings: Vec<String>,
}

impl VerifyReport {
    /// A passing report
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// A failing report with the given errors
    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            warnings: Vec::new(),
        }
    }
}

/// Integrity verification collaborator.
///
/// Implementations must be infallible: environmental problems (unreadable
/// file, missing file) are reported as a failing [`VerifyReport`], not as
/// errors, so callers have a single rejection path.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Check whether `file` contains the artifact described by `config`
    async fn verify(&self, file: &Path, config: &ArtifactConfig) -> VerifyReport;
}

/// Built-in verifier: file presence, byte size, and SHA-256 digest
#[derive(Debug, Clone, Default)]
pub struct Sha256Verifier;

impl Sha256Verifier {
    /// Create the default verifier
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Verifier for Sha256Verifier {
    async fn verify(&self, file: &Path, config: &ArtifactConfig) -> VerifyReport {
        let path = file.to_path_buf();
        let expected_size = config.size;
        let expected_checksum = config.checksum.to_ascii_lowercase();

        // Hashing large artifacts is CPU-bound; keep it off the async
        // runtime threads.
        let result = tokio::task::spawn_blocking(move || {
            verify_blocking(&path, expected_size, &expected_checksum)
        })
        .await;

        match result {
            Ok(report) => report,
            Err(e) => VerifyReport::failed(vec![format!("Verification task failed: {e}")]),
        }
    }
}

fn verify_blocking(path: &Path, expected_size: u64, expected_checksum: &str) -> VerifyReport {
    let metadata = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            return VerifyReport::failed(vec![format!(
                "Artifact file not readable: {}: {e}",
                path.display()
            )]);
        }
    };

    let mut errors = Vec::new();

    if metadata.len() != expected_size {
        errors.push(format!(
            "Size mismatch: expected {expected_size} bytes, found {}",
            metadata.len()
        ));
    }

    match hash_file(path) {
        Ok(digest) => {
            if digest != expected_checksum {
                errors.push(format!(
                    "Checksum mismatch: expected {expected_checksum}, computed {digest}"
                ));
            }
        }
        Err(e) => errors.push(format!("Failed to hash artifact: {e}")),
    }

    if errors.is_empty() {
        VerifyReport::ok()
    } else {
        VerifyReport::failed(errors)
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
