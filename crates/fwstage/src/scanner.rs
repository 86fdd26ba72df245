//! Candidate image discovery on removable storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ScanError;
use crate::image::ImageFormat;
use crate::storage::Storage;

/// A file that looks like a firmware image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareImageCandidate {
    /// File name
    pub name: String,

    /// Full path on the storage medium
    pub path: PathBuf,

    /// Size in bytes, 0 if it could not be determined
    pub size: u64,
}

/// Lists candidate images in a directory.
///
/// Only the extension is checked; header validation is left to the flash
/// path so that scanning stays cheap on slow media.
#[derive(Debug, Clone, Default)]
pub struct StorageScanner {
    format: ImageFormat,
}

impl StorageScanner {
    /// Create a scanner for the given image format
    pub fn new(format: ImageFormat) -> Self {
        Self { format }
    }

    /// Scan `directory`, returning at most `max_results` candidates sorted
    /// by name. Storage failures yield an empty list.
    pub fn scan(
        &self,
        storage: &dyn Storage,
        directory: &Path,
        max_results: usize,
        include_hidden: bool,
    ) -> Vec<FirmwareImageCandidate> {
        match self.try_scan(storage, directory, max_results, include_hidden) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(directory = %directory.display(), "Firmware scan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Like [`scan`](Self::scan) but reports why nothing was found
    pub fn try_scan(
        &self,
        storage: &dyn Storage,
        directory: &Path,
        max_results: usize,
        include_hidden: bool,
    ) -> Result<Vec<FirmwareImageCandidate>, ScanError> {
        if !storage.is_mounted() {
            return Err(ScanError::NotMounted);
        }

        let entries = storage
            .list_dir(directory)
            .map_err(|source| ScanError::ListFailed {
                path: directory.display().to_string(),
                source,
            })?;

        let mut candidates: Vec<FirmwareImageCandidate> = entries
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .filter(|entry| entry.name != "." && entry.name != "..")
            .filter(|entry| include_hidden || !entry.name.starts_with('.'))
            .filter(|entry| self.format.matches_extension(Path::new(&entry.name)))
            .map(|entry| {
                let size = storage.file_size(&entry.path).unwrap_or_else(|e| {
                    debug!(path = %entry.path.display(), "Could not stat candidate: {}", e);
                    0
                });
                FirmwareImageCandidate {
                    name: entry.name,
                    path: entry.path,
                    size,
                }
            })
            .collect();

        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        let found = candidates.len();
        candidates.truncate(max_results);

        debug!(
            directory = %directory.display(),
            found,
            returned = candidates.len(),
            "Firmware scan complete"
        );

        Ok(candidates)
    }
}
