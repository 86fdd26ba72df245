//! Flash device capability and the chunked staging writer
//!
//! The writer streams an image from storage into the staging region one
//! chunk at a time, so memory use is bounded by the chunk size regardless of
//! image size. It never changes which region boots next.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, error, info};

use crate::error::{FlashError, ValidationError};
use crate::image::{ImageFormat, ImageValidator, read_up_to};
use crate::region::{FirmwareRegion, RegionKind};
use crate::storage::Storage;

/// Default write chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

/// Longest stretch of written bytes without a progress report
pub const MAX_PROGRESS_INTERVAL: u64 = 64 * 1024;

/// An open write into a region.
///
/// Exactly one of [`finalize`](Self::finalize) or [`abort`](Self::abort)
/// ends the transaction. An aborted transaction leaves the region erased
/// but unfinalized.
pub trait WriteTransaction {
    /// Append bytes at the current write offset
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Commit the written image
    fn finalize(self: Box<Self>) -> io::Result<()>;

    /// Discard the partially written image
    fn abort(self: Box<Self>);
}

/// Raw access to the device's firmware regions
pub trait FlashDevice: Send {
    /// Look up a region in the partition table
    fn region(&self, kind: RegionKind) -> Option<FirmwareRegion>;

    /// Erase the whole region
    fn erase_region(&mut self, region: &FirmwareRegion) -> io::Result<()>;

    /// Open a write transaction for an image of `image_len` bytes
    fn begin_write<'a>(
        &'a mut self,
        region: &FirmwareRegion,
        image_len: u64,
    ) -> io::Result<Box<dyn WriteTransaction + 'a>>;

    /// Read raw bytes from a region, returning how many were read
    fn read_region(&self, region: &FirmwareRegion, offset: u64, buf: &mut [u8])
    -> io::Result<usize>;
}

/// Phase of a flash operation, in the order they occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlashPhase {
    /// Erasing the staging region
    Erasing,
    /// Streaming image chunks
    Writing,
    /// Closing the write transaction
    Finalizing,
    /// Image written and finalized
    Done,
    /// Operation stopped with an error
    Failed,
}

impl FlashPhase {
    /// Human-readable phase description passed to progress callbacks
    pub fn as_str(self) -> &'static str {
        match self {
            FlashPhase::Erasing => "Erasing",
            FlashPhase::Writing => "Writing",
            FlashPhase::Finalizing => "Finalizing",
            FlashPhase::Done => "Done",
            FlashPhase::Failed => "Failed",
        }
    }

    /// Whether no further phase can follow
    pub fn is_terminal(self) -> bool {
        matches!(self, FlashPhase::Done | FlashPhase::Failed)
    }
}

impl std::fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed flash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashReport {
    /// Region the image was written to
    pub region: RegionKind,

    /// Bytes written, equal to the image size
    pub bytes_written: u64,

    /// SHA256 of the streamed image, hex encoded
    pub sha256: String,
}

/// Streams images into the staging region
#[derive(Debug, Clone)]
pub struct FlashWriter {
    format: ImageFormat,
    chunk_size: usize,
    progress_interval: u64,
}

impl Default for FlashWriter {
    fn default() -> Self {
        Self::new(ImageFormat::default(), DEFAULT_CHUNK_SIZE, MAX_PROGRESS_INTERVAL)
    }
}

impl FlashWriter {
    /// Create a writer. The progress interval is capped at
    /// [`MAX_PROGRESS_INTERVAL`] and the chunk size is at least one byte.
    pub fn new(format: ImageFormat, chunk_size: usize, progress_interval: u64) -> Self {
        Self {
            format,
            chunk_size: chunk_size.max(1),
            progress_interval: progress_interval.clamp(1, MAX_PROGRESS_INTERVAL),
        }
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write `path` into the staging region.
    ///
    /// `progress` receives `(bytes_written, total, phase)`; it is called with
    /// `Erasing`, then `Writing` at least every [`MAX_PROGRESS_INTERVAL`]
    /// bytes and at completion, then `Finalizing` and `Done`. Any failure
    /// after validation is reported once with `Failed`.
    ///
    /// # Errors
    ///
    /// Validation failures are returned before anything is erased.
    /// Mid-stream read or write failures abort the write transaction and
    /// return [`FlashError::IoError`].
    pub fn flash<F>(
        &self,
        device: &mut dyn FlashDevice,
        storage: &dyn Storage,
        path: &Path,
        mut progress: F,
    ) -> Result<FlashReport, FlashError>
    where
        F: FnMut(u64, u64, FlashPhase),
    {
        let staging = device.region(RegionKind::Staging);
        let capacity = staging.as_ref().map_or(u64::MAX, |r| r.capacity);

        let meta = ImageValidator::new(self.format.clone(), capacity)
            .validate(storage, path)
            .map_err(|e| match e {
                ValidationError::TooLarge { size, capacity } => {
                    FlashError::TooLarge { size, capacity }
                }
                other => FlashError::Validation(other),
            })?;

        let region = staging.ok_or(FlashError::RegionNotFound(RegionKind::Staging))?;
        if !region.fits(meta.size) {
            return Err(FlashError::TooLarge {
                size: meta.size,
                capacity: region.capacity,
            });
        }

        let total = meta.size;
        info!(
            path = %path.display(),
            region = %region.label,
            total,
            "Flashing image into staging region"
        );

        let mut written = 0u64;
        let result = match storage.open(path) {
            Ok(mut reader) => self.write_image(
                device,
                &mut reader,
                &region,
                total,
                &mut written,
                &mut progress,
            ),
            Err(e) => Err(FlashError::IoError(e)),
        };

        match result {
            Ok(sha256) => {
                progress(total, total, FlashPhase::Done);
                info!(total, sha256 = %sha256, "Staging image written");
                Ok(FlashReport {
                    region: region.kind,
                    bytes_written: written,
                    sha256,
                })
            }
            Err(e) => {
                error!(written, total, "Flash failed: {}", e);
                progress(written, total, FlashPhase::Failed);
                Err(e)
            }
        }
    }

    fn write_image<F>(
        &self,
        device: &mut dyn FlashDevice,
        reader: &mut dyn Read,
        region: &FirmwareRegion,
        total: u64,
        written: &mut u64,
        progress: &mut F,
    ) -> Result<String, FlashError>
    where
        F: FnMut(u64, u64, FlashPhase),
    {
        progress(0, total, FlashPhase::Erasing);
        device.erase_region(region).map_err(FlashError::EraseFailed)?;
        debug!(region = %region.label, capacity = region.capacity, "Region erased");

        let mut txn = device
            .begin_write(region, total)
            .map_err(FlashError::IoError)?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut last_reported = 0u64;

        loop {
            let n = match read_up_to(reader, &mut buf) {
                Ok(n) => n,
                Err(e) => {
                    txn.abort();
                    return Err(FlashError::IoError(e));
                }
            };
            if n == 0 {
                break;
            }

            let chunk = buf.get(..n).unwrap_or_default();
            let next = written.saturating_add(chunk.len() as u64);
            if next > total {
                txn.abort();
                return Err(FlashError::IoError(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "image grew while flashing",
                )));
            }

            if let Err(e) = txn.write(chunk) {
                txn.abort();
                return Err(FlashError::IoError(e));
            }

            hasher.update(chunk);
            *written = next;

            if *written - last_reported >= self.progress_interval || *written == total {
                progress(*written, total, FlashPhase::Writing);
                last_reported = *written;
            }
        }

        if *written != total {
            txn.abort();
            return Err(FlashError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "image shrank while flashing",
            )));
        }

        progress(total, total, FlashPhase::Finalizing);
        txn.finalize().map_err(FlashError::FinalizeFailed)?;

        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_monotonic() {
        assert!(FlashPhase::Erasing < FlashPhase::Writing);
        assert!(FlashPhase::Writing < FlashPhase::Finalizing);
        assert!(FlashPhase::Finalizing < FlashPhase::Done);
        assert!(FlashPhase::Done < FlashPhase::Failed);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(FlashPhase::Erasing.to_string(), "Erasing");
        assert_eq!(FlashPhase::Finalizing.to_string(), "Finalizing");
        assert!(FlashPhase::Done.is_terminal());
        assert!(FlashPhase::Failed.is_terminal());
        assert!(!FlashPhase::Writing.is_terminal());
    }

    #[test]
    fn test_writer_clamps_settings() {
        let writer = FlashWriter::new(ImageFormat::default(), 0, 10 * MAX_PROGRESS_INTERVAL);
        assert_eq!(writer.chunk_size(), 1);
        assert_eq!(writer.progress_interval, MAX_PROGRESS_INTERVAL);
    }
}
