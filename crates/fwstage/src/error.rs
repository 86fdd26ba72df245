//! Error types for firmware staging operations

use thiserror::Error;

use crate::region::RegionKind;

/// Reasons a candidate image is rejected before anything destructive happens
#[derive(Error, Debug)]
pub enum ValidationError {
    /// File name does not carry the platform's image extension
    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),

    /// First header byte is not the platform image magic
    #[error("Bad image magic: expected {expected:#04x}, found {found:#04x}")]
    BadMagic {
        /// Magic the platform expects
        expected: u8,
        /// Byte actually found at offset 0
        found: u8,
    },

    /// File has no content
    #[error("Image file is empty")]
    EmptyFile,

    /// Image does not fit in the staging region
    #[error("Image too large: {size} bytes exceeds staging capacity of {capacity} bytes")]
    TooLarge {
        /// Image size in bytes
        size: u64,
        /// Staging region capacity in bytes
        capacity: u64,
    },

    /// The file could not be opened or read
    #[error("I/O error reading image: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while writing an image into the staging region
#[derive(Error, Debug)]
pub enum FlashError {
    /// The target region is not present in the partition table
    #[error("Region not found: {0}")]
    RegionNotFound(RegionKind),

    /// Image does not fit in the staging region
    #[error("Image too large: {size} bytes exceeds staging capacity of {capacity} bytes")]
    TooLarge {
        /// Image size in bytes
        size: u64,
        /// Staging region capacity in bytes
        capacity: u64,
    },

    /// Erasing the staging region failed
    #[error("Erase failed: {0}")]
    EraseFailed(#[source] std::io::Error),

    /// Reading the image or writing a chunk failed mid-stream
    #[error("I/O error during flash: {0}")]
    IoError(#[source] std::io::Error),

    /// Closing the write transaction failed
    #[error("Finalize failed: {0}")]
    FinalizeFailed(#[source] std::io::Error),

    /// Re-validation of the image failed
    #[error("Image validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl FlashError {
    /// Whether retrying the same request could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlashError::EraseFailed(_) | FlashError::IoError(_) | FlashError::FinalizeFailed(_)
        )
    }
}

/// Errors reported by the platform boot target capability
#[derive(Error, Debug)]
pub enum SelectorError {
    /// The requested region does not exist on this device
    #[error("Region missing: {0}")]
    RegionMissing(RegionKind),

    /// The region is marked invalid and may not be booted
    #[error("Region {0} is marked invalid")]
    NotBootable(RegionKind),

    /// Boot metadata could not be decoded
    #[error("Boot metadata corrupt: {0}")]
    Corrupt(String),

    /// Boot metadata could not be read or written
    #[error("Boot metadata I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SelectorError {
    fn from(e: serde_json::Error) -> Self {
        SelectorError::Corrupt(e.to_string())
    }
}

/// Errors from the non-volatile key/value store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backing storage failed
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be decoded
    #[error("Store contents corrupt: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Errors from boot decision and orchestration; all of them fail closed
#[derive(Error, Debug)]
pub enum BootError {
    /// The launcher region is missing or not trusted, so no fallback exists
    #[error("No rollback target: launcher region is missing or untrusted")]
    NoRollbackTarget,

    /// The staging region holds no bootable image
    #[error("No firmware staged")]
    NothingStaged,

    /// The one-shot flag could not be persisted
    #[error("Failed to persist boot decision: {0}")]
    PersistFailed(#[from] StoreError),

    /// The boot target capability reported an error
    #[error("Boot target selection failed: {0}")]
    Selector(#[from] SelectorError),
}

/// Errors that make a scan yield nothing
#[derive(Error, Debug)]
pub enum ScanError {
    /// Removable storage is not mounted
    #[error("Storage not mounted")]
    NotMounted,

    /// The directory listing failed
    #[error("Failed to list {path}: {source}")]
    ListFailed {
        /// Directory that was listed
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the background flash runner
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A flash operation is still in progress
    #[error("Flash operation already running")]
    AlreadyRunning,

    /// The worker thread could not be spawned
    #[error("Failed to spawn flash worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker thread panicked before reporting a result
    #[error("Flash worker panicked")]
    WorkerPanicked,

    /// The flash itself failed
    #[error(transparent)]
    Flash(#[from] FlashError),
}

impl RunnerError {
    /// The underlying flash error, if the worker ran and failed
    pub fn as_flash_error(&self) -> Option<&FlashError> {
        match self {
            RunnerError::Flash(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_error_retryable() {
        let io = || std::io::Error::other("bus");
        assert!(FlashError::IoError(io()).is_retryable());
        assert!(FlashError::EraseFailed(io()).is_retryable());
        assert!(FlashError::FinalizeFailed(io()).is_retryable());
        assert!(!FlashError::RegionNotFound(RegionKind::Staging).is_retryable());
        assert!(
            !FlashError::TooLarge {
                size: 2,
                capacity: 1
            }
            .is_retryable()
        );
        assert!(!FlashError::Validation(ValidationError::EmptyFile).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = ValidationError::BadMagic {
            expected: 0xE9,
            found: 0x7F,
        };
        assert_eq!(
            err.to_string(),
            "Bad image magic: expected 0xe9, found 0x7f"
        );

        let err = FlashError::RegionNotFound(RegionKind::Staging);
        assert_eq!(err.to_string(), "Region not found: staging");

        let err = BootError::from(StoreError::Corrupt("eof".to_string()));
        assert_eq!(
            err.to_string(),
            "Failed to persist boot decision: Store contents corrupt: eof"
        );
    }
}
