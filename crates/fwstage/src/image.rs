//! Firmware image header parsing and validation
//!
//! Images use the ESP-style application header: a magic byte at offset 0
//! followed by segment and flash configuration fields. Validation is a
//! read-only probe; it never touches a firmware region.

use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ValidationError;
use crate::storage::Storage;

/// Size of the fixed image header at offset 0
pub const HEADER_LEN: usize = 24;

/// Platform application image magic
pub const DEFAULT_IMAGE_MAGIC: u8 = 0xE9;

/// Platform image file extension, compared case-insensitively
pub const DEFAULT_IMAGE_EXTENSION: &str = "bin";

/// What a firmware image file looks like on this platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageFormat {
    /// Accepted extension without the leading dot
    pub extension: String,

    /// Magic byte at offset 0
    pub magic: u8,
}

impl Default for ImageFormat {
    fn default() -> Self {
        Self {
            extension: DEFAULT_IMAGE_EXTENSION.to_string(),
            magic: DEFAULT_IMAGE_MAGIC,
        }
    }
}

impl ImageFormat {
    /// Whether `path` carries the image extension
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension))
    }

    /// Check the first byte of an image against the platform magic
    pub fn check_magic(&self, header: &[u8]) -> Result<(), ValidationError> {
        match header.first() {
            Some(&found) if found == self.magic => Ok(()),
            Some(&found) => Err(ValidationError::BadMagic {
                expected: self.magic,
                found,
            }),
            None => Err(ValidationError::EmptyFile),
        }
    }
}

/// Parsed application image header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHeader {
    /// Magic byte
    pub magic: u8,
    /// Number of memory segments following the header
    pub segment_count: u8,
    /// SPI flash mode
    pub spi_mode: u8,
    /// Flash size (high nibble) and frequency (low nibble)
    pub flash_config: u8,
    /// Entry point address
    pub entry_addr: u32,
    /// Target chip identifier
    pub chip_id: u16,
}

impl ImageHeader {
    /// Parse a header from the first [`HEADER_LEN`] bytes of an image.
    ///
    /// Returns `None` when fewer bytes are available.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..HEADER_LEN)?;
        let entry: [u8; 4] = header.get(4..8)?.try_into().ok()?;
        let chip: [u8; 2] = header.get(12..14)?.try_into().ok()?;

        Some(Self {
            magic: *header.first()?,
            segment_count: *header.get(1)?,
            spi_mode: *header.get(2)?,
            flash_config: *header.get(3)?,
            entry_addr: u32::from_le_bytes(entry),
            chip_id: u16::from_le_bytes(chip),
        })
    }
}

/// Result of a successful validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    /// Path the image was read from
    pub path: PathBuf,

    /// Image size in bytes
    pub size: u64,

    /// Parsed header, absent when the file is shorter than a full header
    pub header: Option<ImageHeader>,
}

/// Validates candidate images against a format and the staging capacity
#[derive(Debug, Clone)]
pub struct ImageValidator {
    format: ImageFormat,
    capacity: u64,
}

impl ImageValidator {
    /// Create a validator for images destined for a region of `capacity` bytes
    pub fn new(format: ImageFormat, capacity: u64) -> Self {
        Self { format, capacity }
    }

    /// Image format in use
    pub fn format(&self) -> &ImageFormat {
        &self.format
    }

    /// Staging capacity images are checked against
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Cheap extension-only check used while scanning
    pub fn has_supported_extension(&self, path: &Path) -> bool {
        self.format.matches_extension(path)
    }

    /// Validate an image file.
    ///
    /// Checks run in order: extension, emptiness, header magic, capacity.
    /// Nothing is opened when the extension is wrong.
    pub fn validate(
        &self,
        storage: &dyn Storage,
        path: &Path,
    ) -> Result<ImageMeta, ValidationError> {
        if !self.has_supported_extension(path) {
            return Err(ValidationError::UnsupportedExtension(
                path.display().to_string(),
            ));
        }

        let size = storage.file_size(path)?;
        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }

        let mut reader = storage.open(path)?;
        let mut buf = [0u8; HEADER_LEN];
        let read = read_up_to(&mut reader, &mut buf)?;
        let header_bytes = buf.get(..read).unwrap_or_default();

        self.format.check_magic(header_bytes)?;

        if size > self.capacity {
            return Err(ValidationError::TooLarge {
                size,
                capacity: self.capacity,
            });
        }

        let header = ImageHeader::parse(header_bytes);
        debug!(
            path = %path.display(),
            size,
            segments = header.map(|h| h.segment_count),
            "Image validated"
        );

        Ok(ImageMeta {
            path: path.to_path_buf(),
            size,
            header,
        })
    }
}

/// Fill `buf` as far as the reader allows, returning the byte count
pub(crate) fn read_up_to(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while let Some(rest) = buf.get_mut(filled..) {
        if rest.is_empty() {
            break;
        }
        match reader.read(rest) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
