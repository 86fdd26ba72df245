//! Shared snapshot of an in-flight flash operation

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::flash::FlashPhase;

/// Progress of one write into the staging region.
///
/// `bytes_written` never exceeds `total` and never decreases, and phases only
/// move forward. Updates that would violate either are ignored, so readers
/// always observe a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashOperation {
    /// Image being written
    pub image: PathBuf,

    /// Image size in bytes, 0 until the image has been validated
    pub total: u64,

    /// Bytes committed to the region so far
    pub bytes_written: u64,

    /// Current phase
    pub phase: FlashPhase,

    /// Error description if the operation failed
    pub last_error: Option<String>,
}

impl FlashOperation {
    /// A freshly accepted operation
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            total: 0,
            bytes_written: 0,
            phase: FlashPhase::Erasing,
            last_error: None,
        }
    }

    /// Apply a progress report. Returns whether the snapshot changed.
    pub fn apply(&mut self, bytes_written: u64, total: u64, phase: FlashPhase) -> bool {
        if self.phase.is_terminal() || phase < self.phase {
            return false;
        }

        let before = (self.total, self.bytes_written, self.phase);
        self.total = self.total.max(total);
        self.bytes_written = bytes_written.max(self.bytes_written).min(self.total);
        self.phase = phase;

        before != (self.total, self.bytes_written, self.phase)
    }

    /// Mark the operation failed, keeping the progress reached so far
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.phase == FlashPhase::Done {
            return;
        }
        self.phase = FlashPhase::Failed;
        self.last_error = Some(error.into());
    }

    /// Whether the operation reached `Done` or `Failed`
    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Completion percentage of the write phase (0-100)
    pub fn percent(&self) -> u8 {
        match (self.bytes_written * 100).checked_div(self.total) {
            Some(p) => u8::try_from(p.min(100)).unwrap_or(100),
            None => 0,
        }
    }
}
