//! Firmware region identifiers and hardware trust states
//!
//! A device exposes exactly two code regions: the factory launcher, which is
//! always kept bootable, and the staging region that receives user images.

use serde::{Deserialize, Serialize};

/// Firmware region identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// Trusted, factory-installed image
    Launcher,
    /// Writable region for user-supplied images
    Staging,
}

impl RegionKind {
    /// Both regions in partition table order
    pub const ALL: [RegionKind; 2] = [RegionKind::Launcher, RegionKind::Staging];

    /// Get the other region
    pub fn other(self) -> Self {
        match self {
            RegionKind::Launcher => RegionKind::Staging,
            RegionKind::Staging => RegionKind::Launcher,
        }
    }

    /// Stable lowercase name used in persisted metadata and logs
    pub fn as_str(self) -> &'static str {
        match self {
            RegionKind::Launcher => "launcher",
            RegionKind::Staging => "staging",
        }
    }
}

impl std::fmt::Display for RegionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry of one addressable code region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareRegion {
    /// Which region this is
    pub kind: RegionKind,

    /// Partition table label
    pub label: String,

    /// Flash offset of the region
    pub base_address: u32,

    /// Region size in bytes
    pub capacity: u64,
}

impl FirmwareRegion {
    /// Create a region description
    pub fn new(
        kind: RegionKind,
        label: impl Into<String>,
        base_address: u32,
        capacity: u64,
    ) -> Self {
        Self {
            kind,
            label: label.into(),
            base_address,
            capacity,
        }
    }

    /// Whether an image of `size` bytes fits in this region
    pub fn fits(&self, size: u64) -> bool {
        size <= self.capacity
    }
}

/// Trust verdict the platform bootloader keeps for a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegionTrustState {
    /// Freshly written, never booted
    #[default]
    New,
    /// Booted once and awaiting confirmation; reverts on the next reset
    PendingVerify,
    /// Confirmed good
    Valid,
    /// Marked bad by the running image
    Invalid,
    /// Booted unconfirmed and rolled back by the bootloader
    Aborted,
}

impl RegionTrustState {
    /// A region the device may fall back to unconditionally.
    ///
    /// Factory images carry no explicit verdict, so `New` counts as trusted.
    pub fn is_trusted(self) -> bool {
        matches!(self, RegionTrustState::Valid | RegionTrustState::New)
    }

    /// A region the bootloader would still attempt to start
    pub fn is_bootable(self) -> bool {
        !matches!(self, RegionTrustState::Invalid | RegionTrustState::Aborted)
    }
}

impl std::fmt::Display for RegionTrustState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RegionTrustState::New => "new",
            RegionTrustState::PendingVerify => "pending-verify",
            RegionTrustState::Valid => "valid",
            RegionTrustState::Invalid => "invalid",
            RegionTrustState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
