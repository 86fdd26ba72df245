//! File-backed device model for hosts and tests
//!
//! A simulated device is a directory holding one file per region plus an
//! `otadata.json` document with the partition table, the boot target and
//! each region's trust state. [`SimulatedDevice::reset`] models the
//! bootloader's pending-verify rollback: an image scheduled for one boot is
//! started once, and if it has not confirmed itself by the following reset
//! it is marked `Aborted` and the previous target boots again.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::boot::BootTargetSelector;
use crate::decision::write_atomic;
use crate::error::SelectorError;
use crate::flash::{FlashDevice, WriteTransaction};
use crate::image::read_up_to;
use crate::region::{FirmwareRegion, RegionKind, RegionTrustState};

/// Name of the boot metadata document inside the device directory
pub const OTADATA_FILE: &str = "otadata.json";

/// Launcher placement in the simulated flash map
pub const LAUNCHER_BASE_ADDRESS: u32 = 0x1_0000;

/// Erase granularity of the simulated flash
pub const SECTOR_SIZE: u64 = 4096;

const REGION_ALIGN: u64 = 64 * 1024;
const ERASED: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RegionRecord {
    region: FirmwareRegion,
    trust: RegionTrustState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OtaData {
    regions: Vec<RegionRecord>,
    boot_target: RegionKind,
    #[serde(default)]
    pending: Option<RegionKind>,
    running: RegionKind,
}

impl OtaData {
    fn record(&self, kind: RegionKind) -> Option<&RegionRecord> {
        self.regions.iter().find(|r| r.region.kind == kind)
    }

    fn record_mut(&mut self, kind: RegionKind) -> Option<&mut RegionRecord> {
        self.regions.iter_mut().find(|r| r.region.kind == kind)
    }

    fn set_trust(
        &mut self,
        kind: RegionKind,
        trust: RegionTrustState,
    ) -> Result<(), SelectorError> {
        let record = self
            .record_mut(kind)
            .ok_or(SelectorError::RegionMissing(kind))?;
        record.trust = trust;
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), SelectorError> {
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &data)?;
        Ok(())
    }
}

/// Simulated dual-region device
#[derive(Debug)]
pub struct SimulatedDevice {
    dir: PathBuf,
    ota: OtaData,
    erase_count: usize,
}

impl SimulatedDevice {
    /// Create a device in `dir` with `launcher_image` installed and an empty
    /// staging region of `staging_capacity` bytes.
    ///
    /// The launcher region is sized to the image rounded up to 64 KiB and
    /// starts out `Valid`.
    pub fn init(
        dir: impl Into<PathBuf>,
        launcher_image: &[u8],
        staging_capacity: u64,
    ) -> Result<Self, SelectorError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let launcher_len = launcher_image.len() as u64;
        let launcher_capacity = launcher_len.div_ceil(REGION_ALIGN).max(1) * REGION_ALIGN;
        let staging_base = u64::from(LAUNCHER_BASE_ADDRESS) + launcher_capacity;
        let staging_base = u32::try_from(staging_base).map_err(|e| {
            SelectorError::Corrupt(format!(
                "launcher of {launcher_len} bytes overflows flash map: {e}"
            ))
        })?;

        let launcher = FirmwareRegion::new(
            RegionKind::Launcher,
            "factory",
            LAUNCHER_BASE_ADDRESS,
            launcher_capacity,
        );
        let staging =
            FirmwareRegion::new(RegionKind::Staging, "ota_0", staging_base, staging_capacity);

        {
            let mut file = File::create(region_path(&dir, RegionKind::Launcher))?;
            file.write_all(launcher_image)?;
            fill_erased(&mut file, launcher_len, launcher_capacity)?;
            file.sync_all()?;
        }
        {
            let mut file = File::create(region_path(&dir, RegionKind::Staging))?;
            fill_erased(&mut file, 0, staging_capacity)?;
            file.sync_all()?;
        }

        let ota = OtaData {
            regions: vec![
                RegionRecord {
                    region: launcher,
                    trust: RegionTrustState::Valid,
                },
                RegionRecord {
                    region: staging,
                    trust: RegionTrustState::New,
                },
            ],
            boot_target: RegionKind::Launcher,
            pending: None,
            running: RegionKind::Launcher,
        };
        ota.save(&dir.join(OTADATA_FILE))?;

        info!(
            dir = %dir.display(),
            launcher_capacity,
            staging_capacity,
            "Initialized simulated device"
        );
        Ok(Self {
            dir,
            ota,
            erase_count: 0,
        })
    }

    /// Open an existing simulated device
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SelectorError> {
        let dir = dir.into();
        let content = fs::read_to_string(dir.join(OTADATA_FILE))?;
        let ota: OtaData = serde_json::from_str(&content)?;
        debug!(dir = %dir.display(), running = %ota.running, "Opened simulated device");
        Ok(Self {
            dir,
            ota,
            erase_count: 0,
        })
    }

    /// Device directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Region that was started by the last reset
    pub fn running(&self) -> RegionKind {
        self.ota.running
    }

    /// Number of region erases since this handle was opened
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    /// Remove a region from the partition table, as a corrupted table would
    pub fn remove_region(&mut self, kind: RegionKind) -> Result<(), SelectorError> {
        self.ota.regions.retain(|r| r.region.kind != kind);
        self.save()
    }

    /// Overwrite a region's trust state directly
    pub fn force_trust_state(
        &mut self,
        kind: RegionKind,
        trust: RegionTrustState,
    ) -> Result<(), SelectorError> {
        self.ota.set_trust(kind, trust)?;
        self.save()
    }

    /// Simulate a hardware reset and return the region the bootloader starts.
    ///
    /// A region scheduled with [`schedule_pending_verify`] in state `New` is
    /// started and moves to `PendingVerify`. If it is still `PendingVerify`
    /// at the next reset it becomes `Aborted` and the permanent target boots
    /// instead. A region that confirmed itself becomes the permanent target.
    ///
    /// [`schedule_pending_verify`]: BootTargetSelector::schedule_pending_verify
    pub fn reset(&mut self) -> Result<RegionKind, SelectorError> {
        let next = match self.ota.pending {
            Some(kind) => {
                let trust = self
                    .ota
                    .record(kind)
                    .map(|r| r.trust)
                    .ok_or(SelectorError::RegionMissing(kind))?;
                match trust {
                    RegionTrustState::New => {
                        self.ota.set_trust(kind, RegionTrustState::PendingVerify)?;
                        info!(region = %kind, "Bootloader starting image pending verification");
                        kind
                    }
                    RegionTrustState::Valid => {
                        self.ota.boot_target = kind;
                        self.ota.pending = None;
                        info!(region = %kind, "Image confirmed, now permanent boot target");
                        kind
                    }
                    RegionTrustState::PendingVerify => {
                        self.ota.set_trust(kind, RegionTrustState::Aborted)?;
                        self.ota.pending = None;
                        warn!(region = %kind, "Image was not confirmed, rolling back");
                        self.ota.boot_target
                    }
                    RegionTrustState::Invalid | RegionTrustState::Aborted => {
                        self.ota.pending = None;
                        warn!(region = %kind, %trust, "Pending image not bootable, rolling back");
                        self.ota.boot_target
                    }
                }
            }
            None => self.ota.boot_target,
        };

        self.ota.running = next;
        self.save()?;
        Ok(next)
    }

    fn save(&self) -> Result<(), SelectorError> {
        self.ota.save(&self.dir.join(OTADATA_FILE))
    }

    fn region_file(&self, kind: RegionKind) -> PathBuf {
        region_path(&self.dir, kind)
    }
}

fn region_path(dir: &Path, kind: RegionKind) -> PathBuf {
    dir.join(format!("{}.bin", kind.as_str()))
}

fn fill_erased(file: &mut File, from: u64, to: u64) -> io::Result<()> {
    let block = [ERASED; SECTOR_SIZE as usize];
    let mut offset = from;
    file.seek(SeekFrom::Start(offset))?;
    while offset < to {
        let n = (to - offset).min(SECTOR_SIZE);
        let len = usize::try_from(n).map_err(io::Error::other)?;
        file.write_all(block.get(..len).unwrap_or_default())?;
        offset += n;
    }
    Ok(())
}

impl FlashDevice for SimulatedDevice {
    fn region(&self, kind: RegionKind) -> Option<FirmwareRegion> {
        self.ota.record(kind).map(|r| r.region.clone())
    }

    fn erase_region(&mut self, region: &FirmwareRegion) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.region_file(region.kind))?;
        fill_erased(&mut file, 0, region.capacity)?;
        file.sync_all()?;
        self.erase_count += 1;
        debug!(region = %region.kind, capacity = region.capacity, "Simulated erase");
        Ok(())
    }

    fn begin_write<'a>(
        &'a mut self,
        region: &FirmwareRegion,
        image_len: u64,
    ) -> io::Result<Box<dyn WriteTransaction + 'a>> {
        if image_len > region.capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{image_len} bytes exceed region {}", region.label),
            ));
        }

        let file = OpenOptions::new()
            .write(true)
            .open(self.region_file(region.kind))?;
        let otadata = self.dir.join(OTADATA_FILE);
        Ok(Box::new(SimWriteTransaction {
            file,
            kind: region.kind,
            capacity: region.capacity,
            written: 0,
            ota: &mut self.ota,
            otadata,
        }))
    }

    fn read_region(
        &self,
        region: &FirmwareRegion,
        offset: u64,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        if offset >= region.capacity {
            return Ok(0);
        }
        let mut file = File::open(self.region_file(region.kind))?;
        file.seek(SeekFrom::Start(offset))?;
        let room = usize::try_from(region.capacity - offset).unwrap_or(usize::MAX);
        let len = buf.len().min(room);
        read_up_to(&mut file, buf.get_mut(..len).unwrap_or_default())
    }
}

struct SimWriteTransaction<'a> {
    file: File,
    kind: RegionKind,
    capacity: u64,
    written: u64,
    ota: &'a mut OtaData,
    otadata: PathBuf,
}

impl WriteTransaction for SimWriteTransaction<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let next = self.written + data.len() as u64;
        if next > self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past end of region",
            ));
        }
        self.file.write_all(data)?;
        self.written = next;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.ota
            .set_trust(self.kind, RegionTrustState::New)
            .and_then(|()| self.ota.save(&self.otadata))
            .map_err(io::Error::other)?;
        debug!(region = %self.kind, bytes = self.written, "Simulated write finalized");
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        // Erase the header sector so a partial image never looks staged
        let end = self.written.min(SECTOR_SIZE);
        if let Err(e) = fill_erased(&mut self.file, 0, end).and_then(|()| self.file.sync_all()) {
            warn!(region = %self.kind, "Failed to invalidate aborted image: {}", e);
        }
        debug!(region = %self.kind, bytes = self.written, "Simulated write aborted");
    }
}

impl BootTargetSelector for SimulatedDevice {
    fn region(&self, kind: RegionKind) -> Option<FirmwareRegion> {
        FlashDevice::region(self, kind)
    }

    fn trust_state(&self, kind: RegionKind) -> Result<RegionTrustState, SelectorError> {
        self.ota
            .record(kind)
            .map(|r| r.trust)
            .ok_or(SelectorError::RegionMissing(kind))
    }

    fn boot_target(&self) -> Result<RegionKind, SelectorError> {
        Ok(self.ota.pending.unwrap_or(self.ota.boot_target))
    }

    fn set_boot_target(&mut self, kind: RegionKind) -> Result<(), SelectorError> {
        if self.ota.record(kind).is_none() {
            return Err(SelectorError::RegionMissing(kind));
        }
        self.ota.boot_target = kind;
        self.ota.pending = None;
        self.save()
    }

    fn schedule_pending_verify(&mut self, kind: RegionKind) -> Result<(), SelectorError> {
        if self.trust_state(kind)? == RegionTrustState::Invalid {
            return Err(SelectorError::NotBootable(kind));
        }
        self.ota.set_trust(kind, RegionTrustState::New)?;
        self.ota.pending = Some(kind);
        self.save()
    }

    fn mark_valid(&mut self, kind: RegionKind) -> Result<(), SelectorError> {
        self.ota.set_trust(kind, RegionTrustState::Valid)?;
        self.save()
    }

    fn read_image_header(
        &self,
        kind: RegionKind,
        buf: &mut [u8],
    ) -> Result<usize, SelectorError> {
        let region = FlashDevice::region(self, kind).ok_or(SelectorError::RegionMissing(kind))?;
        Ok(self.read_region(&region, 0, buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn launcher_image() -> Vec<u8> {
        let mut image = vec![0xE9u8, 3, 2, 0x20];
        image.resize(70_000, 0x11);
        image
    }

    #[test]
    fn test_init_and_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let device = SimulatedDevice::init(temp_dir.path(), &launcher_image(), 256 * 1024)?;

        let launcher = FlashDevice::region(&device, RegionKind::Launcher).ok_or("no launcher")?;
        assert_eq!(launcher.capacity, 128 * 1024);
        let staging = FlashDevice::region(&device, RegionKind::Staging).ok_or("no staging")?;
        assert_eq!(staging.base_address, LAUNCHER_BASE_ADDRESS + 128 * 1024);
        assert_eq!(staging.capacity, 256 * 1024);

        let reopened = SimulatedDevice::open(temp_dir.path())?;
        assert_eq!(reopened.trust_state(RegionKind::Launcher)?, RegionTrustState::Valid);
        assert_eq!(reopened.boot_target()?, RegionKind::Launcher);
        assert_eq!(reopened.running(), RegionKind::Launcher);

        let mut first = [0u8; 1];
        assert_eq!(reopened.read_region(&staging, 0, &mut first)?, 1);
        assert_eq!(first, [ERASED]);
        Ok(())
    }

    #[test]
    fn test_pending_verify_rolls_back_after_one_boot() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let mut device = SimulatedDevice::init(temp_dir.path(), &launcher_image(), 64 * 1024)?;

        device.schedule_pending_verify(RegionKind::Staging)?;
        assert_eq!(device.boot_target()?, RegionKind::Staging);

        assert_eq!(device.reset()?, RegionKind::Staging);
        assert_eq!(
            device.trust_state(RegionKind::Staging)?,
            RegionTrustState::PendingVerify
        );

        assert_eq!(device.reset()?, RegionKind::Launcher);
        assert_eq!(
            device.trust_state(RegionKind::Staging)?,
            RegionTrustState::Aborted
        );
        assert_eq!(device.boot_target()?, RegionKind::Launcher);
        Ok(())
    }

    #[test]
    fn test_confirmed_image_becomes_permanent() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let mut device = SimulatedDevice::init(temp_dir.path(), &launcher_image(), 64 * 1024)?;

        device.schedule_pending_verify(RegionKind::Staging)?;
        device.reset()?;
        device.mark_valid(RegionKind::Staging)?;

        assert_eq!(device.reset()?, RegionKind::Staging);
        assert_eq!(device.reset()?, RegionKind::Staging);
        Ok(())
    }

    #[test]
    fn test_aborted_write_clears_header() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let mut device = SimulatedDevice::init(temp_dir.path(), &launcher_image(), 64 * 1024)?;
        let staging = FlashDevice::region(&device, RegionKind::Staging).ok_or("no staging")?;

        device.erase_region(&staging)?;
        {
            let mut txn = device.begin_write(&staging, 100)?;
            txn.write(&[0xE9; 50])?;
            txn.abort();
        }

        let mut first = [0u8; 1];
        device.read_region(&staging, 0, &mut first)?;
        assert_eq!(first, [ERASED]);
        assert_eq!(device.erase_count(), 1);
        Ok(())
    }

    #[test]
    fn test_pending_verify_refuses_invalid_region() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let mut device = SimulatedDevice::init(temp_dir.path(), &launcher_image(), 64 * 1024)?;
        device.force_trust_state(RegionKind::Staging, RegionTrustState::Invalid)?;

        assert!(matches!(
            device.schedule_pending_verify(RegionKind::Staging),
            Err(SelectorError::NotBootable(RegionKind::Staging))
        ));
        assert_eq!(
            device.trust_state(RegionKind::Staging)?,
            RegionTrustState::Invalid
        );
        assert_eq!(device.boot_target()?, RegionKind::Launcher);
        assert_eq!(device.reset()?, RegionKind::Launcher);
        Ok(())
    }

    #[test]
    fn test_read_image_header_reads_region_start() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let device = SimulatedDevice::init(temp_dir.path(), &launcher_image(), 64 * 1024)?;

        let mut header = [0u8; 2];
        assert_eq!(device.read_image_header(RegionKind::Launcher, &mut header)?, 2);
        assert_eq!(header, [0xE9, 3]);
        assert_eq!(device.read_image_header(RegionKind::Staging, &mut header)?, 2);
        assert_eq!(header, [ERASED, ERASED]);
        Ok(())
    }

    #[test]
    fn test_missing_region_reported() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let mut device = SimulatedDevice::init(temp_dir.path(), &launcher_image(), 64 * 1024)?;
        device.remove_region(RegionKind::Launcher)?;

        assert!(BootTargetSelector::region(&device, RegionKind::Launcher).is_none());
        assert!(matches!(
            device.set_boot_target(RegionKind::Launcher),
            Err(SelectorError::RegionMissing(RegionKind::Launcher))
        ));
        Ok(())
    }
}
