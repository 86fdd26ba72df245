//! Boot target capability and the startup orchestrator
//!
//! The orchestrator runs once per device start. It consumes the one-shot
//! flag and either re-asserts the launcher as next boot target or arms the
//! platform's pending-verify primitive for the staging region. It never
//! resets the device itself.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::decision::{BootDecisionStore, KvStore};
use crate::error::{BootError, SelectorError};
use crate::image::ImageFormat;
use crate::region::{FirmwareRegion, RegionKind, RegionTrustState};

/// Platform boot selection, including the pending-verify rollback primitive
pub trait BootTargetSelector: Send {
    /// Look up a region in the partition table
    fn region(&self, kind: RegionKind) -> Option<FirmwareRegion>;

    /// Current trust verdict for a region
    fn trust_state(&self, kind: RegionKind) -> Result<RegionTrustState, SelectorError>;

    /// Region the bootloader will start on the next reset
    fn boot_target(&self) -> Result<RegionKind, SelectorError>;

    /// Make `kind` the permanent next boot target
    fn set_boot_target(&mut self, kind: RegionKind) -> Result<(), SelectorError>;

    /// Boot `kind` on the next reset only; the bootloader reverts to the
    /// previous target unless the image confirms itself
    fn schedule_pending_verify(&mut self, kind: RegionKind) -> Result<(), SelectorError>;

    /// Record `kind` as confirmed good
    fn mark_valid(&mut self, kind: RegionKind) -> Result<(), SelectorError>;

    /// Read the start of a region's contents, as the bootloader does before
    /// starting it
    fn read_image_header(&self, kind: RegionKind, buf: &mut [u8])
    -> Result<usize, SelectorError>;
}

/// Check that the launcher exists and is trusted.
///
/// Any uncertainty, including a failed read, counts as no fallback.
pub fn ensure_rollback_target<B>(selector: &B) -> Result<(), BootError>
where
    B: BootTargetSelector + ?Sized,
{
    if selector.region(RegionKind::Launcher).is_none() {
        warn!("Launcher region missing from partition table");
        return Err(BootError::NoRollbackTarget);
    }

    match selector.trust_state(RegionKind::Launcher) {
        Ok(state) if state.is_trusted() => Ok(()),
        Ok(state) => {
            warn!(%state, "Launcher region is not trusted");
            Err(BootError::NoRollbackTarget)
        }
        Err(e) => {
            warn!("Could not read launcher trust state: {}", e);
            Err(BootError::NoRollbackTarget)
        }
    }
}

/// Check that the staging region holds an image the bootloader could start.
///
/// The first byte must be the image magic and the region must not be marked
/// `Invalid`. A rolled-back (`Aborted`) image may be tried again. Read
/// failures count as nothing staged.
pub fn ensure_image_staged<B>(selector: &B, format: &ImageFormat) -> Result<(), BootError>
where
    B: BootTargetSelector + ?Sized,
{
    if selector.region(RegionKind::Staging).is_none() {
        debug!("Staging region missing from partition table");
        return Err(BootError::NothingStaged);
    }

    let mut first = [0u8; 1];
    match selector.read_image_header(RegionKind::Staging, &mut first) {
        Ok(1) if first == [format.magic] => {}
        Ok(_) => {
            debug!("Staging region holds no image");
            return Err(BootError::NothingStaged);
        }
        Err(e) => {
            warn!("Could not read staging region: {}", e);
            return Err(BootError::NothingStaged);
        }
    }

    match selector.trust_state(RegionKind::Staging) {
        Ok(RegionTrustState::Invalid) => {
            debug!("Staged image is marked invalid");
            Err(BootError::NothingStaged)
        }
        Ok(_) => Ok(()),
        Err(e) => {
            warn!("Could not read staging trust state: {}", e);
            Err(BootError::NothingStaged)
        }
    }
}

/// Orchestrator state; every run ends in a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootState {
    /// Not yet evaluated this start
    Idle,
    /// Staging armed for the next reset; a manual restart is required
    AwaitingManualRestart,
    /// Launcher confirmed as next boot target; normal operation proceeds
    Confirmed,
}

impl BootState {
    /// Whether evaluation has finished for this start
    pub fn is_terminal(self) -> bool {
        !matches!(self, BootState::Idle)
    }
}

/// What a startup evaluation decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootOutcome {
    /// Terminal state reached
    pub state: BootState,

    /// Whether a one-shot request was consumed
    pub one_shot: bool,

    /// Region selected for the next reset
    pub next_boot: RegionKind,
}

impl BootOutcome {
    /// Whether the caller must ask for a restart
    pub fn restart_required(&self) -> bool {
        self.state == BootState::AwaitingManualRestart
    }
}

/// Startup boot decision state machine
pub struct BootOrchestrator<'a, S, B: ?Sized> {
    decisions: &'a mut BootDecisionStore<S>,
    selector: &'a mut B,
    format: ImageFormat,
    state: BootState,
    outcome: Option<BootOutcome>,
}

impl<'a, S, B> BootOrchestrator<'a, S, B>
where
    S: KvStore,
    B: BootTargetSelector + ?Sized,
{
    /// Create an orchestrator in the `Idle` state
    pub fn new(decisions: &'a mut BootDecisionStore<S>, selector: &'a mut B) -> Self {
        Self {
            decisions,
            selector,
            format: ImageFormat::default(),
            state: BootState::Idle,
            outcome: None,
        }
    }

    /// Use `format` to recognise a staged image
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// Current state
    pub fn state(&self) -> BootState {
        self.state
    }

    /// Terminal outcome, once evaluated
    pub fn outcome(&self) -> Option<BootOutcome> {
        self.outcome
    }

    /// Evaluate the boot decision.
    ///
    /// The first call consumes the one-shot flag and acts on it. Later calls
    /// return the recorded outcome without side effects; after a failure
    /// that is the fail-closed `Confirmed` outcome.
    ///
    /// # Errors
    ///
    /// [`BootError::NoRollbackTarget`] if a one-shot was requested but the
    /// launcher is missing or untrusted; the boot target is left untouched
    /// and the flag stays consumed. [`BootError::NothingStaged`] if the
    /// staging region no longer holds a bootable image; the launcher is
    /// re-asserted. Selector failures are returned after the launcher has
    /// been re-asserted where possible.
    pub fn evaluate(&mut self) -> Result<BootOutcome, BootError> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }

        let one_shot = self.decisions.consume_and_clear();
        let result = if one_shot {
            self.arm_staging()
        } else {
            self.confirm_launcher()
        };

        match result {
            Ok(outcome) => {
                self.state = outcome.state;
                self.outcome = Some(outcome);
                Ok(outcome)
            }
            Err(e) => {
                let next_boot = self
                    .selector
                    .boot_target()
                    .unwrap_or(RegionKind::Launcher);
                self.state = BootState::Confirmed;
                self.outcome = Some(BootOutcome {
                    state: BootState::Confirmed,
                    one_shot,
                    next_boot,
                });
                Err(e)
            }
        }
    }

    fn confirm_launcher(&mut self) -> Result<BootOutcome, BootError> {
        self.selector.set_boot_target(RegionKind::Launcher)?;

        match self.selector.trust_state(RegionKind::Launcher) {
            Ok(RegionTrustState::PendingVerify) => {
                if let Err(e) = self.selector.mark_valid(RegionKind::Launcher) {
                    warn!("Failed to confirm launcher image: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read launcher trust state: {}", e),
        }

        info!("Normal start, launcher re-asserted as next boot target");
        Ok(BootOutcome {
            state: BootState::Confirmed,
            one_shot: false,
            next_boot: RegionKind::Launcher,
        })
    }

    fn arm_staging(&mut self) -> Result<BootOutcome, BootError> {
        if let Err(e) = ensure_rollback_target(&*self.selector) {
            error!("One-shot boot refused, no rollback target");
            return Err(e);
        }

        if self.selector.region(RegionKind::Staging).is_none() {
            return Err(SelectorError::RegionMissing(RegionKind::Staging).into());
        }

        if let Err(e) = ensure_image_staged(&*self.selector, &self.format) {
            error!("One-shot boot refused, staging holds no bootable image");
            if let Err(restore) = self.selector.set_boot_target(RegionKind::Launcher) {
                error!("Failed to restore launcher boot target: {}", restore);
            }
            return Err(e);
        }

        if let Err(e) = self.selector.schedule_pending_verify(RegionKind::Staging) {
            error!("Failed to arm staged image, restoring launcher: {}", e);
            if let Err(restore) = self.selector.set_boot_target(RegionKind::Launcher) {
                error!("Failed to restore launcher boot target: {}", restore);
            }
            return Err(e.into());
        }

        info!("Staged image armed for one boot, manual restart required");
        Ok(BootOutcome {
            state: BootState::AwaitingManualRestart,
            one_shot: true,
            next_boot: RegionKind::Staging,
        })
    }
}
