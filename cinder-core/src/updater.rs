// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update orchestrator.
//!
//! A session runs on its own thread and walks
//! `Idle -> BackingUp -> EnteringRecovery -> WaitingForRecoveryDevice ->
//! Transferring -> WaitingForReconnect -> Done`. Any phase error ends it in
//! `Failed(reason)`. Observers poll the shared session through the
//! [`UpdateHandle`]; dropping the handle cancels the session at the next
//! safe point.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::backup::{persist_backup, read_flash, BackupConfig};
use crate::cancel::CancelToken;
use crate::channel::{identity_of, DebugChannel, Device, DeviceHub};
use crate::clock::{Clock, SystemClock};
use crate::error::UpdateError;
use crate::image::{crc32, FirmwareCatalog, FirmwareImage};
use crate::session::{Outcome, Phase, SessionSnapshot, SharedSession};
use crate::tracker::{IdentityTracker, Wanted, SCAN_INTERVAL};
use crate::transfer::{TransferConfig, TransferEngine};

/// Appended to the log of every failed session.
pub const REASSURANCE: &str = "device update process is safe; reconnect the device to retry";

/// Progress once the recovery device has been found.
pub const PROGRESS_RECOVERY_FOUND: u8 = 50;
/// Progress once the manifest phase has finished.
pub const PROGRESS_TRANSFERRED: u8 = 90;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    pub transfer: TransferConfig,
    /// `None` skips the flash backup even on devices that support it.
    pub backup: Option<BackupConfig>,
    pub recovery_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub scan_interval: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            backup: Some(BackupConfig::default()),
            recovery_timeout: Duration::from_secs(60),
            reconnect_timeout: Duration::from_secs(60),
            scan_interval: SCAN_INTERVAL,
        }
    }
}

/// Starts update sessions against devices of one hub.
pub struct Updater {
    hub: Arc<dyn DeviceHub>,
    clock: Arc<dyn Clock>,
    config: UpdateConfig,
    catalog: FirmwareCatalog,
}

impl Updater {
    pub fn new(hub: Arc<dyn DeviceHub>, config: UpdateConfig, catalog: FirmwareCatalog) -> Self {
        Self {
            hub,
            clock: Arc::new(SystemClock),
            config,
            catalog,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn catalog(&self) -> &FirmwareCatalog {
        &self.catalog
    }

    /// Validate `image` against `device` and start a session in the
    /// background. Input errors are returned here and no session is started.
    /// A normal-mode device is refused when its recovery loader cannot be
    /// matched back to it; such units are flashed from recovery mode.
    pub fn start(
        &self,
        device: Box<dyn Device>,
        image: FirmwareImage,
    ) -> Result<UpdateHandle, UpdateError> {
        let class = device.class();
        image.validate_for(class)?;
        if !class.is_recovery() && !class.product_line().reports_recovery_identity() {
            return Err(UpdateError::RecoveryIdentityUnsupported(class.product_line()));
        }

        let session = SharedSession::new();
        let cancel = CancelToken::new();
        let run = SessionRun {
            hub: Arc::clone(&self.hub),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            session: session.clone(),
            cancel: cancel.clone(),
            image,
        };

        let thread = thread::Builder::new()
            .name("cinder-update".into())
            .spawn(move || run.execute(device))
            .map_err(UpdateError::Spawn)?;

        Ok(UpdateHandle {
            session,
            cancel,
            thread: Some(thread),
        })
    }

    /// Start a session with the catalog's image for the device's line.
    pub fn start_default(&self, device: Box<dyn Device>) -> Result<UpdateHandle, UpdateError> {
        let image = self
            .catalog
            .image_for(device.class().product_line())?
            .clone();
        self.start(device, image)
    }
}

/// Caller side of a running session.
pub struct UpdateHandle {
    session: SharedSession,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl UpdateHandle {
    pub fn progress(&self) -> u8 {
        self.session.progress()
    }

    pub fn log(&self) -> Vec<String> {
        self.session.log()
    }

    pub fn error(&self) -> String {
        self.session.error()
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn is_done(&self) -> bool {
        self.session.is_done()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Ask the session to stop at the next safe point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the session finishes.
    pub fn wait(mut self) -> Outcome {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                self.session.finish_failed("update task panicked");
            }
        }
        self.session
            .snapshot()
            .outcome()
            .unwrap_or_else(|| Outcome::Failed("update task ended without a result".into()))
    }
}

impl Drop for UpdateHandle {
    fn drop(&mut self) {
        // Abandoned: let the task wind down on its own.
        if self.thread.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Everything the background task owns.
struct SessionRun {
    hub: Arc<dyn DeviceHub>,
    clock: Arc<dyn Clock>,
    config: UpdateConfig,
    session: SharedSession,
    cancel: CancelToken,
    image: FirmwareImage,
}

impl SessionRun {
    fn execute(self, device: Box<dyn Device>) {
        self.note(format!(
            "firmware image: {} bytes for {}, CRC32 {:#010x}",
            self.image.len(),
            self.image.product_line(),
            self.image.crc32()
        ));
        if let Some(version) = self.image.embedded_version() {
            self.note(format!("image firmware version {}", version));
        }

        let result = if device.class().is_recovery() {
            self.run_from_recovery(device)
        } else {
            self.run_full(device)
        };

        match result {
            Ok(()) => {
                self.note("firmware update done");
                self.session.finish_done();
            }
            Err(e) => {
                let reason = if e.is_cancelled() {
                    "cancelled".to_string()
                } else {
                    e.to_string()
                };
                error!("firmware update failed: {}", reason);
                self.session.append_log(format!("firmware update failed: {}", reason));
                self.session.append_log(REASSURANCE);
                self.session.finish_failed(reason);
            }
        }
    }

    fn run_full(&self, mut device: Box<dyn Device>) -> Result<(), UpdateError> {
        self.ensure_live()?;
        let identity = identity_of(device.as_ref())?.ok_or(UpdateError::NoIdentity)?;
        self.note(format!("updating {} ({})", device.name(), identity));

        if let Some(config) = &self.config.backup {
            match device.debug_channel() {
                Some(debug) => self.backup(debug, config, &identity)?,
                None => self.note("device does not support flash backup, skipping"),
            }
        }

        self.ensure_live()?;
        self.enter_phase(Phase::EnteringRecovery);
        device.enter_recovery()?;
        self.note("device switching to recovery mode");
        drop(device);

        self.ensure_live()?;
        self.enter_phase(Phase::WaitingForRecoveryDevice);
        let recovery = self
            .tracker()
            .reacquire(&identity, Wanted::Recovery, self.config.recovery_timeout)
            .map_err(|e| UpdateError::from_tracker(e, UpdateError::RecoveryTimeout))?;
        self.note(format!("recovery device connected: {}", recovery.name()));
        self.session.set_progress(PROGRESS_RECOVERY_FOUND);

        self.transfer(recovery)?;
        self.await_reconnect(&identity)
    }

    /// The device is already in recovery mode: go straight to the transfer.
    fn run_from_recovery(&self, device: Box<dyn Device>) -> Result<(), UpdateError> {
        self.note(format!("{} is already in recovery mode", device.name()));
        let identity = match identity_of(device.as_ref()) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("failed to read recovery device serial: {}", e);
                None
            }
        };
        self.session.set_progress(PROGRESS_RECOVERY_FOUND);

        self.transfer(device)?;
        match identity {
            Some(identity) => self.await_reconnect(&identity),
            None => {
                self.note("device serial unavailable in recovery mode, skipping reconnect check");
                Ok(())
            }
        }
    }

    fn backup(
        &self,
        debug: &mut dyn DebugChannel,
        config: &BackupConfig,
        identity: &str,
    ) -> Result<(), UpdateError> {
        self.enter_phase(Phase::BackingUp);
        self.session.set_progress(config.progress_start);
        self.note("backing up camera flash memory");

        let session = self.session.clone();
        let flash = read_flash(
            debug,
            config,
            &mut |fraction| session.set_progress(config.scale_progress(fraction)),
            Some(&self.cancel),
        )?;
        let path = persist_backup(&config.dir, identity, &flash)?;

        self.note(format!(
            "backup completed and saved as {} (CRC32 {:#010x})",
            path.display(),
            crc32(&flash)
        ));
        self.session.set_progress(config.progress_end);
        Ok(())
    }

    fn transfer(&self, mut device: Box<dyn Device>) -> Result<(), UpdateError> {
        self.ensure_live()?;
        self.enter_phase(Phase::Transferring);
        self.note("sending firmware image");

        let mut channel = device.open_control()?;
        let mut engine =
            TransferEngine::new(channel.as_mut(), self.clock.as_ref(), &self.config.transfer)
                .cancellable(&self.cancel);
        engine.prepare()?;

        let session = self.session.clone();
        let span = f32::from(PROGRESS_TRANSFERRED - PROGRESS_RECOVERY_FOUND);
        engine.transfer(self.image.data(), &mut |fraction| {
            session.set_progress(PROGRESS_RECOVERY_FOUND + (span * fraction.clamp(0.0, 1.0)) as u8)
        })?;

        self.note("firmware download completed successfully");
        self.session.set_progress(PROGRESS_TRANSFERRED);
        Ok(())
    }

    fn await_reconnect(&self, identity: &str) -> Result<(), UpdateError> {
        self.ensure_live()?;
        self.enter_phase(Phase::WaitingForReconnect);
        self.note("waiting for the device to reconnect");

        let device = self
            .tracker()
            .reacquire(identity, Wanted::Original, self.config.reconnect_timeout)
            .map_err(|e| UpdateError::from_tracker(e, UpdateError::ReconnectTimeout))?;

        let version = device.firmware_version().ok().flatten();
        match version {
            Some(version) => self.note(format!(
                "{} reconnected with firmware {}",
                device.name(),
                version
            )),
            None => self.note(format!("{} reconnected", device.name())),
        }
        self.session.set_progress(100);
        Ok(())
    }

    fn tracker(&self) -> IdentityTracker<'_> {
        IdentityTracker::new(self.hub.as_ref(), self.clock.as_ref())
            .with_interval(self.config.scan_interval)
            .cancellable(&self.cancel)
    }

    fn ensure_live(&self) -> Result<(), UpdateError> {
        if self.cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        Ok(())
    }

    fn enter_phase(&self, phase: Phase) {
        info!("phase: {}", phase);
        self.session.set_phase(phase);
    }

    fn note(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        self.session.append_log(line);
    }
}
