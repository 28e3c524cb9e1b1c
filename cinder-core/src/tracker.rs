// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Follow one physical unit across re-enumeration.
//!
//! After a mode switch the old handle is dead. The tracker keeps only the
//! identity string and rescans the hub until a device with that identity
//! shows up in the wanted class.

use std::time::Duration;

use log::{debug, trace, warn};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::channel::{identity_of, Device, DeviceClass, DeviceHub};
use crate::clock::Clock;

/// Interval between hub scans.
pub const SCAN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("no device with serial {identity} appeared within {timeout:?}")]
    TimedOut { identity: String, timeout: Duration },

    #[error("device search cancelled")]
    Cancelled,
}

/// Which class a candidate must enumerate under to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wanted {
    /// The recovery-mode loader.
    Recovery,
    /// The unit back in normal operation.
    Original,
}

impl Wanted {
    pub fn accepts(self, class: DeviceClass) -> bool {
        match self {
            Self::Recovery => class.is_recovery(),
            Self::Original => !class.is_recovery(),
        }
    }
}

pub struct IdentityTracker<'a> {
    hub: &'a dyn DeviceHub,
    clock: &'a dyn Clock,
    interval: Duration,
    cancel: Option<&'a CancelToken>,
}

impl<'a> IdentityTracker<'a> {
    pub fn new(hub: &'a dyn DeviceHub, clock: &'a dyn Clock) -> Self {
        Self {
            hub,
            clock,
            interval: SCAN_INTERVAL,
            cancel: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn cancellable(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Scan until a device of the `wanted` class reports `identity`.
    ///
    /// A candidate whose identity cannot be read is skipped and the scan
    /// moves on to the next one. A failed hub listing counts as an empty
    /// snapshot. The first match wins.
    pub fn reacquire(
        &self,
        identity: &str,
        wanted: Wanted,
        timeout: Duration,
    ) -> Result<Box<dyn Device>, TrackerError> {
        let start = self.clock.now();
        debug!("waiting up to {:?} for {:?} device {}", timeout, wanted, identity);

        loop {
            if self.cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(TrackerError::Cancelled);
            }

            if let Some(device) = self.scan(identity, wanted) {
                debug!(
                    "found {} ({}) after {:?}",
                    device.name(),
                    device.class(),
                    self.clock.now().duration_since(start)
                );
                return Ok(device);
            }

            if self.clock.now().duration_since(start) >= timeout {
                return Err(TrackerError::TimedOut {
                    identity: identity.to_string(),
                    timeout,
                });
            }

            self.clock.sleep(self.interval);
        }
    }

    fn scan(&self, identity: &str, wanted: Wanted) -> Option<Box<dyn Device>> {
        let devices = match self.hub.devices() {
            Ok(devices) => devices,
            Err(e) => {
                trace!("device list unavailable: {}", e);
                return None;
            }
        };

        for device in devices {
            if !wanted.accepts(device.class()) {
                continue;
            }
            match identity_of(device.as_ref()) {
                Ok(Some(serial)) if serial == identity => return Some(device),
                Ok(_) => {}
                Err(e) => warn!("skipping {}: failed to read serial: {}", device.name(), e),
            }
        }
        None
    }
}
