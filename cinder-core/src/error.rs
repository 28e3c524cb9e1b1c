// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Session-level error. Each phase returns its own error type and the
//! orchestrator folds them into [`UpdateError`] before turning the failure
//! into the session's reason string.

use thiserror::Error;

use crate::channel::ProductLine;

pub use crate::backup::BackupError;
pub use crate::channel::ChannelError;
pub use crate::image::ImageError;
pub use crate::poller::PollError;
pub use crate::tracker::TrackerError;
pub use crate::transfer::TransferError;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("invalid firmware image: {0}")]
    Image(#[from] ImageError),

    #[error("flash backup failed: {0}")]
    Backup(#[from] BackupError),

    #[error("firmware transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("device communication failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("failed to start update task: {0}")]
    Spawn(std::io::Error),

    #[error("device has no serial number; cannot follow it through recovery")]
    NoIdentity,

    #[error(
        "{0} devices do not report a serial number in recovery mode; switch the device to recovery mode and flash it directly"
    )]
    RecoveryIdentityUnsupported(ProductLine),

    #[error("recovery device did not connect in time; reconnect the device and retry")]
    RecoveryTimeout,

    #[error("original device did not reconnect in time; unplug and reconnect the device")]
    ReconnectTimeout,

    #[error("cancelled")]
    Cancelled,
}

impl UpdateError {
    /// Whether the failure came from a cancellation request rather than the
    /// device or the host.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Backup(BackupError::Cancelled)
                | Self::Transfer(TransferError::Cancelled)
        )
    }

    pub(crate) fn from_tracker(e: TrackerError, timeout: Self) -> Self {
        match e {
            TrackerError::TimedOut { .. } => timeout,
            TrackerError::Cancelled => Self::Cancelled,
        }
    }
}
