// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Chunked DFU download with per-chunk acknowledgement.
//!
//! One transaction is outstanding at a time: a chunk is sent, then GETSTATUS
//! is polled until the device is back in `DOWNLOAD_IDLE` (or has failed)
//! before the next chunk goes out. A zero-length DOWNLOAD ends the image and
//! the manifest wait confirms the device programmed it.

use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::channel::{ChannelError, ControlChannel};
use crate::clock::Clock;
use crate::poller::{query_status, PollError, StatePoller, DEFAULT_REQUEST_TIMEOUT};
use crate::protocol::{
    ControlPacket, DeviceStatus, DfuState, StatusCode, DEFAULT_DETACH_TIMEOUT_MS, MAX_CHUNK_SIZE,
};

/// One slice of the image, sent as a single DOWNLOAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: usize,
    pub len: usize,
    pub transaction: u16,
}

/// Split `total` bytes into consecutive chunks of at most `max_chunk` bytes.
/// Every chunk but the last is exactly `max_chunk` long.
pub fn chunks(total: usize, max_chunk: usize) -> impl Iterator<Item = Chunk> {
    let max_chunk = max_chunk.max(1);
    let count = total.div_ceil(max_chunk);

    (0..count).map(move |i| {
        let offset = i * max_chunk;
        Chunk {
            offset,
            len: max_chunk.min(total - offset),
            transaction: i as u16,
        }
    })
}

/// Timing and sizing of the download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    pub max_chunk: usize,
    pub chunk_timeout: Duration,
    pub chunk_poll: Duration,
    pub manifest_timeout: Duration,
    pub manifest_poll: Duration,
    pub request_timeout: Duration,
    pub detach_timeout_ms: u16,
    /// Pause between the end-of-image request and the manifest wait.
    pub settle_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_chunk: MAX_CHUNK_SIZE,
            chunk_timeout: Duration::from_secs(5),
            chunk_poll: Duration::from_millis(5),
            manifest_timeout: Duration::from_secs(15),
            manifest_poll: Duration::from_millis(200),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            detach_timeout_ms: DEFAULT_DETACH_TIMEOUT_MS,
            settle_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("firmware image is empty")]
    EmptyImage,

    #[error("unexpected DFU state from the last session: {0:?}")]
    UnexpectedState(DfuState),

    #[error("ERROR_FILE at transaction {transaction}: firmware file seems corrupted; is it a signed image?")]
    CorruptedImage { transaction: u16 },

    #[error("{status} at transaction {transaction}: {}", status.description())]
    Device { status: StatusCode, transaction: u16 },

    #[error("device entered the DFU error state at transaction {transaction}")]
    ErrorState { transaction: u16 },

    #[error("no acknowledgement for transaction {transaction} within {timeout:?}")]
    ChunkTimeout { transaction: u16, timeout: Duration },

    #[error("firmware manifest did not finish within {0:?}")]
    ManifestTimeout(Duration),

    #[error("firmware manifest failed with {0}: {}", .0.description())]
    ManifestStatus(StatusCode),

    #[error("firmware manifest failed: device in DFU error state")]
    ManifestErrorState,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("control transfer failed: {0}")]
    Channel(#[from] ChannelError),
}

impl TransferError {
    /// Device status code behind this failure, if the device reported one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::CorruptedImage { .. } => Some(StatusCode::ErrFile),
            Self::Device { status, .. } | Self::ManifestStatus(status) => Some(*status),
            _ => None,
        }
    }

    /// Whether restarting the whole session could succeed. A rejected image
    /// will be rejected again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::EmptyImage | Self::CorruptedImage { .. } | Self::ManifestStatus(StatusCode::ErrFile)
        )
    }
}

/// Drives one download over an open recovery-mode control channel.
pub struct TransferEngine<'a> {
    channel: &'a mut dyn ControlChannel,
    clock: &'a dyn Clock,
    config: &'a TransferConfig,
    cancel: Option<&'a CancelToken>,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        channel: &'a mut dyn ControlChannel,
        clock: &'a dyn Clock,
        config: &'a TransferConfig,
    ) -> Self {
        Self {
            channel,
            clock,
            config,
            cancel: None,
        }
    }

    /// Observe `token` between chunks. A chunk already sent always runs to
    /// its acknowledgement, and the manifest wait is never interrupted.
    pub fn cancellable(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// DETACH, then check the device is idle and ready for a new download.
    pub fn prepare(&mut self) -> Result<DeviceStatus, TransferError> {
        let mut detach = ControlPacket::detach(self.config.detach_timeout_ms);
        self.channel.transfer(
            &mut detach,
            Duration::from_millis(u64::from(self.config.detach_timeout_ms)),
        )?;

        let status = query_status(self.channel, self.config.request_timeout)?;
        debug!(
            "DFU status {} state {:?} poll {}ms string {}",
            status.status, status.state, status.poll_timeout_ms, status.string_index
        );

        match status.state {
            DfuState::AppIdle | DfuState::DfuIdle => Ok(status),
            other => Err(TransferError::UnexpectedState(other)),
        }
    }

    /// Send `image` chunk by chunk, end it with a zero-length DOWNLOAD and
    /// wait for the manifest phase. `progress` receives the fraction of the
    /// image acknowledged so far, ending at `1.0` before the manifest wait.
    pub fn transfer(
        &mut self,
        image: &[u8],
        progress: &mut dyn FnMut(f32),
    ) -> Result<(), TransferError> {
        let transaction = self.download(image, progress)?;

        self.send(transaction, &[])?;
        self.clock.sleep(self.config.settle_delay);
        progress(1.0);

        self.manifest()?;
        Ok(())
    }

    /// Send every chunk. Returns the next unused transaction number.
    fn download(
        &mut self,
        image: &[u8],
        progress: &mut dyn FnMut(f32),
    ) -> Result<u16, TransferError> {
        if image.is_empty() {
            return Err(TransferError::EmptyImage);
        }

        let total = image.len();
        let mut total_sent = 0usize;
        let mut transaction = 0u16;

        for chunk in chunks(total, self.config.max_chunk) {
            if self.cancel.is_some_and(|token| token.is_cancelled()) {
                self.abort();
                return Err(TransferError::Cancelled);
            }

            self.send(transaction, &image[chunk.offset..chunk.offset + chunk.len])?;
            let sent = transaction;
            transaction = transaction.wrapping_add(1);
            total_sent += chunk.len;
            progress(total_sent as f32 / total as f32);

            self.await_chunk_ack(sent)?;
        }

        info!("sent {} bytes in {} transactions", total_sent, transaction);
        Ok(transaction)
    }

    fn send(&mut self, transaction: u16, payload: &[u8]) -> Result<(), TransferError> {
        let mut packet = ControlPacket::download(transaction, payload);
        self.channel
            .transfer(&mut packet, self.config.request_timeout)?;
        Ok(())
    }

    fn await_chunk_ack(&mut self, transaction: u16) -> Result<(), TransferError> {
        let poller = StatePoller::new(self.clock).with_request_timeout(self.config.request_timeout);
        let status = poller
            .wait_for_states(
                self.channel,
                &[DfuState::DownloadIdle, DfuState::Error],
                self.config.chunk_timeout,
                self.config.chunk_poll,
            )
            .map_err(|e| match e {
                PollError::Timeout { timeout, .. } => TransferError::ChunkTimeout {
                    transaction,
                    timeout,
                },
                PollError::Cancelled => TransferError::Cancelled,
                PollError::Channel(e) => TransferError::Channel(e),
            })?;

        if status.status == StatusCode::ErrFile {
            return Err(TransferError::CorruptedImage { transaction });
        }
        if !status.is_ok() {
            return Err(TransferError::Device {
                status: status.status,
                transaction,
            });
        }
        if status.is_error() {
            return Err(TransferError::ErrorState { transaction });
        }
        Ok(())
    }

    /// Wait for the device to finish programming. Success only in
    /// `MANIFEST_WAIT_RESET` with an OK status.
    pub fn manifest(&mut self) -> Result<DeviceStatus, TransferError> {
        info!("running post download processes");
        let poller = StatePoller::new(self.clock).with_request_timeout(self.config.request_timeout);
        let status = poller
            .wait_for_states(
                self.channel,
                &[DfuState::ManifestWaitReset, DfuState::Error],
                self.config.manifest_timeout,
                self.config.manifest_poll,
            )
            .map_err(|e| match e {
                PollError::Timeout { timeout, .. } => TransferError::ManifestTimeout(timeout),
                PollError::Cancelled => TransferError::Cancelled,
                PollError::Channel(e) => TransferError::Channel(e),
            })?;

        if !status.is_ok() {
            return Err(TransferError::ManifestStatus(status.status));
        }
        if status.state != DfuState::ManifestWaitReset {
            return Err(TransferError::ManifestErrorState);
        }
        Ok(status)
    }

    fn abort(&mut self) {
        let mut packet = ControlPacket::abort();
        if let Err(e) = self.channel.transfer(&mut packet, self.config.request_timeout) {
            warn!("DFU abort failed: {}", e);
        }
    }
}
