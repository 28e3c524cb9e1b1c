// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash backup over the hardware-monitor channel.
//!
//! The whole flash is read into memory first and only written to disk once
//! every chunk has been read, so a partial dump never lands on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use log::{debug, info, warn};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::channel::{ChannelError, DebugChannel};
use crate::protocol::{flash_read_request, FLASH_SIZE, MAX_FLASH_READ_CHUNK};

/// Attempts per chunk before the backup is abandoned.
pub const MAX_READ_ATTEMPTS: u32 = 3;

const BACKUP_EXTENSION: &str = "bin";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H_%M_%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub flash_size: u32,
    pub chunk_size: u32,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    /// Overall session progress at the start and end of the backup.
    pub progress_start: u8,
    pub progress_end: u8,
    /// Directory receiving `<serial>.<timestamp>.bin`.
    pub dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            flash_size: FLASH_SIZE,
            chunk_size: MAX_FLASH_READ_CHUNK,
            max_attempts: MAX_READ_ATTEMPTS,
            request_timeout: Duration::from_millis(1000),
            progress_start: 5,
            progress_end: 45,
            dir: PathBuf::from("backups"),
        }
    }
}

impl BackupConfig {
    /// Map a backup fraction onto the session's progress scale.
    pub fn scale_progress(&self, fraction: f32) -> u8 {
        let span = f32::from(self.progress_end.saturating_sub(self.progress_start));
        self.progress_start + (span * fraction.clamp(0.0, 1.0)) as u8
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("flash read at offset {offset:#x} failed after {attempts} attempts: {source}")]
    ChunkFailed {
        offset: u32,
        attempts: u32,
        #[source]
        source: ChannelError,
    },

    #[error("backup cancelled")]
    Cancelled,

    #[error("failed to write backup {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read `config.flash_size` bytes of flash in `config.chunk_size` pieces.
///
/// Each chunk gets `config.max_attempts` tries. A reply of the wrong length
/// counts as a failed try. `progress` receives `i / total_chunks` before
/// chunk `i` is read and `1.0` at the end.
pub fn read_flash(
    debug: &mut dyn DebugChannel,
    config: &BackupConfig,
    progress: &mut dyn FnMut(f32),
    cancel: Option<&CancelToken>,
) -> Result<Vec<u8>, BackupError> {
    let chunk_size = config.chunk_size.max(1);
    let total_chunks = config.flash_size.div_ceil(chunk_size);
    let mut flash = Vec::with_capacity(config.flash_size as usize);

    for i in 0..total_chunks {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(BackupError::Cancelled);
        }
        progress(i as f32 / total_chunks as f32);

        let offset = i * chunk_size;
        let size = chunk_size.min(config.flash_size - offset);
        let data = read_chunk(debug, config, offset, size)?;
        flash.extend_from_slice(&data);
    }

    progress(1.0);
    debug!("read {} bytes of flash in {} chunks", flash.len(), total_chunks);
    Ok(flash)
}

fn read_chunk(
    debug: &mut dyn DebugChannel,
    config: &BackupConfig,
    offset: u32,
    size: u32,
) -> Result<Vec<u8>, BackupError> {
    let request = flash_read_request(offset, size);
    let attempts = config.max_attempts.max(1);
    let mut last_error = ChannelError::Transfer("no attempt made".into());

    for attempt in 1..=attempts {
        let result = debug
            .send_receive(&request, config.request_timeout)
            .and_then(|data| {
                if data.len() == size as usize {
                    Ok(data)
                } else {
                    Err(ChannelError::Transfer(format!(
                        "short flash read: {} of {} bytes",
                        data.len(),
                        size
                    )))
                }
            });

        match result {
            Ok(data) => return Ok(data),
            Err(e) => {
                warn!(
                    "flash read at {:#x} failed (attempt {}/{}): {}",
                    offset, attempt, attempts, e
                );
                last_error = e;
            }
        }
    }

    Err(BackupError::ChunkFailed {
        offset,
        attempts,
        source: last_error,
    })
}

/// File name for a dump of `identity` taken now.
pub fn backup_file_name(identity: &str) -> String {
    let serial: String = identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!(
        "{}.{}.{}",
        serial,
        Local::now().format(TIMESTAMP_FORMAT),
        BACKUP_EXTENSION
    )
}

/// Write `flash` to `dir` under a name derived from `identity`. The data is
/// written to a `.part` file and renamed into place once complete.
pub fn persist_backup(dir: &Path, identity: &str, flash: &[u8]) -> Result<PathBuf, BackupError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| BackupError::Io { path, source }
    };

    fs::create_dir_all(dir).map_err(io_err(dir))?;

    let path = dir.join(backup_file_name(identity));
    let part = path.with_extension(format!("{}.part", BACKUP_EXTENSION));

    fs::write(&part, flash).map_err(io_err(&part))?;
    fs::rename(&part, &path).map_err(io_err(&path))?;

    info!("flash backup saved to {}", path.display());
    Ok(path)
}
