// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Core of the cinder firmware updater.
//!
//! Everything here runs against the collaborator traits in [`channel`], so
//! the whole update flow can be exercised without hardware:
//! - [`protocol`]: DFU wire format, status decoding, firmware status block
//! - [`transfer`]: chunked download with per-chunk acknowledgement
//! - [`backup`]: flash dump before anything destructive happens
//! - [`tracker`]: find the same unit again after it re-enumerates
//! - [`updater`]: the session state machine tying it together

pub mod backup;
pub mod cancel;
pub mod channel;
pub mod clock;
pub mod error;
pub mod image;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod tracker;
pub mod transfer;
pub mod updater;
pub mod version;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use channel::{ControlChannel, DebugChannel, Device, DeviceClass, DeviceHub, ProductLine};
pub use clock::{Clock, SystemClock};
pub use error::UpdateError;
pub use image::{FirmwareCatalog, FirmwareImage};
pub use protocol::{DeviceStatus, DfuState, StatusCode};
pub use session::{Outcome, Phase, SessionSnapshot};
pub use updater::{UpdateConfig, UpdateHandle, Updater};
pub use version::{is_upgradeable, FirmwareVersion};
