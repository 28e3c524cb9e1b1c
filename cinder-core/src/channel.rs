// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Collaborator interfaces provided by the platform USB layer.
//!
//! The core never enumerates USB or issues raw transfers itself. It sees a
//! [`DeviceHub`] that lists devices, [`Device`] handles that answer identity
//! queries and expose optional capabilities, and the narrow
//! [`ControlChannel`] / [`DebugChannel`] used for the actual protocol traffic.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{
    ControlPacket, FwStatus, DEFAULT_DETACH_TIMEOUT_MS, FW_STATUS_LEN, FW_VERSION_OFFSET,
};

/// Failure of a single collaborator call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The device stalled because it is still busy; retrying later is fine.
    #[error("device busy")]
    Busy,

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("device disconnected")]
    Disconnected,

    #[error("not supported: {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Transfer(String),
}

/// Product families the tool knows how to update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProductLine {
    D400,
    Sr300,
}

impl ProductLine {
    pub fn name(self) -> &'static str {
        match self {
            Self::D400 => "D400",
            Self::Sr300 => "SR300",
        }
    }

    /// Offset of the packed firmware revision inside an image of this line.
    pub fn version_offset(self) -> Option<usize> {
        match self {
            Self::D400 => Some(FW_VERSION_OFFSET),
            Self::Sr300 => None,
        }
    }

    /// Whether the recovery loader of this line reports the unit's serial
    /// number, so a session can follow the unit through the mode switch.
    pub fn reports_recovery_identity(self) -> bool {
        matches!(self, Self::D400)
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "d400" | "d4xx" => Some(Self::D400),
            "sr300" | "sr3xx" => Some(Self::Sr300),
            _ => None,
        }
    }
}

impl fmt::Display for ProductLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The USB identity a device currently enumerates under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Running its normal application firmware.
    Normal(ProductLine),
    /// Running the DFU loader and waiting for an image.
    Recovery(ProductLine),
}

impl DeviceClass {
    pub fn product_line(self) -> ProductLine {
        match self {
            Self::Normal(line) | Self::Recovery(line) => line,
        }
    }

    pub fn is_recovery(self) -> bool {
        matches!(self, Self::Recovery(_))
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(line) => write!(f, "{}", line),
            Self::Recovery(line) => write!(f, "{} recovery", line),
        }
    }
}

/// Synchronous control transfers to one device.
pub trait ControlChannel: Send {
    /// Execute `packet`. For IN requests the reply is written back into the
    /// packet. `timeout` bounds this one call.
    fn transfer(&mut self, packet: &mut ControlPacket, timeout: Duration) -> Result<(), ChannelError>;
}

/// Raw command access to a normal-mode device (hardware monitor).
pub trait DebugChannel: Send {
    /// Send one command packet and return the reply payload.
    fn send_receive(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, ChannelError>;
}

/// One enumerated device. The handle is only valid until the device
/// re-enumerates; after a mode switch a fresh handle must be acquired.
pub trait Device: Send {
    fn class(&self) -> DeviceClass;

    fn name(&self) -> String;

    /// Device-level serial number, `None` if the device does not report one.
    fn serial_number(&self) -> Result<Option<String>, ChannelError>;

    /// Serial numbers of the device's sensors, in sensor order.
    fn sensor_serial_numbers(&self) -> Result<Vec<String>, ChannelError> {
        Ok(Vec::new())
    }

    fn firmware_version(&self) -> Result<Option<String>, ChannelError> {
        Ok(None)
    }

    /// Raw flash access, if this device class supports it.
    fn debug_channel(&mut self) -> Option<&mut dyn DebugChannel> {
        None
    }

    /// Ask the device to reboot into recovery mode. Success means the command
    /// was accepted, not that the switch is complete.
    fn enter_recovery(&mut self) -> Result<(), ChannelError>;

    /// Open a DFU control channel (recovery class only).
    fn open_control(&mut self) -> Result<Box<dyn ControlChannel>, ChannelError>;
}

/// Snapshot access to the set of connected devices.
pub trait DeviceHub: Send + Sync {
    /// Currently connected devices. May be empty.
    fn devices(&self) -> Result<Vec<Box<dyn Device>>, ChannelError>;
}

/// Identity used to follow a unit across re-enumeration: the device serial,
/// or the first sensor's serial when the device does not report or support
/// one. Empty strings count as no identity.
pub fn identity_of(device: &dyn Device) -> Result<Option<String>, ChannelError> {
    match device.serial_number() {
        Ok(Some(serial)) if !serial.is_empty() => return Ok(Some(serial)),
        Ok(_) | Err(ChannelError::Unsupported(_)) => {}
        Err(e) => return Err(e),
    }

    Ok(device
        .sensor_serial_numbers()?
        .into_iter()
        .next()
        .filter(|serial| !serial.is_empty()))
}

/// Read the firmware status block of a recovery device: DETACH, then UPLOAD.
pub fn read_fw_status(
    channel: &mut dyn ControlChannel,
    timeout: Duration,
) -> Result<FwStatus, ChannelError> {
    channel.transfer(&mut ControlPacket::detach(DEFAULT_DETACH_TIMEOUT_MS), timeout)?;

    let mut packet = ControlPacket::upload(FW_STATUS_LEN);
    channel.transfer(&mut packet, timeout)?;

    FwStatus::parse(packet.payload())
        .ok_or_else(|| ChannelError::Transfer("short firmware status block".to_string()))
}
