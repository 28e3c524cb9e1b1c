// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! DFU wire protocol shared by the transfer engine, the backup reader and the
//! USB adapter.
//!
//! Everything in here is plain data: request framing, the 6-byte GETSTATUS
//! reply, the recovery-mode firmware status block and the flash read request.
//! Nothing performs I/O.

use std::fmt;

// --- Control transfer constants ---

/// Largest payload carried by a single DOWNLOAD or UPLOAD request.
pub const MAX_CHUNK_SIZE: usize = 1024;

/// Length of a GETSTATUS reply.
pub const STATUS_REPLY_LEN: usize = 6;

/// DFU interface number used in `wIndex`.
pub const INTERFACE_NUMBER: u16 = 0;

/// Host-to-device, class request, interface recipient.
pub const REQUEST_TYPE_OUT: u8 = 0x21;

/// Device-to-host, class request, interface recipient.
pub const REQUEST_TYPE_IN: u8 = 0xA1;

/// `wValue` of the DETACH request, in milliseconds.
pub const DEFAULT_DETACH_TIMEOUT_MS: u16 = 1000;

// --- Firmware image layout ---

/// Offset of the packed firmware revision inside a D400 image.
pub const FW_VERSION_OFFSET: usize = 0x18E;

// --- Recovery-mode firmware status block ---

/// Size of the firmware status block returned by UPLOAD in recovery mode.
pub const FW_STATUS_LEN: usize = 68;

/// Oldest DFU revision that reports the unit serial number.
pub const MIN_IDENTITY_DFU_VERSION: u16 = 25;

// --- Hardware monitor (debug channel) framing ---

pub const HWM_PACKET_LEN: usize = 24;
pub const HWM_MAGIC: u16 = 0xCDAB;
pub const HWM_OPCODE_FLASH_READ: u32 = 0x09;
pub const HWM_OPCODE_ENTER_DFU: u32 = 0x1E;
pub const HWM_OPCODE_GVD: u32 = 0x10;

/// Offset of the packed firmware revision inside a GVD reply.
pub const GVD_FW_VERSION_OFFSET: usize = 12;

/// Fixed header of a flash read request: length, magic, opcode.
pub const FLASH_READ_HEADER: [u8; 8] = [0x14, 0x00, 0xAB, 0xCD, 0x09, 0x00, 0x00, 0x00];

/// Flash capacity of the supported product lines.
pub const FLASH_SIZE: u32 = 0x0020_0000; // 2MB

/// Largest flash read the hardware monitor answers in one reply.
pub const MAX_FLASH_READ_CHUNK: u32 = 1016;

/// DFU class request codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Detach = 0,
    Download = 1,
    Upload = 2,
    GetStatus = 3,
    ClearStatus = 4,
    GetState = 5,
    Abort = 6,
}

/// `bStatus` of a GETSTATUS reply.
///
/// `Malformed` never comes from a device: it marks a reply shorter than
/// [`STATUS_REPLY_LEN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    ErrTarget,
    ErrFile,
    ErrWrite,
    ErrErase,
    ErrCheckErased,
    ErrProg,
    ErrVerify,
    ErrAddress,
    ErrNotDone,
    ErrFirmware,
    ErrVendor,
    ErrUsbr,
    ErrUnknown,
    ErrStalledPkt,
    Malformed,
}

impl StatusCode {
    /// Map a raw `bStatus`; anything unrecognized is `ErrUnknown`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0x00 => Self::Ok,
            0x01 => Self::ErrTarget,
            0x02 => Self::ErrFile,
            0x03 => Self::ErrWrite,
            0x04 => Self::ErrErase,
            0x05 => Self::ErrCheckErased,
            0x06 => Self::ErrProg,
            0x07 => Self::ErrVerify,
            0x08 => Self::ErrAddress,
            0x09 => Self::ErrNotDone,
            0x0A => Self::ErrFirmware,
            0x0B => Self::ErrVendor,
            0x0C => Self::ErrUsbr,
            0x0F => Self::ErrStalledPkt,
            _ => Self::ErrUnknown,
        }
    }

    /// Canonical protocol name, e.g. `ERROR_FILE`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::ErrTarget => "ERROR_TARGET",
            Self::ErrFile => "ERROR_FILE",
            Self::ErrWrite => "ERROR_WRITE",
            Self::ErrErase => "ERROR_ERASE",
            Self::ErrCheckErased => "ERROR_CHECK_ERASED",
            Self::ErrProg => "ERROR_PROG",
            Self::ErrVerify => "ERROR_VERIFY",
            Self::ErrAddress => "ERROR_ADDRESS",
            Self::ErrNotDone => "ERROR_NOTDONE",
            Self::ErrFirmware => "ERROR_FIRMWARE",
            Self::ErrVendor => "ERROR_VENDOR",
            Self::ErrUsbr => "ERROR_USBR",
            Self::ErrUnknown => "ERROR_UNKNOWN",
            Self::ErrStalledPkt => "ERROR_STALLEDPKT",
            Self::Malformed => "MALFORMED_RESPONSE",
        }
    }

    /// What the code means for the person running the update.
    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "no error",
            Self::ErrTarget => "file is not targeted for this device",
            Self::ErrFile => "file seems corrupted; is it a signed firmware image?",
            Self::ErrWrite => "device is unable to write memory",
            Self::ErrErase => "memory erase failed",
            Self::ErrCheckErased => "memory erase check failed",
            Self::ErrProg => "program memory function failed",
            Self::ErrVerify => "programmed memory failed verification",
            Self::ErrAddress => "received address is out of range",
            Self::ErrNotDone => "device does not think it has all of the data yet",
            Self::ErrFirmware => "device firmware is corrupt",
            Self::ErrVendor => "vendor-specific error",
            Self::ErrUsbr => "device detected unexpected USB reset signaling",
            Self::ErrUnknown => "device reported an unknown error",
            Self::ErrStalledPkt => "device stalled an unexpected request",
            Self::Malformed => "device status reply was too short",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Render a raw `bStatus` byte, keeping the value of unrecognized codes.
pub fn describe_raw_status(raw: u8) -> String {
    match raw {
        0x00..=0x0C | 0x0E | 0x0F => StatusCode::from_u8(raw).name().to_string(),
        _ => format!("Unrecognized DFU_STATUS = 0x{:x}", raw),
    }
}

/// `bState` of a GETSTATUS reply.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuState {
    AppIdle = 0,
    AppDetach = 1,
    DfuIdle = 2,
    DownloadSync = 3,
    DownloadBusy = 4,
    DownloadIdle = 5,
    ManifestSync = 6,
    Manifest = 7,
    ManifestWaitReset = 8,
    UploadIdle = 9,
    Error = 10,
}

impl DfuState {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::AppIdle,
            1 => Self::AppDetach,
            2 => Self::DfuIdle,
            3 => Self::DownloadSync,
            4 => Self::DownloadBusy,
            5 => Self::DownloadIdle,
            6 => Self::ManifestSync,
            7 => Self::Manifest,
            8 => Self::ManifestWaitReset,
            9 => Self::UploadIdle,
            10 => Self::Error,
            _ => return None,
        })
    }
}

/// Decoded GETSTATUS reply. Never cached: the device is the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub status: StatusCode,
    pub poll_timeout_ms: u32,
    pub state: DfuState,
    pub string_index: u8,
}

impl DeviceStatus {
    /// Decode a raw reply. Short replies decode as [`DeviceStatus::malformed`].
    /// Out-of-range state bytes decode as `Error`.
    pub fn decode(reply: &[u8]) -> Self {
        if reply.len() < STATUS_REPLY_LEN {
            return Self::malformed();
        }

        let poll_timeout_ms =
            (u32::from(reply[3]) << 16) | (u32::from(reply[2]) << 8) | u32::from(reply[1]);

        Self {
            status: StatusCode::from_u8(reply[0]),
            poll_timeout_ms,
            state: DfuState::from_u8(reply[4]).unwrap_or(DfuState::Error),
            string_index: reply[5],
        }
    }

    pub fn malformed() -> Self {
        Self {
            status: StatusCode::Malformed,
            poll_timeout_ms: 0,
            state: DfuState::Error,
            string_index: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn is_error(&self) -> bool {
        self.state == DfuState::Error
    }
}

/// One control transfer.
///
/// For device-to-host requests the channel fills `data` and sets `length` to
/// the number of bytes actually received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
    pub length: u16,
}

impl ControlPacket {
    fn out(request: Request, value: u16, payload: &[u8]) -> Self {
        Self {
            request_type: REQUEST_TYPE_OUT,
            request: request as u8,
            value,
            index: INTERFACE_NUMBER,
            data: payload.to_vec(),
            length: payload.len() as u16,
        }
    }

    fn input(request: Request, length: usize) -> Self {
        Self {
            request_type: REQUEST_TYPE_IN,
            request: request as u8,
            value: 0,
            index: INTERFACE_NUMBER,
            data: vec![0u8; length],
            length: length as u16,
        }
    }

    /// DOWNLOAD carrying one chunk; an empty payload marks the end of image.
    pub fn download(transaction: u16, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= MAX_CHUNK_SIZE);
        Self::out(Request::Download, transaction, payload)
    }

    pub fn detach(timeout_ms: u16) -> Self {
        Self::out(Request::Detach, timeout_ms, &[])
    }

    pub fn abort() -> Self {
        Self::out(Request::Abort, 0, &[])
    }

    pub fn clear_status() -> Self {
        Self::out(Request::ClearStatus, 0, &[])
    }

    pub fn get_status() -> Self {
        Self::input(Request::GetStatus, STATUS_REPLY_LEN)
    }

    pub fn upload(length: usize) -> Self {
        Self::input(Request::Upload, length)
    }

    pub fn is_device_to_host(&self) -> bool {
        self.request_type & 0x80 != 0
    }

    /// Bytes carried (OUT) or received (IN).
    pub fn payload(&self) -> &[u8] {
        let len = (self.length as usize).min(self.data.len());
        &self.data[..len]
    }
}

/// Build the 24-byte flash read request for one backup chunk.
pub fn flash_read_request(offset: u32, size: u32) -> [u8; HWM_PACKET_LEN] {
    hwm_command(HWM_OPCODE_FLASH_READ, [offset, size, 0, 0])
}

/// Frame a hardware monitor command: length, magic, opcode, four parameters.
pub fn hwm_command(opcode: u32, params: [u32; 4]) -> [u8; HWM_PACKET_LEN] {
    let mut packet = [0u8; HWM_PACKET_LEN];
    packet[..2].copy_from_slice(&((HWM_PACKET_LEN - 4) as u16).to_le_bytes());
    packet[2..4].copy_from_slice(&HWM_MAGIC.to_le_bytes());
    packet[4..8].copy_from_slice(&opcode.to_le_bytes());
    for (i, param) in params.iter().enumerate() {
        let at = 8 + i * 4;
        packet[at..at + 4].copy_from_slice(&param.to_le_bytes());
    }
    packet
}

/// Firmware status block read via UPLOAD while in recovery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwStatus {
    pub last_version: u32,
    pub highest_version: u32,
    pub download_status: u16,
    pub dfu_locked: bool,
    pub dfu_version: u16,
    pub serial: [u8; 6],
}

impl FwStatus {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < FW_STATUS_LEN {
            return None;
        }
        let u32_at = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let u16_at = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);

        let mut serial = [0u8; 6];
        serial.copy_from_slice(&raw[18..24]);

        Some(Self {
            last_version: u32_at(4),
            highest_version: u32_at(8),
            download_status: u16_at(12),
            dfu_locked: u16_at(14) != 0,
            dfu_version: u16_at(16),
            serial,
        })
    }

    /// Whether this DFU revision reports a usable serial number.
    pub fn supports_identity(&self) -> bool {
        self.dfu_version >= MIN_IDENTITY_DFU_VERSION
    }

    /// Serial number as 12 uppercase hex digits.
    pub fn serial_number(&self) -> String {
        self.serial.iter().map(|b| format!("{:02X}", b)).collect()
    }
}
