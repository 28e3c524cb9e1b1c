// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! libusb transport: device enumeration, DFU control transfers and the
//! hardware monitor bulk channel.

use std::time::Duration;

use log::debug;
use rusb::{DeviceDescriptor, DeviceHandle, Direction, GlobalContext, TransferType};

use cinder_core::channel::{
    read_fw_status, ChannelError, ControlChannel, DebugChannel, Device, DeviceClass, DeviceHub,
    ProductLine,
};
use cinder_core::protocol::{
    hwm_command, ControlPacket, FwStatus, Request, GVD_FW_VERSION_OFFSET, HWM_OPCODE_ENTER_DFU,
    HWM_OPCODE_GVD, INTERFACE_NUMBER,
};
use cinder_core::version::FirmwareVersion;

/// Default timeout for USB operations in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

pub const VENDOR_ID: u16 = 0x8086;

const D400_PIDS: &[u16] = &[
    0x0AD1, 0x0AD2, 0x0AD3, 0x0AD4, 0x0AD6, 0x0AF6, 0x0AFE, 0x0AFF, 0x0B00, 0x0B01, 0x0B03,
    0x0B07, 0x0B0C, 0x0B3A, 0x0B5B, 0x0B5C,
];
const D400_RECOVERY_PIDS: &[u16] = &[0x0ADB, 0x0ADC, 0x0AF5];
const SR300_PIDS: &[u16] = &[0x0AA5, 0x0B48];
const SR300_RECOVERY_PIDS: &[u16] = &[0x0AB3];

/// Interface class of the hardware monitor.
const VENDOR_SPECIFIC_CLASS: u8 = 0xFF;

/// Largest hardware monitor reply.
const HWM_REPLY_LEN: usize = 1024;

type Handle = DeviceHandle<GlobalContext>;

fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}

/// Map a USB vendor/product pair onto a supported device class.
pub fn classify(vendor_id: u16, product_id: u16) -> Option<DeviceClass> {
    if vendor_id != VENDOR_ID {
        return None;
    }
    let class = if D400_PIDS.contains(&product_id) {
        DeviceClass::Normal(ProductLine::D400)
    } else if D400_RECOVERY_PIDS.contains(&product_id) {
        DeviceClass::Recovery(ProductLine::D400)
    } else if SR300_PIDS.contains(&product_id) {
        DeviceClass::Normal(ProductLine::Sr300)
    } else if SR300_RECOVERY_PIDS.contains(&product_id) {
        DeviceClass::Recovery(ProductLine::Sr300)
    } else {
        return None;
    };
    Some(class)
}

fn channel_error(err: rusb::Error, timeout: Duration) -> ChannelError {
    match err {
        rusb::Error::Pipe => ChannelError::Busy,
        rusb::Error::Timeout => ChannelError::Timeout(timeout),
        rusb::Error::NoDevice => ChannelError::Disconnected,
        rusb::Error::NotSupported => ChannelError::Unsupported("operation not supported by libusb"),
        other => ChannelError::Transfer(other.to_string()),
    }
}

/// Run one control transfer on `handle`, filling IN replies into the packet.
fn control(handle: &Handle, packet: &mut ControlPacket, timeout: Duration) -> Result<(), rusb::Error> {
    if packet.is_device_to_host() {
        let received = handle.read_control(
            packet.request_type,
            packet.request,
            packet.value,
            packet.index,
            &mut packet.data,
            timeout,
        )?;
        packet.length = received as u16;
    } else {
        let len = packet.payload().len();
        handle.write_control(
            packet.request_type,
            packet.request,
            packet.value,
            packet.index,
            &packet.data[..len],
            timeout,
        )?;
    }
    Ok(())
}

// =============================================================================
// Enumeration
// =============================================================================

/// All supported devices on the system bus.
#[derive(Debug, Default)]
pub struct UsbHub;

impl DeviceHub for UsbHub {
    fn devices(&self) -> Result<Vec<Box<dyn Device>>, ChannelError> {
        let list = rusb::devices().map_err(|e| channel_error(e, Duration::ZERO))?;
        let mut found: Vec<Box<dyn Device>> = Vec::new();

        for device in list.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(_) => continue,
            };
            let (vid, pid) = (descriptor.vendor_id(), descriptor.product_id());
            let Some(class) = classify(vid, pid) else {
                continue;
            };

            match UsbDevice::open(device, descriptor, class) {
                Ok(usb) => found.push(Box::new(usb)),
                Err(e) => debug!("skipping {:04x}:{:04x}: {}", vid, pid, e),
            }
        }

        Ok(found)
    }
}

// =============================================================================
// Devices
// =============================================================================

/// One supported device. Interfaces are claimed on first use, so listing
/// devices leaves them free for other programs.
pub struct UsbDevice {
    device: rusb::Device<GlobalContext>,
    handle: Handle,
    descriptor: DeviceDescriptor,
    class: DeviceClass,
    name: String,
    hwm_endpoints: Option<HwmEndpoints>,
    hwm: Option<HwmChannel>,
}

impl UsbDevice {
    fn open(
        device: rusb::Device<GlobalContext>,
        descriptor: DeviceDescriptor,
        class: DeviceClass,
    ) -> Result<Self, rusb::Error> {
        let handle = device.open()?;
        let name = handle
            .read_product_string_ascii(&descriptor)
            .unwrap_or_else(|_| format!("Intel RealSense {}", class.product_line()));
        let hwm_endpoints = if class.is_recovery() {
            None
        } else {
            find_hwm_endpoints(&device)
        };

        Ok(Self {
            device,
            handle,
            descriptor,
            class,
            name,
            hwm_endpoints,
            hwm: None,
        })
    }

    /// Open a handle of its own and claim `interface` on it.
    fn claim(&self, interface: u8) -> Result<Handle, ChannelError> {
        let timeout = default_timeout();
        let mut handle = self.device.open().map_err(|e| channel_error(e, timeout))?;
        // Not available on every platform; claiming reports the real problem.
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle
            .claim_interface(interface)
            .map_err(|e| channel_error(e, timeout))?;
        debug!("{}: claimed interface {}", self.name, interface);
        Ok(handle)
    }

    fn open_dfu(&self) -> Result<DfuControl, ChannelError> {
        let handle = self.claim(INTERFACE_NUMBER as u8)?;
        Ok(DfuControl { handle })
    }

    fn open_hwm(&self) -> Result<HwmChannel, ChannelError> {
        let endpoints = self
            .hwm_endpoints
            .as_ref()
            .ok_or(ChannelError::Unsupported("hardware monitor not available"))?;
        let handle = self.claim(endpoints.interface)?;
        Ok(HwmChannel {
            handle,
            ep_out: endpoints.ep_out,
            ep_in: endpoints.ep_in,
        })
    }

    /// Cached hardware monitor channel, claimed on first call.
    fn hwm(&mut self) -> Result<&mut HwmChannel, ChannelError> {
        if self.hwm.is_none() {
            self.hwm = Some(self.open_hwm()?);
        }
        self.hwm
            .as_mut()
            .ok_or(ChannelError::Unsupported("hardware monitor not available"))
    }

    fn fw_status(&self) -> Result<FwStatus, ChannelError> {
        let mut dfu = self.open_dfu()?;
        read_fw_status(&mut dfu, default_timeout())
    }

    fn gvd_version(hwm: &HwmChannel) -> Result<Option<String>, ChannelError> {
        let gvd = hwm.command(&hwm_command(HWM_OPCODE_GVD, [0; 4]), default_timeout())?;
        let Some(raw) = gvd.get(GVD_FW_VERSION_OFFSET..GVD_FW_VERSION_OFFSET + 4) else {
            return Ok(None);
        };
        let word = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Ok(Some(FirmwareVersion::from_packed(word).to_string()))
    }
}

impl Device for UsbDevice {
    fn class(&self) -> DeviceClass {
        self.class
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn serial_number(&self) -> Result<Option<String>, ChannelError> {
        match self.class {
            DeviceClass::Normal(_) => {
                if self.descriptor.serial_number_string_index().is_none() {
                    return Ok(None);
                }
                self.handle
                    .read_serial_number_string_ascii(&self.descriptor)
                    .map(|serial| Some(serial.trim().to_string()))
                    .map_err(|e| channel_error(e, default_timeout()))
            }
            DeviceClass::Recovery(ProductLine::D400) => {
                let status = self.fw_status()?;
                if !status.supports_identity() {
                    debug!(
                        "{}: DFU version {} does not report a serial number",
                        self.name, status.dfu_version
                    );
                    return Ok(None);
                }
                Ok(Some(status.serial_number()))
            }
            DeviceClass::Recovery(ProductLine::Sr300) => {
                Err(ChannelError::Unsupported("serial number in SR300 recovery mode"))
            }
        }
    }

    fn firmware_version(&self) -> Result<Option<String>, ChannelError> {
        match self.class {
            DeviceClass::Normal(ProductLine::D400) => {
                if let Some(hwm) = &self.hwm {
                    return Self::gvd_version(hwm);
                }
                match self.open_hwm() {
                    Ok(hwm) => Self::gvd_version(&hwm),
                    Err(e) => {
                        debug!("{}: cannot open hardware monitor: {}", self.name, e);
                        Ok(None)
                    }
                }
            }
            DeviceClass::Recovery(ProductLine::D400) => {
                let status = self.fw_status()?;
                if status.last_version == 0 {
                    return Ok(None);
                }
                Ok(Some(FirmwareVersion::from_packed(status.last_version).to_string()))
            }
            _ => Ok(None),
        }
    }

    fn debug_channel(&mut self) -> Option<&mut dyn DebugChannel> {
        let name = self.name.clone();
        match self.hwm() {
            Ok(hwm) => Some(hwm as &mut dyn DebugChannel),
            Err(e) => {
                debug!("{}: no hardware monitor: {}", name, e);
                None
            }
        }
    }

    fn enter_recovery(&mut self) -> Result<(), ChannelError> {
        if self.class.is_recovery() {
            return Ok(());
        }
        let name = self.name.clone();
        let hwm = self.hwm()?;

        let timeout = default_timeout();
        let request = hwm_command(HWM_OPCODE_ENTER_DFU, [0; 4]);
        match hwm.handle.write_bulk(hwm.ep_out, &request, timeout) {
            Ok(_) | Err(rusb::Error::NoDevice) => {}
            Err(e) => return Err(channel_error(e, timeout)),
        }

        // The device resets while answering; a missing reply is expected.
        let mut reply = [0u8; HWM_REPLY_LEN];
        if let Err(e) = hwm.handle.read_bulk(hwm.ep_in, &mut reply, timeout) {
            debug!("{}: no reply to recovery command: {}", name, e);
        }
        Ok(())
    }

    fn open_control(&mut self) -> Result<Box<dyn ControlChannel>, ChannelError> {
        if !self.class.is_recovery() {
            return Err(ChannelError::Unsupported("DFU control on a normal-mode device"));
        }
        Ok(Box::new(self.open_dfu()?))
    }
}

// =============================================================================
// Channels
// =============================================================================

/// DFU class requests on interface 0 of a recovery device.
pub struct DfuControl {
    handle: Handle,
}

impl ControlChannel for DfuControl {
    fn transfer(&mut self, packet: &mut ControlPacket, timeout: Duration) -> Result<(), ChannelError> {
        match control(&self.handle, packet, timeout) {
            Ok(()) => Ok(()),
            // The loader may drop off the bus before completing DETACH.
            Err(
                e @ (rusb::Error::Io
                | rusb::Error::NoDevice
                | rusb::Error::Other
                | rusb::Error::Pipe),
            ) if packet.request == Request::Detach as u8 => {
                debug!("ignoring DETACH error: {}", e);
                Ok(())
            }
            Err(e) => Err(channel_error(e, timeout)),
        }
    }
}

struct HwmEndpoints {
    interface: u8,
    ep_out: u8,
    ep_in: u8,
}

/// Bulk endpoint pair of the first vendor-specific interface.
fn find_hwm_endpoints(device: &rusb::Device<GlobalContext>) -> Option<HwmEndpoints> {
    let config = device.active_config_descriptor().ok()?;

    for interface in config.interfaces() {
        for alt in interface.descriptors() {
            if alt.class_code() != VENDOR_SPECIFIC_CLASS {
                continue;
            }
            let mut ep_out = None;
            let mut ep_in = None;
            for endpoint in alt.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::Out => ep_out = ep_out.or(Some(endpoint.address())),
                    Direction::In => ep_in = ep_in.or(Some(endpoint.address())),
                }
            }
            if let (Some(ep_out), Some(ep_in)) = (ep_out, ep_in) {
                return Some(HwmEndpoints {
                    interface: alt.interface_number(),
                    ep_out,
                    ep_in,
                });
            }
        }
    }
    None
}

/// Hardware monitor command channel over a bulk endpoint pair.
pub struct HwmChannel {
    handle: Handle,
    ep_out: u8,
    ep_in: u8,
}

impl HwmChannel {
    /// Send one command and return the reply with the opcode echo stripped.
    fn command(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        self.handle
            .write_bulk(self.ep_out, request, timeout)
            .map_err(|e| channel_error(e, timeout))?;

        let mut reply = vec![0u8; HWM_REPLY_LEN];
        let received = self
            .handle
            .read_bulk(self.ep_in, &mut reply, timeout)
            .map_err(|e| channel_error(e, timeout))?;
        reply.truncate(received);

        if reply.len() < 4 || request.len() < 8 || reply[..4] != request[4..8] {
            return Err(ChannelError::Transfer(
                "hardware monitor reply does not echo the opcode".to_string(),
            ));
        }
        reply.drain(..4);
        Ok(reply)
    }
}

impl DebugChannel for HwmChannel {
    fn send_receive(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        self.command(request, timeout)
    }
}
