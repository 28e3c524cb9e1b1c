// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Test doubles for the collaborator traits.
//!
//! `SimChannel` behaves like a recovery-mode loader: it moves through the DFU
//! states as requests arrive. `MockHub` serves a device listing that tests
//! (or the simulated devices themselves) replace to model re-enumeration.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cinder_core::cancel::CancelToken;
use cinder_core::channel::{
    ChannelError, ControlChannel, DebugChannel, Device, DeviceClass, DeviceHub, ProductLine,
};
use cinder_core::clock::Clock;
use cinder_core::image::FirmwareImage;
use cinder_core::protocol::{
    ControlPacket, DfuState, Request, StatusCode, FW_STATUS_LEN, FW_VERSION_OFFSET,
};

pub const SERIAL: &str = "ABC123";

// --- Clock ---

/// Virtual time: `sleep` advances `now` instantly.
#[derive(Debug)]
pub struct FakeClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

// --- Stepping ---

/// Parks the calling thread at chosen points until the test releases it.
#[derive(Debug, Clone)]
pub struct Stepper {
    entered: Arc<Mutex<Sender<()>>>,
    release: Arc<Mutex<Receiver<()>>>,
}

/// Test side of a [`Stepper`].
pub struct StepControl {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl Stepper {
    pub fn new() -> (Self, StepControl) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let stepper = Self {
            entered: Arc::new(Mutex::new(entered_tx)),
            release: Arc::new(Mutex::new(release_rx)),
        };
        let control = StepControl {
            entered: entered_rx,
            release: release_tx,
        };
        (stepper, control)
    }

    pub fn pause(&self) {
        let sent = self.entered.lock().unwrap().send(());
        if sent.is_ok() {
            let _ = self.release.lock().unwrap().recv();
        }
    }
}

impl StepControl {
    /// Call `inspect` at every pause, releasing the paused thread after
    /// each call, until `finished` holds and nothing is paused.
    pub fn drive(&self, finished: impl Fn() -> bool, mut inspect: impl FnMut()) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while Instant::now() < deadline {
            match self.entered.recv_timeout(Duration::from_millis(10)) {
                Ok(()) => {
                    inspect();
                    let _ = self.release.send(());
                }
                Err(_) if finished() => return,
                Err(_) => {}
            }
        }
    }
}

/// Virtual clock that pauses on every `sleep`.
pub struct SteppingClock {
    inner: FakeClock,
    stepper: Stepper,
}

impl SteppingClock {
    pub fn new(stepper: &Stepper) -> Self {
        Self {
            inner: FakeClock::new(),
            stepper: stepper.clone(),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn sleep(&self, duration: Duration) {
        self.stepper.pause();
        self.inner.sleep(duration);
    }
}

// --- Status replies ---

pub fn raw_status(status: StatusCode) -> u8 {
    match status {
        StatusCode::Ok => 0x00,
        StatusCode::ErrTarget => 0x01,
        StatusCode::ErrFile => 0x02,
        StatusCode::ErrWrite => 0x03,
        StatusCode::ErrErase => 0x04,
        StatusCode::ErrCheckErased => 0x05,
        StatusCode::ErrProg => 0x06,
        StatusCode::ErrVerify => 0x07,
        StatusCode::ErrAddress => 0x08,
        StatusCode::ErrNotDone => 0x09,
        StatusCode::ErrFirmware => 0x0A,
        StatusCode::ErrVendor => 0x0B,
        StatusCode::ErrUsbr => 0x0C,
        StatusCode::ErrUnknown => 0x0E,
        StatusCode::ErrStalledPkt => 0x0F,
        StatusCode::Malformed => 0xFF,
    }
}

pub fn status_reply(status: StatusCode, state: DfuState) -> Vec<u8> {
    vec![raw_status(status), 0, 0, 0, state as u8, 0]
}

fn fill_reply(packet: &mut ControlPacket, reply: &[u8]) {
    packet.data = reply.to_vec();
    packet.length = reply.len() as u16;
}

/// Answers GETSTATUS from a fixed script; the last entry repeats forever.
/// Every other request succeeds without effect.
pub struct StatusScript {
    replies: VecDeque<Result<Vec<u8>, ChannelError>>,
    last: Option<Result<Vec<u8>, ChannelError>>,
    pub queries: usize,
}

impl StatusScript {
    pub fn new() -> Self {
        Self {
            replies: VecDeque::new(),
            last: None,
            queries: 0,
        }
    }

    pub fn then(mut self, status: StatusCode, state: DfuState) -> Self {
        self.replies.push_back(Ok(status_reply(status, state)));
        self
    }

    pub fn then_raw(mut self, reply: &[u8]) -> Self {
        self.replies.push_back(Ok(reply.to_vec()));
        self
    }

    pub fn then_err(mut self, error: ChannelError) -> Self {
        self.replies.push_back(Err(error));
        self
    }
}

impl ControlChannel for StatusScript {
    fn transfer(&mut self, packet: &mut ControlPacket, _timeout: Duration) -> Result<(), ChannelError> {
        if packet.request != Request::GetStatus as u8 {
            return Ok(());
        }
        self.queries += 1;

        let reply = match self.replies.pop_front() {
            Some(reply) => {
                self.last = Some(reply.clone());
                reply
            }
            None => self
                .last
                .clone()
                .unwrap_or_else(|| Ok(status_reply(StatusCode::Ok, DfuState::DfuIdle))),
        };
        fill_reply(packet, &reply?);
        Ok(())
    }
}

// --- Simulated DFU loader ---

/// Every control packet a channel has seen, shared with the test.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    packets: Arc<Mutex<Vec<ControlPacket>>>,
    pause: Arc<Mutex<Option<(u8, Stepper)>>>,
}

impl Recorder {
    fn push(&self, packet: &ControlPacket) {
        self.packets.lock().unwrap().push(packet.clone());

        let pause = self.pause.lock().unwrap().clone();
        if let Some((request, stepper)) = pause {
            if packet.request == request {
                stepper.pause();
            }
        }
    }

    /// Pause on every `request` packet once it has been recorded.
    pub fn pause_on(&self, request: Request, stepper: &Stepper) {
        *self.pause.lock().unwrap() = Some((request as u8, stepper.clone()));
    }

    pub fn packets(&self) -> Vec<ControlPacket> {
        self.packets.lock().unwrap().clone()
    }

    pub fn count(&self, request: Request) -> usize {
        self.packets
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.request == request as u8)
            .count()
    }

    pub fn downloads(&self) -> Vec<ControlPacket> {
        self.packets
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.request == Request::Download as u8)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestOutcome {
    Ok,
    Fail(StatusCode),
    /// Stays in MANIFEST forever.
    Hang,
}

#[derive(Clone)]
pub struct SimConfig {
    /// State reported after DETACH.
    pub initial_state: DfuState,
    /// Transaction whose acknowledgement reports this status in ERROR.
    pub reject: Option<(u16, StatusCode)>,
    /// Busy (stall) replies before each acknowledgement.
    pub busy_polls: usize,
    /// DOWNLOAD_BUSY replies before each DOWNLOAD_IDLE.
    pub download_polls: usize,
    pub manifest: ManifestOutcome,
    /// UPLOAD reply.
    pub fw_status: Option<Vec<u8>>,
    /// Cancel this token once the given transaction has been acknowledged.
    pub cancel_after: Option<(u16, CancelToken)>,
    /// Replace the hub listing once the manifest succeeds.
    pub on_manifest: Option<(MockHub, Vec<DeviceModel>)>,
    pub recorder: Recorder,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_state: DfuState::DfuIdle,
            reject: None,
            busy_polls: 0,
            download_polls: 0,
            manifest: ManifestOutcome::Ok,
            fw_status: None,
            cancel_after: None,
            on_manifest: None,
            recorder: Recorder::default(),
        }
    }
}

pub struct SimChannel {
    cfg: SimConfig,
    state: DfuState,
    status: StatusCode,
    busy_left: usize,
    polls_left: usize,
    last_transaction: Option<u16>,
}

impl SimChannel {
    pub fn new(cfg: SimConfig) -> Self {
        Self {
            state: cfg.initial_state,
            cfg,
            status: StatusCode::Ok,
            busy_left: 0,
            polls_left: 0,
            last_transaction: None,
        }
    }

    fn download(&mut self, packet: &ControlPacket) {
        self.busy_left = self.cfg.busy_polls;
        self.last_transaction = Some(packet.value);

        if packet.payload().is_empty() {
            self.state = DfuState::ManifestSync;
            return;
        }
        match self.cfg.reject {
            Some((transaction, code)) if transaction == packet.value => {
                self.state = DfuState::Error;
                self.status = code;
            }
            _ => {
                self.state = DfuState::DownloadBusy;
                self.polls_left = self.cfg.download_polls;
            }
        }
    }

    fn advance(&mut self) {
        match self.state {
            DfuState::DownloadBusy if self.polls_left > 0 => self.polls_left -= 1,
            DfuState::DownloadBusy => {
                self.state = DfuState::DownloadIdle;
                if let Some((transaction, token)) = &self.cfg.cancel_after {
                    if Some(*transaction) == self.last_transaction {
                        token.cancel();
                    }
                }
            }
            DfuState::ManifestSync => match self.cfg.manifest {
                ManifestOutcome::Ok => {
                    self.state = DfuState::ManifestWaitReset;
                    if let Some((hub, listing)) = &self.cfg.on_manifest {
                        hub.set(listing.clone());
                    }
                }
                ManifestOutcome::Fail(code) => {
                    self.state = DfuState::Error;
                    self.status = code;
                }
                ManifestOutcome::Hang => self.state = DfuState::Manifest,
            },
            _ => {}
        }
    }
}

impl ControlChannel for SimChannel {
    fn transfer(&mut self, packet: &mut ControlPacket, _timeout: Duration) -> Result<(), ChannelError> {
        self.cfg.recorder.push(packet);

        match packet.request {
            r if r == Request::Detach as u8 => self.state = self.cfg.initial_state,
            r if r == Request::Download as u8 => self.download(packet),
            r if r == Request::GetStatus as u8 => {
                if self.busy_left > 0 {
                    self.busy_left -= 1;
                    return Err(ChannelError::Busy);
                }
                self.advance();
                let reply = status_reply(self.status, self.state);
                fill_reply(packet, &reply);
            }
            r if r == Request::Abort as u8 => {
                self.state = DfuState::DfuIdle;
                self.status = StatusCode::Ok;
            }
            r if r == Request::Upload as u8 => match &self.cfg.fw_status {
                Some(block) => {
                    let block = block.clone();
                    fill_reply(packet, &block);
                }
                None => return Err(ChannelError::Unsupported("upload")),
            },
            _ => {}
        }
        Ok(())
    }
}

/// 68-byte firmware status block as a recovery device reports it.
pub fn fw_status_block(serial: [u8; 6], dfu_version: u16) -> Vec<u8> {
    let mut block = vec![0u8; FW_STATUS_LEN];
    block[4..8].copy_from_slice(&0x0502_0304u32.to_le_bytes());
    block[8..12].copy_from_slice(&0x0502_0304u32.to_le_bytes());
    block[16..18].copy_from_slice(&dfu_version.to_le_bytes());
    block[18..24].copy_from_slice(&serial);
    block
}

// --- Hardware monitor ---

#[derive(Default)]
struct DebugState {
    requests: Vec<(u32, u32)>,
    failures: HashMap<u32, usize>,
    short_replies: HashMap<u32, usize>,
    pause: Option<Stepper>,
}

/// Flash reader serving `offset + i` as byte `i` of every chunk. Failures
/// can be injected per offset.
#[derive(Clone, Default)]
pub struct MockDebug {
    inner: Arc<Mutex<DebugState>>,
}

impl MockDebug {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_times(self, offset: u32, times: usize) -> Self {
        self.inner.lock().unwrap().failures.insert(offset, times);
        self
    }

    pub fn fail_always(self, offset: u32) -> Self {
        self.fail_times(offset, usize::MAX)
    }

    pub fn short_times(self, offset: u32, times: usize) -> Self {
        self.inner.lock().unwrap().short_replies.insert(offset, times);
        self
    }

    /// Pause before serving every request.
    pub fn pausing(self, stepper: &Stepper) -> Self {
        self.inner.lock().unwrap().pause = Some(stepper.clone());
        self
    }

    pub fn requests(&self) -> Vec<(u32, u32)> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn attempts_at(&self, offset: u32) -> usize {
        self.requests().iter().filter(|(o, _)| *o == offset).count()
    }
}

pub fn expected_flash(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

impl DebugChannel for MockDebug {
    fn send_receive(&mut self, request: &[u8], _timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        let offset = u32::from_le_bytes([request[8], request[9], request[10], request[11]]);
        let size = u32::from_le_bytes([request[12], request[13], request[14], request[15]]);

        let pause = self.inner.lock().unwrap().pause.clone();
        if let Some(stepper) = pause {
            stepper.pause();
        }

        let mut state = self.inner.lock().unwrap();
        state.requests.push((offset, size));

        if let Some(left) = state.failures.get_mut(&offset) {
            if *left > 0 {
                *left -= 1;
                return Err(ChannelError::Transfer("flash read failed".into()));
            }
        }

        let mut len = size as usize;
        if let Some(left) = state.short_replies.get_mut(&offset) {
            if *left > 0 {
                *left -= 1;
                len -= 1;
            }
        }
        Ok((0..len).map(|i| (offset as usize + i) as u8).collect())
    }
}

// --- Devices ---

#[derive(Clone)]
pub struct DeviceModel {
    pub class: DeviceClass,
    pub name: String,
    pub serial: Result<Option<String>, ChannelError>,
    pub sensors: Vec<String>,
    pub firmware: Option<String>,
    pub debug: Option<MockDebug>,
    pub sim: Option<SimConfig>,
    pub enter_recovery_error: Option<ChannelError>,
    pub on_enter_recovery: Option<(MockHub, Vec<DeviceModel>)>,
}

impl DeviceModel {
    pub fn normal(serial: &str) -> Self {
        Self {
            class: DeviceClass::Normal(ProductLine::D400),
            name: "Depth Camera 435".into(),
            serial: Ok(Some(serial.into())),
            sensors: Vec::new(),
            firmware: Some("5.1.0.0".into()),
            debug: None,
            sim: None,
            enter_recovery_error: None,
            on_enter_recovery: None,
        }
    }

    pub fn recovery(serial: &str, sim: SimConfig) -> Self {
        Self {
            class: DeviceClass::Recovery(ProductLine::D400),
            name: "D4XX Recovery".into(),
            serial: Ok(Some(serial.into())),
            sensors: Vec::new(),
            firmware: None,
            debug: None,
            sim: Some(sim),
            enter_recovery_error: None,
            on_enter_recovery: None,
        }
    }

    pub fn with_class(mut self, class: DeviceClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_firmware(mut self, version: &str) -> Self {
        self.firmware = Some(version.into());
        self
    }

    pub fn with_debug(mut self, debug: MockDebug) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_serial(mut self, serial: Result<Option<String>, ChannelError>) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_sensors(mut self, sensors: &[&str]) -> Self {
        self.sensors = sensors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn failing_enter_recovery(mut self, error: ChannelError) -> Self {
        self.enter_recovery_error = Some(error);
        self
    }

    pub fn on_enter_recovery(mut self, hub: &MockHub, listing: Vec<DeviceModel>) -> Self {
        self.on_enter_recovery = Some((hub.clone(), listing));
        self
    }

    pub fn build(&self) -> Box<dyn Device> {
        Box::new(MockDevice {
            model: self.clone(),
            debug: self.debug.clone(),
        })
    }
}

pub struct MockDevice {
    model: DeviceModel,
    debug: Option<MockDebug>,
}

impl Device for MockDevice {
    fn class(&self) -> DeviceClass {
        self.model.class
    }

    fn name(&self) -> String {
        self.model.name.clone()
    }

    fn serial_number(&self) -> Result<Option<String>, ChannelError> {
        self.model.serial.clone()
    }

    fn sensor_serial_numbers(&self) -> Result<Vec<String>, ChannelError> {
        Ok(self.model.sensors.clone())
    }

    fn firmware_version(&self) -> Result<Option<String>, ChannelError> {
        Ok(self.model.firmware.clone())
    }

    fn debug_channel(&mut self) -> Option<&mut dyn DebugChannel> {
        self.debug.as_mut().map(|d| d as &mut dyn DebugChannel)
    }

    fn enter_recovery(&mut self) -> Result<(), ChannelError> {
        if let Some(error) = &self.model.enter_recovery_error {
            return Err(error.clone());
        }
        if let Some((hub, listing)) = &self.model.on_enter_recovery {
            hub.set(listing.clone());
        }
        Ok(())
    }

    fn open_control(&mut self) -> Result<Box<dyn ControlChannel>, ChannelError> {
        match &self.model.sim {
            Some(cfg) => Ok(Box::new(SimChannel::new(cfg.clone()))),
            None => Err(ChannelError::Unsupported("DFU control channel")),
        }
    }
}

#[derive(Default)]
struct HubState {
    listing: Vec<DeviceModel>,
    scans: usize,
    failing_scans: usize,
}

/// Serves a replaceable device listing.
#[derive(Clone, Default)]
pub struct MockHub {
    inner: Arc<Mutex<HubState>>,
}

impl MockHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(listing: Vec<DeviceModel>) -> Self {
        let hub = Self::new();
        hub.set(listing);
        hub
    }

    pub fn set(&self, listing: Vec<DeviceModel>) {
        self.inner.lock().unwrap().listing = listing;
    }

    pub fn fail_next_scans(&self, count: usize) {
        self.inner.lock().unwrap().failing_scans = count;
    }

    pub fn scans(&self) -> usize {
        self.inner.lock().unwrap().scans
    }
}

impl DeviceHub for MockHub {
    fn devices(&self) -> Result<Vec<Box<dyn Device>>, ChannelError> {
        let mut state = self.inner.lock().unwrap();
        state.scans += 1;
        if state.failing_scans > 0 {
            state.failing_scans -= 1;
            return Err(ChannelError::Disconnected);
        }
        Ok(state.listing.iter().map(DeviceModel::build).collect())
    }
}

// --- Images ---

/// D400 image of `len` bytes carrying revision 5.2.3.4.
pub fn d400_image(len: usize) -> FirmwareImage {
    let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    data[FW_VERSION_OFFSET..FW_VERSION_OFFSET + 4].copy_from_slice(&[4, 3, 2, 5]);
    FirmwareImage::new(data, ProductLine::D400)
}
