// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bounded "wait until the device reaches one of these states" primitive.

use std::time::Duration;

use log::trace;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::channel::{ChannelError, ControlChannel};
use crate::clock::Clock;
use crate::protocol::{ControlPacket, DeviceStatus, DfuState};

/// Default per-call timeout for GETSTATUS and other short requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    /// Deadline passed; carries the last status seen, if any.
    #[error("timed out after {timeout:?} waiting for {expected:?}")]
    Timeout {
        timeout: Duration,
        expected: Vec<DfuState>,
        last: Option<DeviceStatus>,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("status query failed: {0}")]
    Channel(#[from] ChannelError),
}

/// Issue one GETSTATUS and decode the reply.
pub fn query_status(
    channel: &mut dyn ControlChannel,
    request_timeout: Duration,
) -> Result<DeviceStatus, ChannelError> {
    let mut packet = ControlPacket::get_status();
    channel.transfer(&mut packet, request_timeout)?;
    Ok(DeviceStatus::decode(packet.payload()))
}

/// Polls device status on a fixed interval.
pub struct StatePoller<'a> {
    clock: &'a dyn Clock,
    request_timeout: Duration,
    cancel: Option<&'a CancelToken>,
}

impl<'a> StatePoller<'a> {
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self {
            clock,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cancel: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Make each poll iteration observe `token`. Leave unset for waits that
    /// must run to their own deadline.
    pub fn cancellable(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Query status every `poll_interval` until the state is one of
    /// `accepted` or `timeout` has elapsed.
    ///
    /// A `Busy` reply counts as "not yet". Worst case the call returns after
    /// `timeout + poll_interval` plus one request.
    pub fn wait_for_states(
        &self,
        channel: &mut dyn ControlChannel,
        accepted: &[DfuState],
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<DeviceStatus, PollError> {
        let start = self.clock.now();
        let mut last = None;

        loop {
            if self.cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(PollError::Cancelled);
            }

            match query_status(channel, self.request_timeout) {
                Ok(status) => {
                    trace!(
                        "status {} state {:?} poll hint {}ms",
                        status.status,
                        status.state,
                        status.poll_timeout_ms
                    );
                    if accepted.contains(&status.state) {
                        return Ok(status);
                    }
                    last = Some(status);
                }
                Err(ChannelError::Busy) => trace!("device busy"),
                Err(e) => return Err(e.into()),
            }

            if self.clock.now().duration_since(start) >= timeout {
                return Err(PollError::Timeout {
                    timeout,
                    expected: accepted.to_vec(),
                    last,
                });
            }

            self.clock.sleep(poll_interval);
        }
    }
}
