// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared record of one update attempt.
//!
//! The background task writes and observers read through [`SharedSession`].
//! Every accessor takes the lock for a single read or write only.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Orchestrator state. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    BackingUp,
    EnteringRecovery,
    WaitingForRecoveryDevice,
    Transferring,
    WaitingForReconnect,
    Done,
    Failed(String),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::BackingUp => f.write_str("backing up"),
            Self::EnteringRecovery => f.write_str("entering recovery"),
            Self::WaitingForRecoveryDevice => f.write_str("waiting for recovery device"),
            Self::Transferring => f.write_str("transferring"),
            Self::WaitingForReconnect => f.write_str("waiting for reconnect"),
            Self::Done => f.write_str("done"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Final result of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSession {
    pub phase: Phase,
    /// 0..=100
    pub progress: u8,
    pub log: Vec<String>,
    /// Empty unless the session failed.
    pub error: String,
    pub done: bool,
}

impl Default for UpdateSession {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            progress: 0,
            log: Vec::new(),
            error: String::new(),
            done: false,
        }
    }
}

impl UpdateSession {
    pub fn outcome(&self) -> Option<Outcome> {
        match &self.phase {
            Phase::Done => Some(Outcome::Done),
            Phase::Failed(reason) => Some(Outcome::Failed(reason.clone())),
            _ => None,
        }
    }
}

/// Point-in-time copy of the session for UI refresh loops.
pub type SessionSnapshot = UpdateSession;

/// Cloneable handle to the session behind one lock.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<UpdateSession>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, UpdateSession> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase.clone()
    }

    pub fn progress(&self) -> u8 {
        self.lock().progress
    }

    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn error(&self) -> String {
        self.lock().error.clone()
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    pub fn set_phase(&self, phase: Phase) {
        self.lock().phase = phase;
    }

    pub fn set_progress(&self, progress: u8) {
        self.lock().progress = progress.min(100);
    }

    pub fn append_log(&self, line: impl Into<String>) {
        self.lock().log.push(line.into());
    }

    pub fn finish_done(&self) {
        let mut session = self.lock();
        session.phase = Phase::Done;
        session.progress = 100;
        session.done = true;
    }

    pub fn finish_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut session = self.lock();
        session.phase = Phase::Failed(reason.clone());
        session.error = reason;
        session.done = true;
    }
}
