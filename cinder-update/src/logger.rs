// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Terminal logger that prints above the active progress bar.

use std::sync::{Mutex, PoisonError};

use indicatif::ProgressBar;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Info records from the orchestrator mirror the session log, which the
/// commands already print.
const SESSION_LOG_TARGET: &str = "cinder_core::updater";

static ACTIVE_BAR: Mutex<Option<ProgressBar>> = Mutex::new(None);
static LOGGER: TerminalLogger = TerminalLogger;

struct TerminalLogger;

impl Log for TerminalLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if record.level() == Level::Info && record.target() == SESSION_LOG_TARGET {
            return;
        }

        let line = format!("[{}] {}", record.level(), record.args());
        let bar = ACTIVE_BAR.lock().unwrap_or_else(PoisonError::into_inner);
        match bar.as_ref() {
            Some(bar) => bar.println(line),
            None => eprintln!("{}", line),
        }
    }

    fn flush(&self) {}
}

/// Install the logger. `verbose` raises the level from warnings to debug.
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Route log output through `bar` until [`clear_bar`].
pub fn set_bar(bar: &ProgressBar) {
    *ACTIVE_BAR.lock().unwrap_or_else(PoisonError::into_inner) = Some(bar.clone());
}

pub fn clear_bar() {
    *ACTIVE_BAR.lock().unwrap_or_else(PoisonError::into_inner) = None;
}
