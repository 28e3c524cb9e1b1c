// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use cinder_core::backup::BackupConfig;
use cinder_core::channel::ProductLine;
use cinder_core::UpdateConfig;

use crate::commands::{self, ImageSource};
use crate::logger;
use crate::transport::UsbHub;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "cinder-update")]
#[command(about = "Firmware update tool for RealSense cameras")]
pub struct Cli {
    /// Print debug diagnostics
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// List connected devices
    List {
        /// Catalog image used to recommend upgrades (e.g., d400=fw.bin)
        #[arg(long, value_name = "LINE=FILE", value_parser = parse_firmware_arg)]
        firmware: Vec<(ProductLine, PathBuf)>,
    },

    /// Back up, switch to recovery mode and flash a new image
    Update {
        /// Serial number of the target device
        #[arg(short, long)]
        serial: String,

        /// Firmware image to flash
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Catalog image per product line (e.g., d400=fw.bin)
        #[arg(long, value_name = "LINE=FILE", value_parser = parse_firmware_arg)]
        firmware: Vec<(ProductLine, PathBuf)>,

        /// Directory receiving the flash backup
        #[arg(long, default_value = "backups")]
        backup_dir: PathBuf,

        /// Skip the flash backup
        #[arg(long)]
        no_backup: bool,

        /// Seconds to wait for the recovery device
        #[arg(long, default_value = "60")]
        recovery_timeout: u64,

        /// Seconds to wait for the device to come back
        #[arg(long, default_value = "60")]
        reconnect_timeout: u64,
    },

    /// Flash a device that is already in recovery mode
    Recover {
        /// Firmware image to flash
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Serial number of the recovery device (first one if omitted)
        #[arg(short, long)]
        serial: Option<String>,
    },

    /// Dump the flash of a device to a file
    Backup {
        /// Serial number of the source device
        #[arg(short, long)]
        serial: String,

        /// Output directory
        #[arg(short, long, default_value = "backups")]
        out: PathBuf,
    },
}

/// Parse `LINE=FILE`, e.g. `d400=Signed_Image.bin`.
fn parse_firmware_arg(arg: &str) -> Result<(ProductLine, PathBuf), String> {
    let (line, file) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected LINE=FILE, got {:?}", arg))?;
    let line = ProductLine::parse(line).ok_or_else(|| format!("unknown product line {:?}", line))?;
    if file.is_empty() {
        return Err("missing firmware file".to_string());
    }
    Ok((line, PathBuf::from(file)))
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    logger::init(cli.verbose);
    let hub = Arc::new(UsbHub);

    match cli.command {
        Commands::List { firmware } => commands::list(hub.as_ref(), &firmware),
        Commands::Update {
            serial,
            file,
            firmware,
            backup_dir,
            no_backup,
            recovery_timeout,
            reconnect_timeout,
        } => {
            let source = match (file, firmware.is_empty()) {
                (Some(file), true) => ImageSource::File(file),
                (None, false) => ImageSource::Catalog(firmware),
                (Some(_), false) => bail!("Choose either --file or --firmware, not both"),
                (None, true) => bail!("No firmware given: use --file or --firmware"),
            };
            let config = UpdateConfig {
                backup: (!no_backup).then(|| BackupConfig {
                    dir: backup_dir,
                    ..BackupConfig::default()
                }),
                recovery_timeout: Duration::from_secs(recovery_timeout),
                reconnect_timeout: Duration::from_secs(reconnect_timeout),
                ..UpdateConfig::default()
            };
            commands::update(hub, &serial, source, config)
        }
        Commands::Recover { file, serial } => commands::recover(hub, &file, serial.as_deref()),
        Commands::Backup { serial, out } => commands::backup(hub.as_ref(), &serial, &out),
    }
}
