// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;

use cinder_core::backup::{persist_backup, read_flash, BackupConfig};
use cinder_core::channel::{identity_of, Device, DeviceHub, ProductLine};
use cinder_core::image::crc32;
use cinder_core::{
    FirmwareCatalog, FirmwareImage, FirmwareVersion, Outcome, UpdateConfig, UpdateHandle, Updater,
};

/// Interval between session refreshes while an update runs.
const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Where the image for an update comes from.
pub enum ImageSource {
    File(PathBuf),
    Catalog(Vec<(ProductLine, PathBuf)>),
}

fn load_image(path: &Path, line: ProductLine) -> Result<FirmwareImage> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(FirmwareImage::new(data, line))
}

fn load_catalog(entries: &[(ProductLine, PathBuf)]) -> Result<FirmwareCatalog> {
    let mut catalog = FirmwareCatalog::new();
    for (line, path) in entries {
        let image = load_image(path, *line)?;
        // Images without an embedded revision never recommend an upgrade.
        let version = image
            .embedded_version()
            .unwrap_or(FirmwareVersion::new(0, 0, 0, 0));
        catalog.insert(version, image);
    }
    Ok(catalog)
}

/// First device of the wanted mode, optionally matching `serial`.
fn find_device(hub: &dyn DeviceHub, serial: Option<&str>, recovery: bool) -> Result<Box<dyn Device>> {
    let devices = hub.devices().context("Failed to enumerate USB devices")?;

    for device in devices {
        if device.class().is_recovery() != recovery {
            continue;
        }
        let Some(wanted) = serial else {
            return Ok(device);
        };
        match identity_of(device.as_ref()) {
            Ok(Some(identity)) if identity == wanted => return Ok(device),
            Ok(_) => {}
            Err(e) => warn!("{}: cannot read serial number: {}", device.name(), e),
        }
    }

    let mode = if recovery { "recovery" } else { "normal" };
    match serial {
        Some(serial) => bail!("No {} mode device with serial {} found", mode, serial),
        None => bail!("No {} mode device found", mode),
    }
}

/// List connected devices.
pub fn list(hub: &dyn DeviceHub, firmware: &[(ProductLine, PathBuf)]) -> Result<()> {
    let catalog = load_catalog(firmware)?;
    let devices = hub.devices().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }

    for device in &devices {
        let class = device.class();
        let serial = match identity_of(device.as_ref()) {
            Ok(Some(serial)) => serial,
            Ok(None) => "unknown".to_string(),
            Err(e) => {
                warn!("{}: cannot read serial number: {}", device.name(), e);
                "unknown".to_string()
            }
        };
        let version = device.firmware_version().unwrap_or_else(|e| {
            warn!("{}: cannot read firmware version: {}", device.name(), e);
            None
        });

        println!("{}", device.name());
        println!(
            "  Mode:     {}",
            if class.is_recovery() { "recovery" } else { "normal" }
        );
        println!("  Line:     {}", class.product_line());
        println!("  Serial:   {}", serial);
        println!("  Firmware: {}", version.as_deref().unwrap_or("unknown"));

        let line = class.product_line();
        if let Some(available) = catalog.recommended_version(line) {
            let advice = match &version {
                Some(current) if catalog.is_upgrade_recommended(line, current) => "upgrade recommended",
                Some(_) => "up to date",
                None => "current version unknown",
            };
            println!("  Catalog:  {} ({})", available, advice);
        }
        println!();
    }

    Ok(())
}

/// Run a full update session against a normal-mode device.
pub fn update(
    hub: Arc<dyn DeviceHub>,
    serial: &str,
    source: ImageSource,
    config: UpdateConfig,
) -> Result<()> {
    let device = find_device(hub.as_ref(), Some(serial), false)?;
    let line = device.class().product_line();

    println!("Device:   {} ({})", device.name(), serial);
    match &config.backup {
        Some(backup) => println!("Backup:   {}", backup.dir.display()),
        None => println!("Backup:   disabled"),
    }

    let handle = match source {
        ImageSource::File(path) => {
            let image = load_image(&path, line)?;
            println!(
                "Firmware: {} ({} bytes, CRC32: 0x{:08x})",
                path.display(),
                image.len(),
                image.crc32()
            );
            Updater::new(hub, config, FirmwareCatalog::new()).start(device, image)?
        }
        ImageSource::Catalog(entries) => {
            let catalog = load_catalog(&entries)?;
            if let Some(version) = catalog.recommended_version(line) {
                println!("Firmware: catalog image {}", version);
            }
            Updater::new(hub, config, catalog).start_default(device)?
        }
    };
    println!();

    follow(handle)
}

/// Flash a device that is already in recovery mode.
pub fn recover(hub: Arc<dyn DeviceHub>, file: &Path, serial: Option<&str>) -> Result<()> {
    let device = find_device(hub.as_ref(), serial, true)?;
    let image = load_image(file, device.class().product_line())?;

    println!("Device:   {}", device.name());
    println!(
        "Firmware: {} ({} bytes, CRC32: 0x{:08x})",
        file.display(),
        image.len(),
        image.crc32()
    );
    println!();

    let handle = Updater::new(hub, UpdateConfig::default(), FirmwareCatalog::new()).start(device, image)?;
    follow(handle)
}

/// Dump the whole flash of a normal-mode device.
pub fn backup(hub: &dyn DeviceHub, serial: &str, out: &Path) -> Result<()> {
    let mut device = find_device(hub, Some(serial), false)?;
    let name = device.name();
    let Some(debug) = device.debug_channel() else {
        bail!("{} does not support flash backup", name);
    };

    let config = BackupConfig {
        dir: out.to_path_buf(),
        ..BackupConfig::default()
    };

    let pb = ProgressBar::new(u64::from(config.flash_size));
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );
    crate::logger::set_bar(&pb);

    let total = config.flash_size;
    let result = read_flash(
        debug,
        &config,
        &mut |fraction| pb.set_position((f64::from(fraction) * f64::from(total)) as u64),
        None,
    );
    crate::logger::clear_bar();

    let flash = match result {
        Ok(flash) => flash,
        Err(e) => {
            pb.abandon();
            bail!("Backup failed: {}", e);
        }
    };
    pb.finish_with_message("Backup complete");

    let path = persist_backup(&config.dir, serial, &flash)?;
    println!(
        "Saved {} ({} bytes, CRC32: 0x{:08x})",
        path.display(),
        flash.len(),
        crc32(&flash)
    );
    Ok(())
}

/// Render session progress until it finishes.
fn follow(handle: UpdateHandle) -> Result<()> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );
    crate::logger::set_bar(&pb);

    let mut shown = 0;
    loop {
        let snapshot = handle.snapshot();
        for line in &snapshot.log[shown..] {
            pb.println(line);
        }
        shown = snapshot.log.len();
        pb.set_position(u64::from(snapshot.progress));
        pb.set_message(snapshot.phase.to_string());

        if snapshot.done {
            break;
        }
        thread::sleep(REFRESH_INTERVAL);
    }
    crate::logger::clear_bar();

    match handle.wait() {
        Outcome::Done => {
            pb.finish_with_message("done");
            println!("Firmware update complete!");
            Ok(())
        }
        Outcome::Failed(reason) => {
            pb.abandon();
            bail!("Firmware update failed: {}", reason)
        }
    }
}
