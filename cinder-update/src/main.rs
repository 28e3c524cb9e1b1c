// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware update tool for RealSense cameras over USB DFU.
//!
//! Usage:
//!   cinder-update list
//!   cinder-update update --serial 845412111144 --file Signed_Image_UVC_5_15_0_2.bin
//!   cinder-update recover --file Signed_Image_UVC_5_15_0_2.bin
//!   cinder-update backup --serial 845412111144 --out backups

mod cli;
mod commands;
mod logger;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
