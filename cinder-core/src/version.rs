// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Four-part firmware versions (`major.minor.patch.build`).

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion(pub [u32; 4]);

impl FirmwareVersion {
    pub fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self([major, minor, patch, build])
    }

    /// Parse exactly four dot-separated unsigned integers.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = [0u32; 4];
        let mut fields = s.trim().split('.');

        for part in parts.iter_mut() {
            *part = fields.next()?.parse().ok()?;
        }
        if fields.next().is_some() {
            return None;
        }
        Some(Self(parts))
    }

    /// Decode the packed revision word embedded in an image: bytes are
    /// build, patch, minor, major from least significant up.
    pub fn from_packed(word: u32) -> Self {
        let [build, patch, minor, major] = word.to_le_bytes();
        Self::new(major.into(), minor.into(), patch.into(), build.into())
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid firmware version: {:?}", s))
    }
}

/// True iff both strings are valid versions and `current` is older.
pub fn is_upgradeable(current: &str, available: &str) -> bool {
    match (FirmwareVersion::parse(current), FirmwareVersion::parse(available)) {
        (Some(current), Some(available)) => current < available,
        _ => false,
    }
}
