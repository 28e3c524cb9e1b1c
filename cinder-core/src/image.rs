// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware images and the per-line table of default images.

use std::collections::BTreeMap;
use std::sync::Arc;

use crc::{Crc, CRC_32_ISO_HDLC};
use thiserror::Error;

use crate::channel::{DeviceClass, ProductLine};
use crate::version::FirmwareVersion;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 (ISO-HDLC) used when logging images and backups.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("firmware image is empty")]
    Empty,

    #[error("firmware image is for {image}, device is {device}")]
    ProductLineMismatch {
        image: ProductLine,
        device: ProductLine,
    },

    #[error("incorrect or corrupted firmware file")]
    Corrupted,

    #[error("no firmware image available for {0}")]
    NotInCatalog(ProductLine),
}

/// An immutable image tagged with the product line it was built for.
/// Cloning shares the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Arc<[u8]>,
    line: ProductLine,
}

impl FirmwareImage {
    pub fn new(data: impl Into<Arc<[u8]>>, line: ProductLine) -> Self {
        Self {
            data: data.into(),
            line,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn product_line(&self) -> ProductLine {
        self.line
    }

    pub fn crc32(&self) -> u32 {
        crc32(&self.data)
    }

    /// Revision embedded in the image, for lines that carry one. `None`
    /// when the image is too short or the revision word is zero.
    pub fn embedded_version(&self) -> Option<FirmwareVersion> {
        let offset = self.line.version_offset()?;
        let bytes = self.data.get(offset..offset + 4)?;
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        (word != 0).then(|| FirmwareVersion::from_packed(word))
    }

    /// Reject images that cannot be flashed to a device of `class`.
    pub fn validate_for(&self, class: DeviceClass) -> Result<(), ImageError> {
        if self.data.is_empty() {
            return Err(ImageError::Empty);
        }
        let device = class.product_line();
        if device != self.line {
            return Err(ImageError::ProductLineMismatch {
                image: self.line,
                device,
            });
        }
        if self.line.version_offset().is_some() && self.embedded_version().is_none() {
            return Err(ImageError::Corrupted);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    version: FirmwareVersion,
    image: FirmwareImage,
}

/// Default image per product line. Normal and recovery devices of the same
/// line share an entry.
#[derive(Debug, Clone, Default)]
pub struct FirmwareCatalog {
    entries: BTreeMap<ProductLine, CatalogEntry>,
}

impl FirmwareCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, version: FirmwareVersion, image: FirmwareImage) {
        self.entries
            .insert(image.product_line(), CatalogEntry { version, image });
    }

    pub fn with(mut self, version: FirmwareVersion, image: FirmwareImage) -> Self {
        self.insert(version, image);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn image_for(&self, line: ProductLine) -> Result<&FirmwareImage, ImageError> {
        self.entries
            .get(&line)
            .map(|entry| &entry.image)
            .ok_or(ImageError::NotInCatalog(line))
    }

    pub fn recommended_version(&self, line: ProductLine) -> Option<FirmwareVersion> {
        self.entries.get(&line).map(|entry| entry.version)
    }

    /// True if the catalog holds a newer image than `current`. An
    /// unparsable `current` is never considered upgradeable.
    pub fn is_upgrade_recommended(&self, line: ProductLine, current: &str) -> bool {
        match (FirmwareVersion::parse(current), self.recommended_version(line)) {
            (Some(current), Some(available)) => current < available,
            _ => false,
        }
    }
}
