// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Stable partition identifiers (PARTUUID)

use std::{fmt, path::Path};

use serde::Serialize;
use topology::disk::PartitionIdentifierReader;

use crate::Error;

/// A validated, non-empty PARTUUID
///
/// Only `[A-Za-z0-9-]` is accepted, matching what the boot entry rewrite
/// recognises, so patching with it is repeatable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PartitionIdentifier(String);

impl PartitionIdentifier {
    /// Validate raw lookup output for `device`
    pub fn new(device: &Path, raw: &str) -> Result<Self, Error> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(Error::IdentifierNotFound(device.to_path_buf()));
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::InvalidIdentifier(value.to_owned()));
        }
        Ok(Self(value.to_owned()))
    }

    /// Look up the identifier of `device`. There is no fallback value.
    pub fn read(reader: &dyn PartitionIdentifierReader, device: &Path) -> Result<Self, Error> {
        let raw = reader.partuuid(device)?;
        log::trace!("PARTUUID lookup for {}: {raw:?}", device.display());
        Self::new(device, &raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
