// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Resolve the physical partition backing a mountpoint
//!
//! Exactly one level of device-mapper indirection is walked. Anything deeper
//! (LVM on LUKS, dm-raid, ..) is rejected rather than guessed at, as a wrong
//! identifier in the boot entry leaves the machine unbootable.

use std::path::{Path, PathBuf};

use serde::Serialize;
use topology::disk::{BlockDeviceQuery, DEVFS};

use crate::Error;

/// Where the root filesystem really lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRoot {
    /// The device listed in the mount table
    pub mounted_device: PathBuf,

    /// The partition underneath it
    pub physical_device: PathBuf,

    /// Whether a device-mapper hop was taken
    pub was_indirected: bool,
}

/// Device-mapper instance name of `device`, if it lives in the mapper namespace
///
/// Both `/dev/mapper/<name>` and the raw `/dev/dm-N` nodes qualify.
pub fn mapper_name(device: &Path) -> Option<String> {
    let devfs = Path::new(DEVFS);
    if let Ok(name) = device.strip_prefix(devfs.join("mapper")) {
        let mut components = name.components();
        let only = components.next()?;
        return match components.next() {
            Some(_) => None,
            None => Some(only.as_os_str().to_string_lossy().to_string()),
        };
    }

    let name = device.strip_prefix(devfs).ok()?.to_str()?;
    if name.starts_with("dm-") && !name.contains('/') {
        Some(name.to_owned())
    } else {
        None
    }
}

impl ResolvedRoot {
    /// Resolve the physical device behind `mountpoint`
    pub fn resolve(query: &dyn BlockDeviceQuery, mountpoint: &Path) -> Result<Self, Error> {
        let mounted = query.mount_source(mountpoint)?;
        log::debug!("{} is backed by {}", mountpoint.display(), mounted.display());

        let Some(name) = mapper_name(&mounted) else {
            log::debug!("{} is not a device-mapper device", mounted.display());
            return Ok(Self {
                physical_device: mounted.clone(),
                mounted_device: mounted,
                was_indirected: false,
            });
        };

        let parent = query
            .parent_of(&name)?
            .ok_or_else(|| Error::UnresolvedPhysicalDevice {
                device: mounted.clone(),
                reason: format!("no parent device recorded for `{name}`"),
            })?;

        if query.is_mapped(&parent)? {
            return Err(Error::UnresolvedPhysicalDevice {
                device: mounted,
                reason: format!("`{name}` sits on another device-mapper device `{parent}`, stacked mappings are unsupported"),
            });
        }

        let physical = Path::new(DEVFS).join(&parent);
        log::debug!("{name} → {}", physical.display());

        Ok(Self {
            mounted_device: mounted,
            physical_device: physical,
            was_indirected: true,
        })
    }
}
