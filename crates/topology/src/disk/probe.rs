// SPDX-FileCopyrightText: Copyright © 2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Disk probe/query APIs

use std::{
    fs,
    path::{Path, PathBuf},
};

use super::{
    device::{BlockDevice, TopologyTable},
    mounts::{MountOption, Table},
    BlockDeviceQuery, Error, PartitionIdentifierReader, DEVFS,
};

/// A Disk probe to query disks via procfs, sysfs and devfs
#[derive(Debug)]
pub struct Probe {
    /// location of /sys
    pub(super) sysfs: PathBuf,

    /// location of /dev
    pub(super) devfs: PathBuf,

    /// location of /proc
    pub(super) procfs: PathBuf,

    /// Mountpoints
    pub(super) mounts: Table,

    /// Device-mapper parentage from `/sys/class/block`
    pub(super) topology: TopologyTable,
}

impl Probe {
    /// Initial startup loads
    pub(super) fn init_scan(&mut self) -> Result<(), super::Error> {
        self.mounts = Table::new_from_path(self.procfs.join("self").join("mounts"))?;
        self.topology = scan_topology(&self.sysfs.join("class").join("block"))?;
        log::trace!("sysfs topology: {:?}", self.topology);

        Ok(())
    }

    /// The topology discovered at build time
    pub fn topology(&self) -> &TopologyTable {
        &self.topology
    }

    /// Map a logical `/dev/...` path onto our devfs
    fn rebase(&self, device: &Path) -> Result<PathBuf, Error> {
        let relative = device
            .strip_prefix(DEVFS)
            .map_err(|_| Error::InvalidDevicePath(device.to_path_buf()))?;
        Ok(self.devfs.join(relative))
    }
}

impl BlockDeviceQuery for Probe {
    fn mount_source(&self, mountpoint: &Path) -> Result<PathBuf, Error> {
        let mount = self
            .mounts
            .find(mountpoint)
            .ok_or_else(|| Error::UnknownMount(mountpoint.to_path_buf()))?;
        log::trace!("{} is mounted from {} ({})", mountpoint.display(), mount.device, mount.filesystem);
        if let Some(subvol) = mount.options().find_map(|o| match o {
            MountOption::Option("subvol", v) => Some(v),
            _ => None,
        }) {
            log::trace!("using subvolume {subvol} of {}", mount.device);
        }
        Ok(PathBuf::from(mount.device))
    }

    fn parent_of(&self, kernel_name: &str) -> Result<Option<String>, Error> {
        Ok(self.topology.parent_of(kernel_name).map(str::to_owned))
    }

    fn is_mapped(&self, kernel_name: &str) -> Result<bool, Error> {
        Ok(self.topology.is_mapped(kernel_name))
    }
}

impl PartitionIdentifierReader for Probe {
    /// Scan `/dev/disk/by-partuuid` for a link resolving to `device`
    fn partuuid(&self, device: &Path) -> Result<String, Error> {
        let links = self.devfs.join("disk").join("by-partuuid");
        if !links.exists() {
            log::debug!("{} does not exist, no PARTUUIDs known", links.display());
            return Ok(String::new());
        }

        let target = fs::canonicalize(self.rebase(device)?)?;
        for entry in fs::read_dir(&links)? {
            let entry = entry?;
            // Dangling links are not our problem
            let Ok(resolved) = fs::canonicalize(entry.path()) else {
                continue;
            };
            if resolved == target {
                return Ok(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(String::new())
    }
}

/// Sorted directory listing, names only
fn sorted_names(dir: &Path) -> Result<Vec<String>, Error> {
    let mut names = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    names.sort();
    Ok(names)
}

/// Build child → parent rows from `/sys/class/block/*/slaves`
///
/// Device-mapper nodes get a second row under their `dm/name` alias, which is
/// the name visible in `/dev/mapper`.
fn scan_topology(class_block: &Path) -> Result<TopologyTable, Error> {
    let mut table = TopologyTable::default();
    if !class_block.exists() {
        log::warn!("{} does not exist, assuming no stacked devices", class_block.display());
        return Ok(table);
    }

    for name in sorted_names(class_block)? {
        let node = class_block.join(&name);
        let dm = node.join("dm");
        let mapped = dm.exists();
        let alias = fs::read_to_string(dm.join("name"))
            .ok()
            .map(|a| a.trim().to_owned())
            .filter(|a| !a.is_empty());

        let slaves_dir = node.join("slaves");
        let slaves = if slaves_dir.exists() {
            sorted_names(&slaves_dir)?
        } else {
            vec![]
        };

        let path = match alias.as_ref() {
            Some(alias) => Path::new(DEVFS).join("mapper").join(alias),
            None => Path::new(DEVFS).join(&name),
        };
        let base = BlockDevice {
            path,
            kernel_name: name.clone(),
            parent_kernel_name: None,
            mapped,
        };

        let mut rows = if slaves.is_empty() {
            vec![base]
        } else {
            slaves.iter().map(|s| base.clone().with_parent(s)).collect::<Vec<_>>()
        };
        if let Some(alias) = alias {
            let aliased = rows
                .iter()
                .map(|r| BlockDevice {
                    kernel_name: alias.clone(),
                    ..r.clone()
                })
                .collect::<Vec<_>>();
            rows.extend(aliased);
        }

        for row in rows {
            table.push(row);
        }
    }

    Ok(table)
}
