// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Kernel block device topology, flattened into child → parent rows

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::DEVFS;

/// One row of the kernel block device topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    /// Logical device node
    pub path: PathBuf,

    /// Kernel (or device-mapper alias) name, i.e. `nvme0n1p2`, `dm-0`, `root`
    pub kernel_name: String,

    /// What we sit on top of, if anything
    pub parent_kernel_name: Option<String>,

    /// Whether this is a device-mapper node (crypt, lvm, ..)
    pub mapped: bool,
}

impl BlockDevice {
    /// A device with no parent
    pub fn new(kernel_name: impl Into<String>) -> Self {
        let kernel_name = kernel_name.into();
        Self {
            path: Path::new(DEVFS).join(&kernel_name),
            kernel_name,
            parent_kernel_name: None,
            mapped: false,
        }
    }

    /// A device-mapper node backed by `parent`
    pub fn mapped(kernel_name: impl Into<String>, parent: impl Into<String>) -> Self {
        let kernel_name = kernel_name.into();
        Self {
            path: Path::new(DEVFS).join("mapper").join(&kernel_name),
            kernel_name,
            parent_kernel_name: Some(parent.into()),
            mapped: true,
        }
    }

    /// Override the parent of this row
    pub fn with_parent(self, parent: impl Into<String>) -> Self {
        Self {
            parent_kernel_name: Some(parent.into()),
            ..self
        }
    }
}

/// Ordered topology rows. Lookups always take the first matching row.
#[derive(Debug, Default, Clone)]
pub struct TopologyTable {
    rows: Vec<BlockDevice>,
}

/// `lsblk --json --list` output
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    kname: Option<String>,
    pkname: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    path: Option<String>,
}

/// lsblk TYPE values that are device-mapper targets
const MAPPED_TYPES: &[&str] = &["crypt", "lvm", "dm", "mpath"];

impl TopologyTable {
    pub fn new(rows: Vec<BlockDevice>) -> Self {
        Self { rows }
    }

    /// Parse the JSON emitted by `lsblk --json --list -o NAME,KNAME,PKNAME,TYPE,PATH`
    ///
    /// `PKNAME` always holds a kernel name (`dm-0`), so every device whose
    /// `NAME` differs from its `KNAME` gets a second row keyed by the kernel name.
    pub fn from_lsblk_json(json: &str) -> Result<Self, serde_json::Error> {
        let output: LsblkOutput = serde_json::from_str(json)?;
        let mut table = Self::default();
        for d in output.blockdevices {
            let mapped = d.kind.as_deref().is_some_and(|k| MAPPED_TYPES.contains(&k));
            // RHEL8's lsblk doesn't have PATH
            let path = d.path.map(PathBuf::from).unwrap_or_else(|| {
                if mapped {
                    Path::new(DEVFS).join("mapper").join(&d.name)
                } else {
                    Path::new(DEVFS).join(&d.name)
                }
            });
            let row = BlockDevice {
                path,
                kernel_name: d.name,
                parent_kernel_name: d.pkname.filter(|p| !p.is_empty()),
                mapped,
            };

            let alias = d.kname.filter(|k| !k.is_empty() && *k != row.kernel_name).map(|kname| BlockDevice {
                kernel_name: kname,
                ..row.clone()
            });
            table.push(row);
            if let Some(alias) = alias {
                table.push(alias);
            }
        }
        Ok(table)
    }

    pub fn push(&mut self, row: BlockDevice) {
        self.rows.push(row);
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockDevice> {
        self.rows.iter()
    }

    /// First row recorded for `kernel_name`
    pub fn get(&self, kernel_name: &str) -> Option<&BlockDevice> {
        self.rows.iter().find(|r| r.kernel_name == kernel_name)
    }

    /// Parent of the first row whose child column is `kernel_name`
    pub fn parent_of(&self, kernel_name: &str) -> Option<&str> {
        self.get(kernel_name)?.parent_kernel_name.as_deref()
    }

    pub fn is_mapped(&self, kernel_name: &str) -> bool {
        self.rows.iter().any(|r| r.kernel_name == kernel_name && r.mapped)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{BlockDevice, TopologyTable};

    const LSBLK: &str = r#"{
   "blockdevices": [
      {"name":"nvme0n1", "kname":"nvme0n1", "pkname":null, "type":"disk", "path":"/dev/nvme0n1"},
      {"name":"nvme0n1p1", "kname":"nvme0n1p1", "pkname":"nvme0n1", "type":"part", "path":"/dev/nvme0n1p1"},
      {"name":"nvme0n1p2", "kname":"nvme0n1p2", "pkname":"nvme0n1", "type":"part", "path":"/dev/nvme0n1p2"},
      {"name":"cryptlvm", "kname":"dm-0", "pkname":"nvme0n1p2", "type":"crypt", "path":"/dev/mapper/cryptlvm"},
      {"name":"vg-root", "kname":"dm-1", "pkname":"dm-0", "type":"lvm", "path":"/dev/mapper/vg-root"}
   ]
}"#;

    #[test]
    fn lsblk_rows() {
        let table = TopologyTable::from_lsblk_json(LSBLK).expect("valid lsblk json");
        assert_eq!(table.iter().count(), 7);
        assert_eq!(table.parent_of("cryptlvm"), Some("nvme0n1p2"));
        assert_eq!(table.parent_of("dm-0"), Some("nvme0n1p2"));
        assert_eq!(table.parent_of("vg-root"), Some("dm-0"));
        assert_eq!(table.parent_of("dm-1"), Some("dm-0"));
        assert!(table.is_mapped("dm-0"));
        assert_eq!(table.parent_of("nvme0n1"), None);
        assert_eq!(table.parent_of("sda"), None);
        assert!(table.is_mapped("cryptlvm"));
        assert!(!table.is_mapped("nvme0n1p2"));
        assert_eq!(
            table.get("vg-root").map(|r| r.path.clone()),
            Some(PathBuf::from("/dev/mapper/vg-root"))
        );
        assert_eq!(
            table.get("dm-1").map(|r| r.path.clone()),
            Some(PathBuf::from("/dev/mapper/vg-root"))
        );
    }

    #[test]
    fn lsblk_without_path_column() {
        let json = r#"{"blockdevices":[{"name":"root","pkname":"sda2","type":"crypt"},{"name":"sda2","pkname":"","type":"part"}]}"#;
        let table = TopologyTable::from_lsblk_json(json).expect("valid lsblk json");
        assert_eq!(table.get("root").map(|r| r.path.clone()), Some(PathBuf::from("/dev/mapper/root")));
        assert_eq!(table.get("sda2").map(|r| r.path.clone()), Some(PathBuf::from("/dev/sda2")));
        assert_eq!(table.parent_of("sda2"), None);
    }

    #[test]
    fn first_row_wins() {
        let table = TopologyTable::new(vec![
            BlockDevice::mapped("root", "sda2"),
            BlockDevice::mapped("root", "sdb2"),
        ]);
        assert_eq!(table.parent_of("root"), Some("sda2"));
    }

    #[test]
    fn malformed_json() {
        assert!(TopologyTable::from_lsblk_json("NAME PKNAME").is_err());
    }
}
