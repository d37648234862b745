// SPDX-FileCopyrightText: Copyright © 2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Builder API for constructing the Probe
use std::{fs, path::PathBuf};

use crate::disk::{device::TopologyTable, probe::Probe};

use super::mounts::Table;

/// Builder pattern for a Probe
pub struct Builder {
    sysfs: PathBuf,
    devfs: PathBuf,
    procfs: PathBuf,
}

/// Generate default builder
pub fn new() -> Builder {
    Builder {
        sysfs: "/sys".into(),
        devfs: "/dev".into(),
        procfs: "/proc".into(),
    }
}

impl Default for Builder {
    fn default() -> Self {
        self::new()
    }
}

impl Builder {
    /// Use `sys`, `dev` and `proc` beneath `vfs`
    pub fn with_vfs(self, vfs: impl Into<PathBuf>) -> Self {
        let vfs = vfs.into();
        Self {
            sysfs: vfs.join("sys"),
            devfs: vfs.join("dev"),
            procfs: vfs.join("proc"),
        }
    }

    // sysfs directory
    pub fn with_sysfs(self, sysfs: impl Into<PathBuf>) -> Self {
        Self {
            sysfs: sysfs.into(),
            ..self
        }
    }

    /// devfs directory
    pub fn with_devfs(self, devfs: impl Into<PathBuf>) -> Self {
        Self {
            devfs: devfs.into(),
            ..self
        }
    }

    // procfs directory
    pub fn with_procfs(self, procfs: impl Into<PathBuf>) -> Self {
        Self {
            procfs: procfs.into(),
            ..self
        }
    }

    /// Return a newly built Probe
    /// Note: All input paths will be verified
    pub fn build(self) -> Result<Probe, super::Error> {
        let mut result = Probe {
            sysfs: fs::canonicalize(self.sysfs)?,
            devfs: fs::canonicalize(self.devfs)?,
            procfs: fs::canonicalize(self.procfs)?,
            mounts: Table::default(),
            topology: TopologyTable::default(),
        };
        result.init_scan()?;
        Ok(result)
    }
}
