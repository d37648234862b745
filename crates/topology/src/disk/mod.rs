// SPDX-FileCopyrightText: Copyright © 2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Disk probe/query APIs

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

pub mod builder;
pub mod command;
pub mod device;
pub mod mounts;
pub mod probe;

pub use command::CommandQuery;
pub use device::{BlockDevice, TopologyTable};
pub use probe::Probe;

#[derive(Debug, Error)]
pub enum Error {
    #[error("from io: {0}")]
    IO(#[from] std::io::Error),

    #[error("no `mounts` entry for {0}")]
    UnknownMount(PathBuf),

    #[error("not a device path: {0}")]
    InvalidDevicePath(PathBuf),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("{program} failed (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("malformed {program} output: {reason}")]
    Malformed { program: &'static str, reason: String },
}

/// Kernel view of mounts and device-mapper parentage
///
/// Device paths handed out and accepted here are always logical (`/dev/...`),
/// regardless of where the implementation actually reads its data from.
pub trait BlockDeviceQuery {
    /// Device path currently backing `mountpoint`
    fn mount_source(&self, mountpoint: &Path) -> Result<PathBuf, Error>;

    /// Kernel name of the first parent recorded for `kernel_name`, if any.
    ///
    /// `None` is not an error: it means the device is already physical.
    fn parent_of(&self, kernel_name: &str) -> Result<Option<String>, Error>;

    /// Whether `kernel_name` is itself a device-mapper node
    fn is_mapped(&self, kernel_name: &str) -> Result<bool, Error> {
        Ok(kernel_name.starts_with("dm-"))
    }
}

/// Lookup of the stable GPT partition identifier (PARTUUID)
pub trait PartitionIdentifierReader {
    /// Raw identifier for `device`. An empty string means "not found".
    fn partuuid(&self, device: &Path) -> Result<String, Error>;
}

/// Root of the logical device namespace
pub const DEVFS: &str = "/dev";
