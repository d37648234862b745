// SPDX-FileCopyrightText: Copyright © 2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub mod bootloader;
pub use bootloader::{Kind, Profile};

pub mod file_utils;
pub mod os_release;

mod identifier;
pub use identifier::PartitionIdentifier;

mod patch;
pub use patch::{Change, PatchOperation, Pattern, Rendered, Status};

mod pipeline;
pub use pipeline::{Aborted, Pipeline, Report, Skip, Stage, State};

mod resolver;
pub use resolver::{mapper_name, ResolvedRoot};

/// Re-export the topology APIs
pub use topology::disk;

/// Core error type for luksboot
#[derive(Debug, Error)]
pub enum Error {
    #[error("block device query: {0}")]
    Query(topology::disk::Error),

    #[error("block device query: {program} timed out after {timeout:?}")]
    QueryTimeout { program: String, timeout: Duration },

    #[error("cannot resolve the physical device beneath {device}: {reason}")]
    UnresolvedPhysicalDevice { device: PathBuf, reason: String },

    #[error("root device {0} is not a device-mapper (LUKS) device")]
    NotEncrypted(PathBuf),

    #[error("no PARTUUID found for {0}")]
    IdentifierNotFound(PathBuf),

    #[error("refusing to use malformed PARTUUID `{0}`")]
    InvalidIdentifier(String),

    #[error("c stdlib: {0}")]
    C(#[from] nix::errno::Errno),

    #[error("generic i/o error")]
    IO(#[from] std::io::Error),

    #[error("pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to interact with filesystem properly")]
    InvalidFilesystem,
}

impl From<topology::disk::Error> for Error {
    fn from(err: topology::disk::Error) -> Self {
        match err {
            topology::disk::Error::Timeout { program, timeout } => Error::QueryTimeout { program, timeout },
            err => Error::Query(err),
        }
    }
}

/// Core configuration for boot patching
#[derive(Debug)]
pub struct Configuration {
    /// Mountpoint of the root filesystem to repair (`/` or a mounted image)
    pub root: PathBuf,

    /// Where we can find `sysfs` `proc` etc
    pub vfs: PathBuf,

    /// Where the bootloader lives (usually `$root/boot`)
    pub boot: PathBuf,

    /// Limine config template containing the PARTUUID placeholder
    pub template: PathBuf,

    /// Substring selecting the systemd-boot entry. Defaults to the os-release `ID`
    pub entry_match: Option<String>,

    /// Refuse to continue unless root sits on a device-mapper device
    pub require_encrypted: bool,
}

impl Configuration {
    /// Defaults for the given root: `$root/boot` and the repository's template
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let boot = root.join("boot");
        Self {
            root,
            vfs: "/".into(),
            boot,
            template: PathBuf::from("system").join("limine.conf"),
            entry_match: None,
            require_encrypted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use topology::disk::Error as QueryError;

    use super::Error;

    #[test]
    fn query_errors() {
        let timeout = Error::from(QueryError::Timeout {
            program: "blkid".into(),
            timeout: Duration::from_secs(10),
        });
        assert!(matches!(timeout, Error::QueryTimeout { ref program, .. } if program == "blkid"));

        let unknown = Error::from(QueryError::UnknownMount(PathBuf::from("/mnt")));
        assert!(matches!(unknown, Error::Query(QueryError::UnknownMount(_))));
    }
}
