// SPDX-FileCopyrightText: Copyright © 2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Processing of `/proc/self/mounts` & `/etc/mtab`

use std::{
    borrow::Cow,
    fs, io,
    path::{Path, PathBuf},
};

/// Encapsulates a `/proc/self/mounts` or mtab file, ignoring fstab specific 5&6 columns
#[derive(Debug)]
pub struct Mount<'a> {
    /// Path of device used for mounting
    pub device: &'a str,

    /// Where the device was mounted (still octal-escaped)
    pub mountpoint: &'a str,

    /// The filesystem name
    pub filesystem: &'a str,

    /// Raw mount options
    pub opts: &'a str,
}

/// Filesystem specific mount option, i.e `subvol=root`
pub enum MountOption<'a> {
    /// Simple mount flag
    Flag(&'a str),

    /// Key-value option for a mount
    Option(&'a str, &'a str),
}

impl<'a> Mount<'a> {
    /// Convert [`Mount::opts`] into an iterator of typed options
    pub fn options(&self) -> impl Iterator<Item = MountOption<'a>> {
        self.opts.split(',').map(|o| {
            if let Some((k, v)) = o.split_once('=') {
                MountOption::Option(k, v)
            } else {
                MountOption::Flag(o)
            }
        })
    }

    /// The mountpoint with the kernel's octal escapes (`\040` etc) decoded
    pub fn mountpoint_path(&self) -> PathBuf {
        PathBuf::from(unescape(self.mountpoint).as_ref())
    }
}

/// The kernel escapes space, tab, newline and backslash in mount paths
fn unescape(raw: &str) -> Cow<'_, str> {
    if !raw.contains('\\') {
        return Cow::Borrowed(raw);
    }
    Cow::Owned(
        raw.replace("\\040", " ")
            .replace("\\011", "\t")
            .replace("\\012", "\n")
            .replace("\\134", "\\"),
    )
}

/// Trailing slashes are not significant when comparing mountpoints
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

/// MountTable for iterating mount points
#[derive(Debug, Default)]
pub struct Table {
    data: String,
}

impl Table {
    /// New MountTable parser for string
    ///
    /// Arguments:
    ///
    /// `data` - Some owned string
    pub fn new(data: String) -> Self {
        Self { data }
    }

    /// Iterate all mount points (no copy)
    pub fn iter(&self) -> impl Iterator<Item = Mount> {
        self.data.lines().filter_map(|i| {
            let mut splits = i.split_ascii_whitespace();
            Some(Mount {
                device: splits.next()?,
                mountpoint: splits.next()?,
                filesystem: splits.next()?,
                opts: splits.next()?,
            })
        })
    }

    /// Find the mount for `mountpoint`.
    ///
    /// Over-mounts are common (`/` is frequently listed twice), so the last
    /// entry wins as that is the one currently visible.
    pub fn find(&self, mountpoint: &Path) -> Option<Mount> {
        let wanted = normalize(mountpoint);
        self.iter().filter(|m| normalize(&m.mountpoint_path()) == wanted).last()
    }

    /// New MountTable parser for file
    ///
    /// Arguments:
    ///
    /// `path` - Path to load the mtab from (i.e. `/proc/self/mounts`)
    pub fn new_from_path(path: impl AsRef<Path>) -> Result<Self, io::Error> {
        Ok(Self::new(fs::read_to_string(path)?))
    }
}
