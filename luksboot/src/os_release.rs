// SPDX-FileCopyrightText: Copyright © 2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `os-release` file support
//!
//! See the [freedesktop documentation](https://www.freedesktop.org/software/systemd/man/latest/os-release.html)
//! for more information.
//!
//! Only `ID` is decoded; it is used to pick the distribution's boot entry.

use std::{collections::HashMap, fs, path::Path, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing key: {0}")]
    MissingKey(&'static str),

    #[error("io: {0}")]
    IO(#[from] std::io::Error),
}

/// The `os-release` file used by Linux distributions
#[derive(Debug)]
pub struct OsRelease {
    /// Unique ID for the OS
    pub id: String,
}

impl FromStr for OsRelease {
    type Err = self::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let map = s
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.starts_with('#'))
            .filter_map(|s| s.split_once('='))
            .map(|(k, v)| (k, v.trim_matches(|c| c == '\'' || c == '\"')))
            .collect::<HashMap<_, _>>();

        // An empty ID is as good as none
        let id = map
            .get("ID")
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingKey("ID"))?;

        Ok(Self { id: id.to_string() })
    }
}

impl OsRelease {
    /// Load the first os-release found beneath `root`, if any
    pub fn from_root(root: &Path) -> Result<Option<Self>, self::Error> {
        let query_paths = [
            root.join("etc").join("os-release"),
            root.join("usr").join("lib").join("os-release"),
        ];

        for p in query_paths {
            if p.exists() {
                log::trace!("Reading os-release from: {}", p.display());
                let text = fs::read_to_string(p)?;
                return Ok(Some(Self::from_str(&text)?));
            }
        }

        Ok(None)
    }
}
