// SPDX-FileCopyrightText: Copyright © 2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Bootloader APIs
//!
//! Detection is pure inspection of the boot directory. Each supported
//! bootloader contributes a predicate, and the predicates are consulted in a
//! fixed priority order: the first one to recognise its markers wins.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{Error, PartitionIdentifier, PatchOperation};

pub mod limine;
pub mod systemd_boot;

/// Which bootloader owns the boot directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Limine,
    SystemdBoot,
    Unknown,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Limine => f.write_str("limine"),
            Kind::SystemdBoot => f.write_str("systemd-boot"),
            Kind::Unknown => f.write_str("unknown"),
        }
    }
}

/// Detected bootloader and the configuration files to patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub kind: Kind,

    /// Ordered configuration targets. May be empty when the bootloader was
    /// recognised but nothing suitable was found to patch.
    pub targets: Vec<PathBuf>,
}

/// Recognise a bootloader beneath `boot`, returning its targets
type Predicate = fn(&Path, &str) -> Result<Option<Vec<PathBuf>>, Error>;

/// Detection priority
const PREDICATES: &[(Kind, Predicate)] = &[(Kind::Limine, limine::detect), (Kind::SystemdBoot, systemd_boot::detect)];

/// Classify the bootloader installed beneath `boot`
///
/// `entry_match` selects between systemd-boot entries and is ignored otherwise.
pub fn detect(boot: &Path, entry_match: &str) -> Result<Profile, Error> {
    for (kind, predicate) in PREDICATES {
        if let Some(targets) = predicate(boot, entry_match)? {
            log::debug!("detected {kind} in {}", boot.display());
            return Ok(Profile { kind: *kind, targets });
        }
    }

    log::debug!("no known bootloader markers in {}", boot.display());
    Ok(Profile {
        kind: Kind::Unknown,
        targets: vec![],
    })
}

impl Profile {
    /// The patch operations needed to carry `id` into every target
    pub fn operations(&self, template: &Path, id: &PartitionIdentifier) -> Vec<PatchOperation> {
        self.targets
            .iter()
            .filter_map(|target| match self.kind {
                Kind::Limine => Some(limine::operation(template, target, id)),
                Kind::SystemdBoot => Some(systemd_boot::operation(target, id)),
                Kind::Unknown => None,
            })
            .collect()
    }
}
