// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Limine configuration
//!
//! The live `limine.conf` is always regenerated from a template carrying
//! [`PLACEHOLDER`], never edited in place.

use std::path::{Path, PathBuf};

use crate::{file_utils::PathExt, Error, PartitionIdentifier, PatchOperation, Pattern};

/// Token substituted with the root PARTUUID
pub const PLACEHOLDER: &str = "{{ROOT_PARTUUID}}";

/// Where the live configuration goes
pub fn config_target(boot: &Path) -> PathBuf {
    boot.join_insensitive("limine").join_insensitive("limine.conf")
}

/// Limine is present if either its directory or a top-level config exists
pub(super) fn detect(boot: &Path, _: &str) -> Result<Option<Vec<PathBuf>>, Error> {
    let installed = boot.join_insensitive("limine").is_dir() || boot.join_insensitive("limine.conf").is_file();
    Ok(installed.then(|| vec![config_target(boot)]))
}

pub(super) fn operation(template: &Path, target: &Path, id: &PartitionIdentifier) -> PatchOperation {
    PatchOperation {
        source: template.to_path_buf(),
        destination: target.to_path_buf(),
        pattern: Pattern::Placeholder(PLACEHOLDER),
        replacement: id.clone(),
    }
}
