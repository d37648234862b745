// SPDX-FileCopyrightText: Copyright © 2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! systemd-boot entry selection
//!
//! Entries live in `$BOOT/loader/entries`. The distribution's entry is picked
//! by a case-insensitive substring of its file name and patched in place.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{file_utils::PathExt, os_release::OsRelease, Error, PartitionIdentifier, PatchOperation, Pattern};

/// Used when the target root has no usable os-release
pub const FALLBACK_ENTRY_MATCH: &str = "arch";

/// The `loader/entries` directory beneath `boot`
pub fn entries_dir(boot: &Path) -> PathBuf {
    boot.join_insensitive("loader").join_insensitive("entries")
}

/// Pick the first entry whose file name contains `needle`, ignoring case
///
/// Entries are considered in file name order so the choice is stable. A blank
/// needle would match every entry and never selects anything.
pub fn select_entry(entries: &Path, needle: &str) -> Result<Option<PathBuf>, Error> {
    if needle.trim().is_empty() {
        log::warn!("refusing to select a boot entry with an empty match");
        return Ok(None);
    }

    let mut candidates = fs::read_dir(entries)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .map(|e| e.path())
        .collect::<Vec<_>>();
    candidates.sort();

    let needle = needle.to_lowercase();
    let selected = candidates.into_iter().find(|p| {
        p.file_name()
            .is_some_and(|n| n.to_string_lossy().to_lowercase().contains(&needle))
    });
    if let Some(entry) = selected.as_ref() {
        log::trace!("selected entry {} for `{needle}`", entry.display());
    }
    Ok(selected)
}

/// systemd-boot is present when its entries directory exists. A missing
/// entry still counts as detected, just with nothing to patch.
pub(super) fn detect(boot: &Path, needle: &str) -> Result<Option<Vec<PathBuf>>, Error> {
    let entries = entries_dir(boot);
    if !entries.is_dir() {
        return Ok(None);
    }
    Ok(Some(select_entry(&entries, needle)?.into_iter().collect()))
}

pub(super) fn operation(target: &Path, id: &PartitionIdentifier) -> PatchOperation {
    PatchOperation {
        source: target.to_path_buf(),
        destination: target.to_path_buf(),
        pattern: Pattern::RootPartUuid,
        replacement: id.clone(),
    }
}

/// Entry name hint for the system at `root`: its os-release `ID`
pub fn default_entry_match(root: &Path) -> String {
    match OsRelease::from_root(root) {
        Ok(Some(os)) => os.id,
        Ok(None) => {
            log::debug!("no os-release in {}, using `{FALLBACK_ENTRY_MATCH}`", root.display());
            FALLBACK_ENTRY_MATCH.to_owned()
        }
        Err(e) => {
            log::warn!("unable to read os-release in {}: {e}", root.display());
            FALLBACK_ENTRY_MATCH.to_owned()
        }
    }
}
