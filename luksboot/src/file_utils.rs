// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! File utilities shared between the luksboot APIs

use std::{
    fs::{self, create_dir_all, File},
    io::Write,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use crate::Error;

/// Case-insensitive path joining for FAT, respecting existing entries on the filesystem
/// Note, this discards errors, so will require read permissions
pub trait PathExt<P: AsRef<Path>> {
    fn join_insensitive(&self, path: P) -> PathBuf;
}

impl<P: AsRef<Path>> PathExt<P> for Path {
    fn join_insensitive(&self, path: P) -> PathBuf {
        let real_path: &Path = path.as_ref();
        if let Ok(dir) = fs::read_dir(self) {
            let entries = dir.filter_map(|e| e.ok()).filter_map(|p| {
                let n = p.file_name();
                n.into_string().ok()
            });
            for entry in entries {
                if entry.to_lowercase() == real_path.to_string_lossy().to_lowercase() {
                    return self.join(&entry);
                }
            }
        }
        self.join(path)
    }
}

/// Compare the file at `path` against `content` with blake3
///
/// A missing file never matches.
pub fn content_identical(path: &Path, content: &[u8]) -> Result<bool, Error> {
    let Ok(meta) = fs::metadata(path) else {
        return Ok(false);
    };
    if !meta.is_file() || meta.len() != content.len() as u64 {
        return Ok(false);
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap_rayon(path)?;
    Ok(hasher.finalize() == blake3::hash(content))
}

/// Replace `dest` with `content` without ever exposing a partial file.
///
/// The content is staged next to the destination, flushed, and renamed into
/// place. Existing permissions on `dest` carry over to the new file.
pub fn write_atomic(dest: impl AsRef<Path>, content: &[u8]) -> Result<(), Error> {
    let dest = dest.as_ref();
    log::trace!("write_atomic: {}", dest.display());

    // Staging path
    let dest_temp = dest.with_extension("TmpWrite");

    // Ensure leading path structure exists
    let dir_leading = dest.parent().ok_or(Error::InvalidFilesystem)?;
    if !dir_leading.as_os_str().is_empty() && !dir_leading.exists() {
        create_dir_all(dir_leading)?;
    }
    let permissions = fs::metadata(dest).ok().map(|m| m.permissions());

    let staged = (|| -> Result<(), Error> {
        let mut output = File::options()
            .truncate(true)
            .write(true)
            .create(true)
            .open(&dest_temp)?;
        output.write_all(content)?;
        if let Some(permissions) = permissions {
            output.set_permissions(permissions)?;
        }
        output.sync_all()?;

        // Rename into final location
        fs::rename(&dest_temp, dest)?;
        nix::unistd::syncfs(output.as_raw_fd())?;
        Ok(())
    })();

    if let Err(e) = staged {
        if dest_temp.exists() {
            if let Err(cleanup) = fs::remove_file(&dest_temp) {
                log::error!("Failed to remove {}: {cleanup}", dest_temp.display());
            }
        }
        return Err(e);
    }

    log::info!("Updated {}", dest.display());

    Ok(())
}
