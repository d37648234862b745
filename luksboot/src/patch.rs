// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Identifier substitution into bootloader configuration
//!
//! Two strategies share one contract: expanding a placeholder in a template
//! (Limine) and rewriting the `root=PARTUUID=` assignment of a live file
//! (systemd-boot). Both render fully in memory first and only ever replace the
//! destination atomically.

use std::{fs, path::PathBuf};

use regex::{NoExpand, Regex};
use serde::Serialize;

use crate::{file_utils, Error, PartitionIdentifier};

/// Matches an existing kernel `root=PARTUUID=` assignment
const ROOT_PARTUUID: &str = r"root=PARTUUID=[a-zA-Z0-9-]+";

/// What gets replaced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Pattern {
    /// Every occurrence of a literal token
    Placeholder(&'static str),

    /// The value of any `root=PARTUUID=` assignment
    RootPartUuid,
}

/// A single substitution of an identifier into a file
#[derive(Debug, Clone)]
pub struct PatchOperation {
    /// Template or existing file to read
    pub source: PathBuf,

    /// Live configuration to (re)write
    pub destination: PathBuf,

    pub pattern: Pattern,

    pub replacement: PartitionIdentifier,
}

/// In-memory result of a substitution
#[derive(Debug)]
pub struct Rendered {
    pub content: String,

    /// How many matches were replaced
    pub replacements: usize,
}

/// What happened to the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Written,
    Unchanged,
    DryRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub destination: PathBuf,
    pub status: Status,
    pub replacements: usize,

    /// Rendered content, only kept for dry runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl PatchOperation {
    /// Read the source and substitute the identifier
    pub fn render(&self) -> Result<Rendered, Error> {
        let input = fs::read_to_string(&self.source)?;
        let value = self.replacement.as_str();

        let rendered = match &self.pattern {
            Pattern::Placeholder(token) => Rendered {
                replacements: input.matches(token).count(),
                content: input.replace(token, value),
            },
            Pattern::RootPartUuid => {
                let re = Regex::new(ROOT_PARTUUID)?;
                let assignment = format!("root=PARTUUID={value}");
                Rendered {
                    replacements: re.find_iter(&input).count(),
                    content: re.replace_all(&input, NoExpand(&assignment)).into_owned(),
                }
            }
        };
        log::trace!(
            "rendered {} → {} ({} replacements)",
            self.source.display(),
            self.destination.display(),
            rendered.replacements
        );

        Ok(rendered)
    }

    /// Put `rendered` into place, unless the destination already holds it
    pub fn commit(&self, rendered: Rendered, dry_run: bool) -> Result<Change, Error> {
        let unchanged = file_utils::content_identical(&self.destination, rendered.content.as_bytes())?;
        let (status, preview) = if unchanged {
            log::debug!("{} is up to date", self.destination.display());
            (Status::Unchanged, None)
        } else if dry_run {
            (Status::DryRun, Some(rendered.content))
        } else {
            file_utils::write_atomic(&self.destination, rendered.content.as_bytes())?;
            (Status::Written, None)
        };

        Ok(Change {
            destination: self.destination.clone(),
            status,
            replacements: rendered.replacements,
            preview,
        })
    }

    /// Render and commit in one go
    pub fn apply(&self) -> Result<Change, Error> {
        let rendered = self.render()?;
        self.commit(rendered, false)
    }
}
