// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Orchestration of the root → PARTUUID → bootloader patch sequence
//!
//! The pipeline is an explicit state machine:
//!
//! ```text
//! Start → RootResolved → IdentifierKnown → BootloaderKnown → Patched | Skipped
//! ```
//!
//! Any failure before `Patched` ends in [`Aborted`] and nothing is written.
//! Skips are terminal but successful outcomes that need operator attention.

use std::{fmt, path::PathBuf};

use serde::Serialize;
use topology::disk::{BlockDeviceQuery, PartitionIdentifierReader};

use crate::{
    bootloader::{self, systemd_boot, Kind, Profile},
    Change, Configuration, Error, PartitionIdentifier, ResolvedRoot,
};

/// Pipeline stage, used to report where an abort happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    ResolveRoot,
    ReadIdentifier,
    DetectBootloader,
    Patch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ResolveRoot => f.write_str("resolve the root device"),
            Stage::ReadIdentifier => f.write_str("read the partition identifier"),
            Stage::DetectBootloader => f.write_str("detect the bootloader"),
            Stage::Patch => f.write_str("patch the boot configuration"),
        }
    }
}

/// Fatal pipeline failure
#[derive(Debug, thiserror::Error)]
#[error("failed to {stage}")]
pub struct Aborted {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

/// Non-fatal reasons for leaving the boot configuration alone
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum Skip {
    #[error("no supported bootloader found, the root PARTUUID must be configured manually")]
    UnknownBootloader,

    #[error("no boot entry in {} matches `{needle}`", .entries.display())]
    NoMatchingBootEntry { entries: PathBuf, needle: String },

    #[error("Limine template {} not found", .0.display())]
    MissingTemplate(PathBuf),

    #[error("{} has no root=PARTUUID= assignment to update", .0.display())]
    NoRootAssignment(PathBuf),
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub root: ResolvedRoot,
    pub partuuid: PartitionIdentifier,
    pub bootloader: Profile,
    pub changes: Vec<Change>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<Skip>,
}

#[derive(Debug)]
pub enum State {
    Start,
    RootResolved(ResolvedRoot),
    IdentifierKnown(ResolvedRoot, PartitionIdentifier),
    BootloaderKnown(ResolvedRoot, PartitionIdentifier, Profile),
    Patched(Report),
    Skipped(Report),
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Patched(_) | State::Skipped(_))
    }
}

/// Drives a [`Configuration`] through every [`State`]
pub struct Pipeline<'a> {
    config: &'a Configuration,
    query: &'a dyn BlockDeviceQuery,
    reader: &'a dyn PartitionIdentifierReader,
    entry_match: String,
    dry_run: bool,
}

fn abort(stage: Stage) -> impl FnOnce(Error) -> Aborted {
    move |source| {
        log::error!("unable to {stage}: {source}");
        Aborted { stage, source }
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Configuration,
        query: &'a dyn BlockDeviceQuery,
        reader: &'a dyn PartitionIdentifierReader,
    ) -> Self {
        let entry_match = config
            .entry_match
            .clone()
            .unwrap_or_else(|| systemd_boot::default_entry_match(&config.root));

        Self {
            config,
            query,
            reader,
            entry_match,
            dry_run: false,
        }
    }

    /// Render patches without writing anything
    pub fn dry_run(self, dry_run: bool) -> Self {
        Self { dry_run, ..self }
    }

    /// Needle used to select a systemd-boot entry
    pub fn entry_match(&self) -> &str {
        &self.entry_match
    }

    /// Advance by one state. Terminal states are returned untouched.
    pub fn step(&self, state: State) -> Result<State, Aborted> {
        let next = match state {
            State::Start => State::RootResolved(self.resolve_root().map_err(abort(Stage::ResolveRoot))?),
            State::RootResolved(root) => {
                let id = PartitionIdentifier::read(self.reader, &root.physical_device)
                    .map_err(abort(Stage::ReadIdentifier))?;
                log::info!("{} has PARTUUID {id}", root.physical_device.display());
                State::IdentifierKnown(root, id)
            }
            State::IdentifierKnown(root, id) => {
                let profile =
                    bootloader::detect(&self.config.boot, &self.entry_match).map_err(abort(Stage::DetectBootloader))?;
                log::info!("Bootloader: {}", profile.kind);
                State::BootloaderKnown(root, id, profile)
            }
            State::BootloaderKnown(root, id, profile) => {
                let mut report = Report {
                    root,
                    partuuid: id,
                    bootloader: profile,
                    changes: vec![],
                    skipped: None,
                };
                match self.patch(&report).map_err(abort(Stage::Patch))? {
                    Ok(changes) => {
                        report.changes = changes;
                        State::Patched(report)
                    }
                    Err(skip) => {
                        log::warn!("{skip}");
                        report.skipped = Some(skip);
                        State::Skipped(report)
                    }
                }
            }
            terminal => terminal,
        };

        Ok(next)
    }

    /// Run to completion
    pub fn run(&self) -> Result<Report, Aborted> {
        let mut state = State::Start;
        loop {
            state = self.step(state)?;
            match state {
                State::Patched(report) | State::Skipped(report) => return Ok(report),
                _ => log::trace!("pipeline state: {state:?}"),
            }
        }
    }

    /// Everything up to bootloader detection; never touches a file
    pub fn inspect(&self) -> Result<(ResolvedRoot, PartitionIdentifier, Profile), Aborted> {
        let mut state = State::Start;
        loop {
            state = self.step(state)?;
            if let State::BootloaderKnown(root, id, profile) = state {
                return Ok((root, id, profile));
            }
        }
    }

    fn resolve_root(&self) -> Result<ResolvedRoot, Error> {
        let root = ResolvedRoot::resolve(self.query, &self.config.root)?;
        if self.config.require_encrypted && !root.was_indirected {
            return Err(Error::NotEncrypted(root.mounted_device));
        }

        if root.was_indirected {
            log::info!(
                "Root device {} is backed by {}",
                root.mounted_device.display(),
                root.physical_device.display()
            );
        } else {
            log::info!("Root device {}", root.physical_device.display());
        }

        Ok(root)
    }

    /// Render every operation before committing any, so a failure or skip
    /// leaves all targets untouched
    fn patch(&self, report: &Report) -> Result<Result<Vec<Change>, Skip>, Error> {
        let profile = &report.bootloader;
        match profile.kind {
            Kind::Unknown => return Ok(Err(Skip::UnknownBootloader)),
            Kind::SystemdBoot if profile.targets.is_empty() => {
                return Ok(Err(Skip::NoMatchingBootEntry {
                    entries: systemd_boot::entries_dir(&self.config.boot),
                    needle: self.entry_match.clone(),
                }))
            }
            Kind::Limine if !self.config.template.is_file() => {
                return Ok(Err(Skip::MissingTemplate(self.config.template.clone())))
            }
            _ => {}
        }

        let operations = profile.operations(&self.config.template, &report.partuuid);
        let mut rendered = Vec::with_capacity(operations.len());
        for op in operations {
            let output = op.render()?;
            if output.replacements == 0 {
                match profile.kind {
                    Kind::SystemdBoot => return Ok(Err(Skip::NoRootAssignment(op.destination))),
                    _ => log::warn!(
                        "{} contains no {} placeholder",
                        op.source.display(),
                        bootloader::limine::PLACEHOLDER
                    ),
                }
            }
            rendered.push((op, output));
        }

        let changes = rendered
            .into_iter()
            .map(|(op, output)| op.commit(output, self.dry_run))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Ok(changes))
    }
}
