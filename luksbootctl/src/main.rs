// SPDX-FileCopyrightText: Copyright © 2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Point the bootloader at the partition underneath an encrypted root

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::Context, Section};
use luksboot::{
    disk::{builder, BlockDeviceQuery, CommandQuery, PartitionIdentifierReader, Probe},
    Aborted, Configuration, Pipeline, Report, Stage, Status,
};
use pretty_env_logger::formatted_builder;

/// Resolve the root partition behind device-mapper and patch Limine or systemd-boot
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Mountpoint of the root filesystem to repair
    #[arg(short, long, global = true, default_value = "/")]
    path: PathBuf,

    /// Where `sys`, `dev` and `proc` live for the sysfs backend
    #[arg(long, global = true, default_value = "/")]
    vfs: PathBuf,

    /// Bootloader directory [default: `$path/boot`]
    #[arg(short, long, global = true)]
    boot: Option<PathBuf>,

    /// Limine configuration template
    #[arg(short, long, global = true, default_value = "system/limine.conf")]
    template: PathBuf,

    /// Substring selecting the systemd-boot entry [default: os-release ID]
    #[arg(short, long, global = true)]
    entry_match: Option<String>,

    /// How block devices are queried
    #[arg(long, global = true, value_enum, default_value_t = Backend::Sysfs)]
    backend: Backend,

    /// Seconds allowed per external command (command backend)
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    /// Fail unless the root filesystem sits on a device-mapper device
    #[arg(long, global = true)]
    require_encrypted: bool,

    /// Emit machine readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Enable trace logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the resolved root device, PARTUUID and bootloader
    Status,

    /// Write the root PARTUUID into the bootloader configuration
    Patch {
        /// Print the would-be configuration instead of writing it
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    /// Read sysfs, procfs and devfs directly
    Sysfs,

    /// Shell out to findmnt, lsblk and blkid
    Command,
}

/// Native sysfs/procfs/devfs backend
fn probe(vfs: &Path) -> color_eyre::Result<Probe> {
    let probe = builder::new()
        .with_vfs(vfs)
        .build()
        .wrap_err(format!("Unable to probe block devices beneath `{}`", vfs.display()))
        .with_note(|| "Please make sure that sysfs, procfs and devfs are mounted and readable")?;
    log::trace!("Topology: {:?}", probe.topology());
    Ok(probe)
}

fn report_abort(err: Aborted) -> color_eyre::Report {
    let untouched = err.stage != Stage::Patch;
    let report = color_eyre::Report::new(err);
    if untouched {
        report.with_note(|| "No boot configuration was modified")
    } else {
        report.with_note(|| "The previous configuration is still in place for any file not reported as updated")
    }
}

fn print_report(report: &Report) {
    println!("Mounted device:  {}", report.root.mounted_device.display());
    println!("Physical device: {}", report.root.physical_device.display());
    println!("Indirected:      {}", report.root.was_indirected);
    println!("PARTUUID:        {}", report.partuuid);
    println!("Bootloader:      {}", report.bootloader.kind);
    for target in &report.bootloader.targets {
        println!("Target:          {}", target.display());
    }
    for change in &report.changes {
        let status = match change.status {
            Status::Written => "updated",
            Status::Unchanged => "unchanged",
            Status::DryRun => "would update",
        };
        println!("{status}: {} ({} replacements)", change.destination.display(), change.replacements);
        if let Some(preview) = change.preview.as_ref() {
            println!("--- {}", change.destination.display());
            print!("{preview}");
        }
    }
    if let Some(skip) = report.skipped.as_ref() {
        println!("Skipped: {skip}");
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::config::HookBuilder::default()
        .display_env_section(false)
        .install()?;

    let res = Cli::parse();

    formatted_builder()
        .filter_level(if res.verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let mut config = Configuration::new(&res.path);
    config.vfs = res.vfs.clone();
    if let Some(boot) = res.boot.clone() {
        config.boot = boot;
    }
    config.template = res.template.clone();
    config.entry_match = res.entry_match.clone();
    config.require_encrypted = res.require_encrypted;

    log::trace!("Using configuration: {config:?}");
    log::info!("Inspecting root device: {}", config.root.display());

    match res.backend {
        Backend::Sysfs => {
            let probe = probe(&config.vfs)?;
            execute(&res, &config, &probe, &probe)
        }
        Backend::Command => {
            let query = CommandQuery::new(Duration::from_secs(res.timeout));
            execute(&res, &config, &query, &query)
        }
    }
}

fn execute(
    res: &Cli,
    config: &Configuration,
    query: &dyn BlockDeviceQuery,
    reader: &dyn PartitionIdentifierReader,
) -> color_eyre::Result<()> {
    match res.command {
        Commands::Status => {
            let pipeline = Pipeline::new(config, query, reader);
            let (root, partuuid, bootloader) = pipeline.inspect().map_err(report_abort)?;
            let report = Report {
                root,
                partuuid,
                bootloader,
                changes: vec![],
                skipped: None,
            };
            if res.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
                println!("Entry match:     {}", pipeline.entry_match());
            }
        }
        Commands::Patch { dry_run } => {
            let report = Pipeline::new(config, query, reader)
                .dry_run(dry_run)
                .run()
                .map_err(report_abort)?;
            if res.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}
