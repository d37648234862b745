// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end runs against fake block device backends and a scratch `/boot`

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use luksboot::{
    disk::{BlockDevice, BlockDeviceQuery, Error as QueryError, PartitionIdentifierReader, TopologyTable},
    Configuration, Error, Kind, Pipeline, Skip, Stage, Status,
};
use tempfile::TempDir;

const TEMPLATE: &str = "timeout: 3\n\n/Arch Linux\n    protocol: linux\n    path: boot():/vmlinuz-linux\n    cmdline: cryptdevice=PARTUUID={{ROOT_PARTUUID}}:root root=/dev/mapper/root rw\n    module_path: boot():/initramfs-linux.img\n";

const ENTRY: &str = "title   Arch Linux\nlinux   /vmlinuz-linux\ninitrd  /initramfs-linux.img\noptions rd.luks.name=0d0e=root root=PARTUUID=OLD-VALUE rw quiet splash\n";

/// Mount table, topology and PARTUUIDs held in memory
#[derive(Default)]
struct FakeSystem {
    mounts: BTreeMap<PathBuf, PathBuf>,
    topology: TopologyTable,
    partuuids: BTreeMap<PathBuf, String>,
}

impl FakeSystem {
    fn mount(mut self, mountpoint: &Path, device: &str) -> Self {
        self.mounts.insert(mountpoint.to_path_buf(), device.into());
        self
    }

    fn device(mut self, row: BlockDevice) -> Self {
        self.topology.push(row);
        self
    }

    fn partuuid(mut self, device: &str, id: &str) -> Self {
        self.partuuids.insert(device.into(), id.into());
        self
    }
}

impl BlockDeviceQuery for FakeSystem {
    fn mount_source(&self, mountpoint: &Path) -> Result<PathBuf, QueryError> {
        self.mounts
            .get(mountpoint)
            .cloned()
            .ok_or_else(|| QueryError::UnknownMount(mountpoint.to_path_buf()))
    }

    fn parent_of(&self, kernel_name: &str) -> Result<Option<String>, QueryError> {
        Ok(self.topology.parent_of(kernel_name).map(str::to_owned))
    }

    fn is_mapped(&self, kernel_name: &str) -> Result<bool, QueryError> {
        Ok(self.topology.is_mapped(kernel_name))
    }
}

impl PartitionIdentifierReader for FakeSystem {
    fn partuuid(&self, device: &Path) -> Result<String, QueryError> {
        Ok(self.partuuids.get(device).cloned().unwrap_or_default())
    }
}

/// Scratch root with a `boot` directory and a template next to it
struct Scratch {
    dir: TempDir,
}

impl Scratch {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot")).unwrap();
        fs::write(dir.path().join("limine.conf.in"), TEMPLATE).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn boot(&self) -> PathBuf {
        self.root().join("boot")
    }

    fn config(&self) -> Configuration {
        let mut config = Configuration::new(self.root());
        config.template = self.root().join("limine.conf.in");
        config
    }

    /// Snapshot every file beneath `boot`
    fn boot_files(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        fn walk(dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.insert(path.clone(), fs::read(&path).unwrap());
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(&self.boot(), &mut out);
        out
    }
}

fn luks_system(scratch: &Scratch) -> FakeSystem {
    FakeSystem::default()
        .mount(scratch.root(), "/dev/mapper/root")
        .device(BlockDevice::mapped("root", "nvme0n1p2"))
        .device(BlockDevice::new("nvme0n1p2").with_parent("nvme0n1"))
        .device(BlockDevice::new("nvme0n1"))
        .partuuid("/dev/nvme0n1p2", "ABCD-1234")
}

#[test]
fn luks_root_with_limine() {
    let scratch = Scratch::new();
    fs::create_dir(scratch.boot().join("limine")).unwrap();
    let system = luks_system(&scratch);
    let config = scratch.config();

    let report = Pipeline::new(&config, &system, &system).run().expect("pipeline");
    assert!(report.root.was_indirected);
    assert_eq!(report.root.physical_device, Path::new("/dev/nvme0n1p2"));
    assert_eq!(report.bootloader.kind, Kind::Limine);
    assert_eq!(report.skipped, None);
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].status, Status::Written);

    let written = fs::read_to_string(scratch.boot().join("limine/limine.conf")).unwrap();
    assert_eq!(written, TEMPLATE.replace("{{ROOT_PARTUUID}}", "ABCD-1234"));
    assert!(written.contains("cryptdevice=PARTUUID=ABCD-1234:root"));
}

#[test]
fn missing_topology_row_aborts_untouched() {
    let scratch = Scratch::new();
    fs::create_dir(scratch.boot().join("limine")).unwrap();
    fs::write(scratch.boot().join("limine/limine.conf"), "previous\n").unwrap();
    fs::create_dir_all(scratch.boot().join("loader/entries")).unwrap();
    fs::write(scratch.boot().join("loader/entries/arch.conf"), ENTRY).unwrap();
    let before = scratch.boot_files();

    let system = FakeSystem::default()
        .mount(scratch.root(), "/dev/mapper/root")
        .device(BlockDevice::new("nvme0n1p2"))
        .partuuid("/dev/nvme0n1p2", "ABCD-1234");
    let config = scratch.config();

    let err = Pipeline::new(&config, &system, &system).run().unwrap_err();
    assert_eq!(err.stage, Stage::ResolveRoot);
    assert!(matches!(err.source, Error::UnresolvedPhysicalDevice { .. }));
    assert_eq!(scratch.boot_files(), before);
}

#[test]
fn physical_root_with_systemd_boot() {
    let scratch = Scratch::new();
    let entries = scratch.boot().join("loader/entries");
    fs::create_dir_all(&entries).unwrap();
    fs::write(entries.join("2024-arch.conf"), ENTRY).unwrap();
    fs::write(entries.join("windows.conf"), "title Windows\nefi /EFI/Microsoft/Boot/bootmgfw.efi\n").unwrap();

    let system = FakeSystem::default()
        .mount(scratch.root(), "/dev/sda2")
        .device(BlockDevice::new("sda2").with_parent("sda"))
        .partuuid("/dev/sda2", "ABCD-1234");
    let mut config = scratch.config();
    config.entry_match = Some("arch".into());

    let report = Pipeline::new(&config, &system, &system).run().expect("pipeline");
    assert!(!report.root.was_indirected);
    assert_eq!(report.bootloader.kind, Kind::SystemdBoot);
    assert_eq!(report.changes[0].destination, entries.join("2024-arch.conf"));

    let patched = fs::read_to_string(entries.join("2024-arch.conf")).unwrap();
    assert_eq!(patched, ENTRY.replace("root=PARTUUID=OLD-VALUE", "root=PARTUUID=ABCD-1234"));
    for (before, after) in ENTRY.lines().zip(patched.lines()) {
        if !before.starts_with("options") {
            assert_eq!(before, after);
        }
    }
    assert!(fs::read_to_string(entries.join("windows.conf")).unwrap().starts_with("title Windows"));
}

#[test]
fn limine_wins_over_systemd_boot() {
    let scratch = Scratch::new();
    fs::write(scratch.boot().join("limine.conf"), "").unwrap();
    fs::create_dir_all(scratch.boot().join("loader/entries")).unwrap();
    fs::write(scratch.boot().join("loader/entries/arch.conf"), ENTRY).unwrap();
    let system = luks_system(&scratch);
    let config = scratch.config();

    let report = Pipeline::new(&config, &system, &system).run().expect("pipeline");
    assert_eq!(report.bootloader.kind, Kind::Limine);
    assert_eq!(
        fs::read_to_string(scratch.boot().join("loader/entries/arch.conf")).unwrap(),
        ENTRY
    );
    assert!(scratch.boot().join("limine/limine.conf").exists());
}

#[test]
fn empty_identifier_aborts_before_detection() {
    let scratch = Scratch::new();
    fs::create_dir(scratch.boot().join("limine")).unwrap();
    let before = scratch.boot_files();
    let system = FakeSystem::default().mount(scratch.root(), "/dev/sda2");
    let config = scratch.config();

    let pipeline = Pipeline::new(&config, &system, &system);
    let err = pipeline.run().unwrap_err();
    assert_eq!(err.stage, Stage::ReadIdentifier);
    assert!(matches!(err.source, Error::IdentifierNotFound(ref p) if p == Path::new("/dev/sda2")));
    assert!(pipeline.inspect().is_err());
    assert_eq!(scratch.boot_files(), before);
}

#[test]
fn unknown_bootloader_is_skipped() {
    let scratch = Scratch::new();
    let system = luks_system(&scratch);
    let config = scratch.config();

    let report = Pipeline::new(&config, &system, &system).run().expect("skip is not an error");
    assert_eq!(report.bootloader.kind, Kind::Unknown);
    assert_eq!(report.skipped, Some(Skip::UnknownBootloader));
    assert!(report.changes.is_empty());
    assert!(scratch.boot_files().is_empty());
}

#[test]
fn no_matching_entry_is_skipped() {
    let scratch = Scratch::new();
    let entries = scratch.boot().join("loader/entries");
    fs::create_dir_all(&entries).unwrap();
    fs::write(entries.join("fedora.conf"), ENTRY).unwrap();
    let system = luks_system(&scratch);
    let mut config = scratch.config();
    config.entry_match = Some("arch".into());

    let report = Pipeline::new(&config, &system, &system).run().expect("skip is not an error");
    assert_eq!(report.bootloader.kind, Kind::SystemdBoot);
    assert_eq!(
        report.skipped,
        Some(Skip::NoMatchingBootEntry {
            entries: entries.clone(),
            needle: "arch".into()
        })
    );
    assert_eq!(fs::read_to_string(entries.join("fedora.conf")).unwrap(), ENTRY);
}

#[test]
fn empty_entry_match_is_skipped() {
    let scratch = Scratch::new();
    let entries = scratch.boot().join("loader/entries");
    fs::create_dir_all(&entries).unwrap();
    fs::write(entries.join("arch.conf"), ENTRY).unwrap();
    fs::write(entries.join("fedora.conf"), ENTRY).unwrap();
    let before = scratch.boot_files();
    let system = luks_system(&scratch);
    let mut config = scratch.config();
    config.entry_match = Some(String::new());

    let report = Pipeline::new(&config, &system, &system).run().expect("skip is not an error");
    assert_eq!(
        report.skipped,
        Some(Skip::NoMatchingBootEntry {
            entries,
            needle: String::new()
        })
    );
    assert!(report.changes.is_empty());
    assert_eq!(scratch.boot_files(), before);
}

#[test]
fn entry_match_defaults_to_os_release() {
    let scratch = Scratch::new();
    fs::create_dir(scratch.root().join("etc")).unwrap();
    fs::write(scratch.root().join("etc/os-release"), "NAME=\"EndeavourOS\"\nID=endeavouros\nID_LIKE=arch\n").unwrap();
    let entries = scratch.boot().join("loader/entries");
    fs::create_dir_all(&entries).unwrap();
    fs::write(entries.join("arch.conf"), ENTRY).unwrap();
    fs::write(entries.join("endeavouros.conf"), ENTRY).unwrap();
    let system = luks_system(&scratch);
    let config = scratch.config();

    let pipeline = Pipeline::new(&config, &system, &system);
    assert_eq!(pipeline.entry_match(), "endeavouros");
    let report = pipeline.run().expect("pipeline");
    assert_eq!(report.changes[0].destination, entries.join("endeavouros.conf"));
    assert_eq!(fs::read_to_string(entries.join("arch.conf")).unwrap(), ENTRY);
}

#[test]
fn stacked_mapper_is_rejected() {
    let scratch = Scratch::new();
    fs::create_dir(scratch.boot().join("limine")).unwrap();
    let system = FakeSystem::default()
        .mount(scratch.root(), "/dev/mapper/vg-root")
        .device(BlockDevice::mapped("vg-root", "cryptlvm"))
        .device(BlockDevice::mapped("cryptlvm", "nvme0n1p2"))
        .partuuid("/dev/nvme0n1p2", "ABCD-1234");
    let config = scratch.config();

    let err = Pipeline::new(&config, &system, &system).run().unwrap_err();
    assert_eq!(err.stage, Stage::ResolveRoot);
    assert!(!scratch.boot().join("limine/limine.conf").exists());
}

#[test]
fn rerun_is_idempotent() {
    let scratch = Scratch::new();
    let entries = scratch.boot().join("loader/entries");
    fs::create_dir_all(&entries).unwrap();
    fs::write(entries.join("arch.conf"), ENTRY).unwrap();
    let system = luks_system(&scratch);
    let mut config = scratch.config();
    config.entry_match = Some("arch".into());

    let first = Pipeline::new(&config, &system, &system).run().expect("first run");
    assert_eq!(first.changes[0].status, Status::Written);
    let after_first = scratch.boot_files();

    let second = Pipeline::new(&config, &system, &system).run().expect("second run");
    assert_eq!(second.changes[0].status, Status::Unchanged);
    assert_eq!(scratch.boot_files(), after_first);
}

/// A backend whose mount lookup never answers in time
struct Hung;

impl BlockDeviceQuery for Hung {
    fn mount_source(&self, _: &Path) -> Result<PathBuf, QueryError> {
        Err(QueryError::Timeout {
            program: "findmnt".into(),
            timeout: Duration::from_millis(100),
        })
    }

    fn parent_of(&self, _: &str) -> Result<Option<String>, QueryError> {
        Ok(None)
    }
}

impl PartitionIdentifierReader for Hung {
    fn partuuid(&self, _: &Path) -> Result<String, QueryError> {
        Ok(String::new())
    }
}

#[test]
fn query_timeout_aborts_untouched() {
    let scratch = Scratch::new();
    fs::create_dir_all(scratch.boot().join("loader/entries")).unwrap();
    fs::write(scratch.boot().join("loader/entries/arch.conf"), ENTRY).unwrap();
    let before = scratch.boot_files();
    let config = scratch.config();

    let err = Pipeline::new(&config, &Hung, &Hung).run().unwrap_err();
    assert_eq!(err.stage, Stage::ResolveRoot);
    assert!(matches!(
        err.source,
        Error::QueryTimeout { ref program, timeout } if program == "findmnt" && timeout == Duration::from_millis(100)
    ));
    assert_eq!(scratch.boot_files(), before);
}
