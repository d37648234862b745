// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! util-linux backed queries (`findmnt`, `lsblk`, `blkid`)
//!
//! These may need privileges and can block on misbehaving hardware, so every
//! invocation is bounded by a timeout.

use std::{
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    thread,
    time::Duration,
};

use wait_timeout::ChildExt;

use super::{device::TopologyTable, BlockDeviceQuery, Error, PartitionIdentifierReader};

/// Default bound for a single query
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Query backend shelling out to util-linux
#[derive(Debug, Clone)]
pub struct CommandQuery {
    timeout: Duration,
}

impl Default for CommandQuery {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl CommandQuery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Full topology table from `lsblk`
    pub fn topology(&self) -> Result<TopologyTable, Error> {
        let stdout = self.stdout("lsblk", &["--json", "--list", "-o", "NAME,KNAME,PKNAME,TYPE,PATH"])?;
        TopologyTable::from_lsblk_json(&stdout).map_err(|e| Error::Malformed {
            program: "lsblk",
            reason: e.to_string(),
        })
    }

    /// Run `program`, failing on non-zero exit
    fn stdout(&self, program: &str, args: &[&str]) -> Result<String, Error> {
        let output = run(program, args, self.timeout)?;
        if !output.status.success() {
            return Err(failed(program, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl BlockDeviceQuery for CommandQuery {
    fn mount_source(&self, mountpoint: &Path) -> Result<PathBuf, Error> {
        let mountpoint_arg = mountpoint.to_string_lossy();
        let output = run(
            "findmnt",
            &["--noheadings", "--output", "SOURCE", "--mountpoint", &mountpoint_arg],
            self.timeout,
        )?;
        // findmnt exits 1 when nothing matched
        if output.status.code() == Some(1) {
            return Err(Error::UnknownMount(mountpoint.to_path_buf()));
        }
        if !output.status.success() {
            return Err(failed("findmnt", &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let source = stdout
            .lines()
            .last()
            .map(strip_subvolume)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::UnknownMount(mountpoint.to_path_buf()))?;
        Ok(PathBuf::from(source))
    }

    fn parent_of(&self, kernel_name: &str) -> Result<Option<String>, Error> {
        Ok(self.topology()?.parent_of(kernel_name).map(str::to_owned))
    }

    fn is_mapped(&self, kernel_name: &str) -> Result<bool, Error> {
        Ok(self.topology()?.is_mapped(kernel_name))
    }
}

impl PartitionIdentifierReader for CommandQuery {
    fn partuuid(&self, device: &Path) -> Result<String, Error> {
        let device_arg = device.to_string_lossy();
        let output = run(
            "blkid",
            &["--match-tag", "PARTUUID", "--output", "value", &device_arg],
            self.timeout,
        )?;
        // blkid exits 2 when the requested tag does not exist
        if output.status.code() == Some(2) {
            return Ok(String::new());
        }
        if !output.status.success() {
            return Err(failed("blkid", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// findmnt reports btrfs subvolumes as `/dev/mapper/root[/@]`
fn strip_subvolume(source: &str) -> &str {
    let source = source.trim();
    match source.find('[') {
        Some(idx) if source.ends_with(']') => &source[..idx],
        _ => source,
    }
}

fn failed(program: &str, output: &Output) -> Error {
    Error::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Spawn `program` and collect its output, killing it after `timeout`
fn run(program: &str, args: &[&str], timeout: Duration) -> Result<Output, Error> {
    log::trace!("running: {program} {}", args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::CommandNotFound(program.to_string()),
            _ => Error::IO(e),
        })?;

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let Some(status) = child.wait_timeout(timeout)? else {
        let _ = child.kill();
        let _ = child.wait();
        let _ = stdout.join();
        let _ = stderr.join();
        return Err(Error::Timeout {
            program: program.to_string(),
            timeout,
        });
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}
