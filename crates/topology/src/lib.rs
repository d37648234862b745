// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Block device topology queries
//!
//! Answers the two questions needed to find the partition behind a root
//! filesystem: which device backs a mountpoint, and which kernel device sits
//! underneath a device-mapper node.

pub mod disk;
