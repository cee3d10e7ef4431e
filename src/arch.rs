// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::fs;
use tracing::{debug, warn};

use crate::geometry::Rotation;

const MX37: u32 = 0x37000;

/// Limits of the IPU revision found on the running SoC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Architecture {
    /// First rotation mode that needs the rotation engine. Modes below it
    /// are performed as flips inside the convert engine.
    pub rotate_begin: Rotation,
    /// Widest output the convert engine writes in one pass.
    pub max_convert_width: u32,
}

impl Default for Architecture {
    fn default() -> Self {
        Architecture {
            rotate_begin: Rotation::Rotate90Right,
            max_convert_width: 1024,
        }
    }
}

impl Architecture {
    /// Reads the SoC revision from `/proc/cpuinfo`, falling back to the
    /// i.MX5x defaults when it is unavailable.
    pub fn detect() -> Self {
        match fs::read_to_string("/proc/cpuinfo") {
            Ok(info) => Self::from_cpuinfo(&info),
            Err(e) => {
                warn!("cannot read /proc/cpuinfo: {e}, using default IPU limits");
                Self::default()
            }
        }
    }

    pub fn from_cpuinfo(info: &str) -> Self {
        let revision = info
            .lines()
            .filter(|l| l.starts_with("Revision"))
            .filter_map(|l| l.split_once(':'))
            .find_map(|(_, v)| u32::from_str_radix(v.trim(), 16).ok());

        let Some(revision) = revision else {
            debug!("no Revision in cpuinfo, using default IPU limits");
            return Self::default();
        };

        let arch = Self::from_revision(revision);
        debug!("system revision {revision:#x}: {arch:?}");
        arch
    }

    pub fn from_revision(revision: u32) -> Self {
        match revision & 0xff000 {
            MX37 => Architecture {
                rotate_begin: Rotation::HFlip,
                ..Default::default()
            },
            _ => Self::default(),
        }
    }
}
