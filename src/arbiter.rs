// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Selection of the resource slots a task runs on.
//!
//! Paths are searched in a fixed order, encode first, then post-process,
//! then viewfinder. A slot set is free when no live task of this process
//! holds a conflicting slot and the driver does not report any of its
//! channels enabled. With a path preference only the first preferred path
//! that the request can use is searched, and the claim fails rather than
//! falling back to a path the caller did not ask for.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    device::TransformDevice,
    error::{Error, Result},
    resource::{Claim, Engine, Path, PathSet, Registry, Slot, SlotSet},
};

/// Engines a task needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskMode {
    /// No transform, the DMA engine only moves bytes.
    Copy,
    Convert,
    Rotate,
    /// Convert engine feeding the rotate engine.
    Chained,
}

impl TaskMode {
    pub fn from_needs(convert: bool, rotate: bool) -> Self {
        match (convert, rotate) {
            (false, false) => TaskMode::Copy,
            (true, false) => TaskMode::Convert,
            (false, true) => TaskMode::Rotate,
            (true, true) => TaskMode::Chained,
        }
    }

    fn slots(self, path: Path) -> SlotSet {
        let convert = Slot::new(Engine::Convert, path);
        let rotate = Slot::new(Engine::Rotate, path);
        match self {
            TaskMode::Convert => SlotSet::single(convert),
            TaskMode::Rotate => SlotSet::single(rotate),
            TaskMode::Chained => SlotSet::single(convert).with(rotate),
            // Raw copies pick single slots from their own table.
            TaskMode::Copy => SlotSet::EMPTY,
        }
    }
}

/// What the arbiter needs to know about a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub mode: TaskMode,
    pub overlay: bool,
    pub split: bool,
    pub preference: PathSet,
}

impl Request {
    /// Candidate slot sets grouped by path, in search order.
    fn stages(&self) -> Vec<(Path, Vec<SlotSet>)> {
        let one = SlotSet::single;
        match self.mode {
            TaskMode::Copy if self.split => vec![
                (Path::Encode, vec![one(Slot::ConvertEncode)]),
                (Path::PostProcess, vec![one(Slot::ConvertPostProcess)]),
            ],
            TaskMode::Copy => vec![
                (
                    Path::Encode,
                    vec![one(Slot::ConvertEncode), one(Slot::RotateEncode)],
                ),
                (
                    Path::PostProcess,
                    vec![one(Slot::ConvertPostProcess), one(Slot::RotatePostProcess)],
                ),
                (Path::Viewfinder, vec![one(Slot::RotateViewfinder)]),
            ],
            mode => [Path::Encode, Path::PostProcess, Path::Viewfinder]
                .into_iter()
                // Only the post-processor combines overlays.
                .filter(|p| !self.overlay || *p == Path::PostProcess)
                .map(|p| (p, vec![mode.slots(p)]))
                .collect(),
        }
    }
}

/// Claims resource slots from a [`Registry`].
#[derive(Debug, Clone)]
pub struct Arbiter {
    registry: Arc<Registry>,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::global()
    }
}

impl Arbiter {
    pub fn new(registry: Arc<Registry>) -> Self {
        Arbiter { registry }
    }

    /// Arbiter over the process-wide registry.
    pub fn global() -> Self {
        Self::new(Registry::global())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Claims the first free slot set for `request`.
    ///
    /// Returns [`Error::Busy`] when every acceptable path is occupied. A
    /// driver error while querying busy state counts as occupied.
    pub fn claim<D: TransformDevice>(&self, request: &Request, device: &D) -> Result<Claim> {
        let hw_busy = |slot: Slot| {
            device.is_busy(slot).unwrap_or_else(|e| {
                warn!("busy query for {slot:?} failed: {e}");
                true
            })
        };

        for (path, candidates) in request.stages() {
            if !request.preference.allows(path) {
                continue;
            }

            for slots in candidates {
                if let Some(claim) = self.registry.try_claim(slots, &hw_busy) {
                    info!("{:?} task takes {:?}", request.mode, claim.slots());
                    return Ok(claim);
                }
            }

            if !request.preference.is_any() {
                debug!("preferred {path:?} path busy");
                break;
            }
        }

        Err(Error::Busy {
            preference: request.preference,
        })
    }
}
