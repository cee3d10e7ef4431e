// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Logical resource slots of the IPU and the process-wide record of which
//! ones are claimed.

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Convert,
    Rotate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Path {
    Encode,
    Viewfinder,
    PostProcess,
}

/// One engine reached through one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    ConvertEncode,
    ConvertViewfinder,
    ConvertPostProcess,
    RotateEncode,
    RotateViewfinder,
    RotatePostProcess,
}

impl Slot {
    pub const ALL: [Slot; 6] = [
        Slot::ConvertEncode,
        Slot::ConvertViewfinder,
        Slot::ConvertPostProcess,
        Slot::RotateEncode,
        Slot::RotateViewfinder,
        Slot::RotatePostProcess,
    ];

    pub const fn new(engine: Engine, path: Path) -> Self {
        match (engine, path) {
            (Engine::Convert, Path::Encode) => Slot::ConvertEncode,
            (Engine::Convert, Path::Viewfinder) => Slot::ConvertViewfinder,
            (Engine::Convert, Path::PostProcess) => Slot::ConvertPostProcess,
            (Engine::Rotate, Path::Encode) => Slot::RotateEncode,
            (Engine::Rotate, Path::Viewfinder) => Slot::RotateViewfinder,
            (Engine::Rotate, Path::PostProcess) => Slot::RotatePostProcess,
        }
    }

    pub const fn engine(self) -> Engine {
        match self {
            Slot::ConvertEncode | Slot::ConvertViewfinder | Slot::ConvertPostProcess => {
                Engine::Convert
            }
            _ => Engine::Rotate,
        }
    }

    pub const fn path(self) -> Path {
        match self {
            Slot::ConvertEncode | Slot::RotateEncode => Path::Encode,
            Slot::ConvertViewfinder | Slot::RotateViewfinder => Path::Viewfinder,
            Slot::ConvertPostProcess | Slot::RotatePostProcess => Path::PostProcess,
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of slots, stored as a bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SlotSet(u8);

impl SlotSet {
    pub const EMPTY: SlotSet = SlotSet(0);

    pub const fn single(slot: Slot) -> Self {
        SlotSet(slot.bit())
    }

    pub const fn with(self, slot: Slot) -> Self {
        SlotSet(self.0 | slot.bit())
    }

    pub const fn contains(self, slot: Slot) -> bool {
        self.0 & slot.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(self, other: SlotSet) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: SlotSet) -> Self {
        SlotSet(self.0 | other.0)
    }

    pub const fn difference(self, other: SlotSet) -> Self {
        SlotSet(self.0 & !other.0)
    }

    /// Whether claiming `wanted` while `self` is held would collide.
    ///
    /// The encode and viewfinder paths share the convert engine's input
    /// stage, so their convert slots exclude each other.
    pub fn conflicts_with(self, wanted: SlotSet) -> bool {
        let enc = Slot::ConvertEncode;
        let vf = Slot::ConvertViewfinder;
        self.intersects(wanted)
            || (self.contains(enc) && wanted.contains(vf))
            || (self.contains(vf) && wanted.contains(enc))
    }

    pub fn iter(self) -> impl Iterator<Item = Slot> {
        Slot::ALL.into_iter().filter(move |s| self.contains(*s))
    }

    fn prp(self) -> SlotSet {
        self.difference(PP_SLOTS)
    }

    fn pp(self) -> SlotSet {
        SlotSet(self.0 & PP_SLOTS.0)
    }
}

const PP_SLOTS: SlotSet = SlotSet::single(Slot::ConvertPostProcess).with(Slot::RotatePostProcess);

impl FromIterator<Slot> for SlotSet {
    fn from_iter<I: IntoIterator<Item = Slot>>(iter: I) -> Self {
        iter.into_iter().fold(SlotSet::EMPTY, SlotSet::with)
    }
}

impl fmt::Debug for SlotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Paths a caller is willing to use. The empty set means no preference.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PathSet(u8);

impl PathSet {
    pub const ANY: PathSet = PathSet(0);

    const fn bit(path: Path) -> u8 {
        match path {
            Path::Encode => 1,
            Path::Viewfinder => 2,
            Path::PostProcess => 4,
        }
    }

    pub const fn only(path: Path) -> Self {
        PathSet(Self::bit(path))
    }

    pub const fn with(self, path: Path) -> Self {
        PathSet(self.0 | Self::bit(path))
    }

    pub const fn contains(self, path: Path) -> bool {
        self.0 & Self::bit(path) != 0
    }

    pub const fn is_any(self) -> bool {
        self.0 == 0
    }

    /// True when `path` may be searched under this preference.
    pub const fn allows(self, path: Path) -> bool {
        self.is_any() || self.contains(path)
    }
}

impl FromIterator<Path> for PathSet {
    fn from_iter<I: IntoIterator<Item = Path>>(iter: I) -> Self {
        iter.into_iter().fold(PathSet::ANY, PathSet::with)
    }
}

impl fmt::Debug for PathSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("Any");
        }
        f.debug_set()
            .entries(
                [Path::Encode, Path::Viewfinder, Path::PostProcess]
                    .into_iter()
                    .filter(|p| self.contains(*p)),
            )
            .finish()
    }
}

/// Record of slots claimed by live tasks of this process.
///
/// The encode/viewfinder slots and the post-process slots are guarded by
/// separate locks, mirroring the hardware split between the pre-processor
/// and the post-processor. A claim touching both takes them in that order.
#[derive(Debug, Default)]
pub struct Registry {
    prp: Mutex<SlotSet>,
    pp: Mutex<SlotSet>,
}

fn lock(m: &Mutex<SlotSet>) -> MutexGuard<'_, SlotSet> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The registry shared by every task of the process.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new).clone()
    }

    pub fn claimed(&self) -> SlotSet {
        let prp = *lock(&self.prp);
        let pp = *lock(&self.pp);
        prp.union(pp)
    }

    /// Claims `wanted` unless it collides with a live claim or `hw_busy`
    /// reports one of its slots active in hardware.
    ///
    /// The hardware query happens under the registry locks, which serialises
    /// claims inside this process only. Another process may still observe
    /// the same slot free between this check and its configuration.
    pub fn try_claim(
        self: &Arc<Self>,
        wanted: SlotSet,
        hw_busy: impl Fn(Slot) -> bool,
    ) -> Option<Claim> {
        let mut prp = (!wanted.prp().is_empty()).then(|| lock(&self.prp));
        let mut pp = (!wanted.pp().is_empty()).then(|| lock(&self.pp));

        if prp.as_ref().is_some_and(|g| g.conflicts_with(wanted.prp()))
            || pp.as_ref().is_some_and(|g| g.conflicts_with(wanted.pp()))
        {
            debug!("{wanted:?} already claimed in process");
            return None;
        }

        if let Some(slot) = wanted.iter().find(|s| hw_busy(*s)) {
            debug!("{slot:?} busy in hardware");
            return None;
        }

        if let Some(g) = prp.as_mut() {
            **g = g.union(wanted.prp());
        }
        if let Some(g) = pp.as_mut() {
            **g = g.union(wanted.pp());
        }

        Some(Claim {
            registry: Arc::clone(self),
            slots: wanted,
        })
    }

    fn release(&self, slots: SlotSet) {
        if !slots.prp().is_empty() {
            let mut g = lock(&self.prp);
            *g = g.difference(slots);
        }
        if !slots.pp().is_empty() {
            let mut g = lock(&self.pp);
            *g = g.difference(slots);
        }
    }
}

/// Slots held by one task. Dropping the claim returns them to the registry.
pub struct Claim {
    registry: Arc<Registry>,
    slots: SlotSet,
}

impl Claim {
    pub fn slots(&self) -> SlotSet {
        self.slots
    }
}

impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Claim").field(&self.slots).finish()
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.registry.release(self.slots);
        debug!("released {:?}", self.slots);
    }
}
