// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory transform device and display surface.
//!
//! [`SimDevice`] keeps the channel state a driver would keep and refuses
//! the calls the driver would refuse: binding buffers to a channel that
//! was never initialised, releasing an enabled channel, enabling twice.
//! A completion interrupt fires on every wait while it is registered and
//! its channel is enabled, unless a timeout was injected. Every call is
//! recorded so tests can check ordering.
//!
//! Both types are cheap handles onto shared state; clones observe the
//! same device.

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{
    device::{
        BufferMap, BufferParams, BufferRole, ChannelParams, Irq, MemBlock, OffsetParams,
        PhysAddr, TransformDevice, WaitStatus,
    },
    display::{Blank, DisplayChannel, DisplaySurface, FixInfo, VarInfo},
    resource::{Slot, SlotSet},
};

const MEMORY_BASE: PhysAddr = 0x1000_0000;
const DISPLAY_BASE: PhysAddr = 0x9000_0000;

/// A recorded device call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Alloc(usize),
    Free(PhysAddr),
    InitChannel(Slot, Option<ChannelParams>),
    UninitChannel(Slot),
    InitBuffer(Slot, BufferRole, BufferParams),
    UpdateBuffer(Slot, BufferRole, usize, PhysAddr),
    UpdateOffset(Slot, BufferRole, OffsetParams),
    SelectBuffer(Slot, BufferRole, usize),
    Enable(Slot),
    Disable(Slot),
    Link(Slot, Slot),
    Unlink(Slot, Slot),
    RegisterIrq(Irq),
    ClearIrq(Irq),
    FreeIrq(Irq),
    /// Interrupt wait and the timeout it was bounded by.
    Wait(Irq, Duration),
}

struct State {
    calls: Vec<Call>,
    busy: SlotSet,
    initialized: SlotSet,
    enabled: SlotSet,
    linked: Vec<(Slot, Slot)>,
    registered: HashSet<Irq>,
    failing: HashSet<&'static str>,
    timeouts: usize,
    stalled: bool,
    next_paddr: PhysAddr,
    live: HashMap<PhysAddr, usize>,
    frees: usize,
    alloc_limit: Option<usize>,
}

impl State {
    fn check(&self, op: &'static str) -> io::Result<()> {
        if self.failing.contains(op) {
            return Err(io::Error::other(format!("simulated {op} failure")));
        }
        Ok(())
    }

    fn require_initialized(&self, slot: Slot) -> io::Result<()> {
        if !self.initialized.contains(slot) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{slot:?} is not initialized"),
            ));
        }
        Ok(())
    }
}

/// Simulated IPU.
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<State>>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    pub fn new() -> Self {
        SimDevice {
            state: Arc::new(Mutex::new(State {
                calls: Vec::new(),
                busy: SlotSet::EMPTY,
                initialized: SlotSet::EMPTY,
                enabled: SlotSet::EMPTY,
                linked: Vec::new(),
                registered: HashSet::new(),
                failing: HashSet::new(),
                timeouts: 0,
                stalled: false,
                next_paddr: MEMORY_BASE,
                live: HashMap::new(),
                frees: 0,
                alloc_limit: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reports `slot` as enabled by another process.
    pub fn set_busy(&self, slot: Slot, busy: bool) {
        let mut state = self.state();
        state.busy = if busy {
            state.busy.with(slot)
        } else {
            state.busy.difference(SlotSet::single(slot))
        };
    }

    /// Makes every later call of `op` fail. Operations are named after the
    /// [`TransformDevice`] methods, e.g. `"init_buffer"`.
    pub fn fail_on(&self, op: &'static str) {
        self.state().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    /// Lets the next `count` waits time out.
    pub fn time_out_next(&self, count: usize) {
        self.state().timeouts = count;
    }

    /// While stalled no interrupt fires.
    pub fn stall(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// Fails allocations once `count` blocks are live.
    pub fn limit_allocations(&self, count: usize) {
        self.state().alloc_limit = Some(count);
    }

    pub fn live_allocations(&self) -> usize {
        self.state().live.len()
    }

    pub fn frees(&self) -> usize {
        self.state().frees
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn initialized(&self) -> SlotSet {
        self.state().initialized
    }

    pub fn enabled(&self) -> SlotSet {
        self.state().enabled
    }

    pub fn linked(&self) -> Vec<(Slot, Slot)> {
        self.state().linked.clone()
    }

    pub fn registered(&self) -> Vec<Irq> {
        self.state().registered.iter().copied().collect()
    }
}

/// Zeroed memory standing in for a mapped device buffer.
pub struct SimMap(Vec<u8>);

impl BufferMap for SimMap {
    fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl TransformDevice for SimDevice {
    type Map = SimMap;

    fn alloc(&self, size: usize) -> io::Result<MemBlock> {
        let mut state = self.state();
        state.check("alloc")?;
        if state.alloc_limit.is_some_and(|limit| state.live.len() >= limit) {
            return Err(io::Error::from(io::ErrorKind::OutOfMemory));
        }
        let paddr = state.next_paddr;
        let span = PhysAddr::try_from(size.max(1).next_multiple_of(4096))
            .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
        state.next_paddr += span;
        state.live.insert(paddr, size);
        state.calls.push(Call::Alloc(size));
        Ok(MemBlock {
            paddr,
            size,
            token: paddr as usize,
        })
    }

    fn free(&self, block: MemBlock) -> io::Result<()> {
        let mut state = self.state();
        state.check("free")?;
        state.calls.push(Call::Free(block.paddr));
        match state.live.remove(&block.paddr) {
            Some(_) => {
                state.frees += 1;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("double free of {:#x}", block.paddr),
            )),
        }
    }

    fn map(&self, block: &MemBlock) -> io::Result<SimMap> {
        let state = self.state();
        state.check("map")?;
        if !state.live.contains_key(&block.paddr) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(SimMap(vec![0; block.size]))
    }

    fn init_channel(&self, slot: Slot, params: Option<&ChannelParams>) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::InitChannel(slot, params.copied()));
        state.check("init_channel")?;
        if state.initialized.contains(slot) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        state.initialized = state.initialized.with(slot);
        Ok(())
    }

    fn uninit_channel(&self, slot: Slot) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::UninitChannel(slot));
        state.check("uninit_channel")?;
        state.require_initialized(slot)?;
        if state.enabled.contains(slot) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{slot:?} is still enabled"),
            ));
        }
        state.initialized = state.initialized.difference(SlotSet::single(slot));
        Ok(())
    }

    fn init_buffer(&self, slot: Slot, role: BufferRole, params: &BufferParams) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::InitBuffer(slot, role, *params));
        state.check("init_buffer")?;
        state.require_initialized(slot)
    }

    fn update_buffer(
        &self,
        slot: Slot,
        role: BufferRole,
        index: usize,
        addr: PhysAddr,
    ) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::UpdateBuffer(slot, role, index, addr));
        state.check("update_buffer")?;
        state.require_initialized(slot)
    }

    fn update_offset(
        &self,
        slot: Slot,
        role: BufferRole,
        params: &OffsetParams,
    ) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::UpdateOffset(slot, role, *params));
        state.check("update_offset")?;
        state.require_initialized(slot)
    }

    fn select_buffer(&self, slot: Slot, role: BufferRole, index: usize) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::SelectBuffer(slot, role, index));
        state.check("select_buffer")?;
        state.require_initialized(slot)
    }

    fn enable_channel(&self, slot: Slot) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Enable(slot));
        state.check("enable_channel")?;
        state.require_initialized(slot)?;
        if state.enabled.contains(slot) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        state.enabled = state.enabled.with(slot);
        Ok(())
    }

    fn disable_channel(&self, slot: Slot) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Disable(slot));
        state.check("disable_channel")?;
        state.enabled = state.enabled.difference(SlotSet::single(slot));
        Ok(())
    }

    fn link(&self, src: Slot, dst: Slot) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Link(src, dst));
        state.check("link")?;
        state.require_initialized(src)?;
        state.require_initialized(dst)?;
        state.linked.push((src, dst));
        Ok(())
    }

    fn unlink(&self, src: Slot, dst: Slot) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Unlink(src, dst));
        state.check("unlink")?;
        let before = state.linked.len();
        state.linked.retain(|link| *link != (src, dst));
        if state.linked.len() == before {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(())
    }

    fn is_busy(&self, slot: Slot) -> io::Result<bool> {
        let state = self.state();
        state.check("is_busy")?;
        Ok(state.busy.contains(slot) || state.enabled.contains(slot))
    }

    fn register_irq(&self, irq: Irq) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::RegisterIrq(irq));
        state.check("register_irq")?;
        state.registered.insert(irq);
        Ok(())
    }

    fn clear_irq(&self, irq: Irq) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::ClearIrq(irq));
        state.check("clear_irq")
    }

    fn free_irq(&self, irq: Irq) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::FreeIrq(irq));
        state.check("free_irq")?;
        if !state.registered.remove(&irq) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(())
    }

    fn wait_irq(&self, irq: Irq, timeout: Duration) -> io::Result<WaitStatus> {
        let mut state = self.state();
        state.calls.push(Call::Wait(irq, timeout));
        state.check("wait_irq")?;
        if state.timeouts > 0 {
            state.timeouts -= 1;
            return Ok(WaitStatus::TimedOut);
        }
        let fires = !state.stalled
            && state.registered.contains(&irq)
            && state.enabled.contains(irq.slot());
        Ok(if fires {
            WaitStatus::Completed
        } else {
            WaitStatus::TimedOut
        })
    }
}

/// A recorded display call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayCall {
    SetVar(VarInfo, bool),
    OverlayPos(u16, u16),
    Pan(u32),
    Blank(Blank),
    Copy { from: usize, to: usize, len: usize },
}

struct DisplayState {
    var: VarInfo,
    smem_start: PhysAddr,
    channel: Option<DisplayChannel>,
    calls: Vec<DisplayCall>,
}

/// Simulated framebuffer.
#[derive(Clone)]
pub struct SimDisplay {
    state: Arc<Mutex<DisplayState>>,
}

impl SimDisplay {
    /// A single-page `xres` x `yres` screen. `channel` of `None` makes the
    /// plane query fail.
    pub fn new(xres: u32, yres: u32, bits_per_pixel: u32, channel: Option<DisplayChannel>) -> Self {
        SimDisplay {
            state: Arc::new(Mutex::new(DisplayState {
                var: VarInfo {
                    xres,
                    yres,
                    xres_virtual: xres,
                    yres_virtual: yres,
                    yoffset: 0,
                    bits_per_pixel,
                    nonstd: 0,
                },
                smem_start: DISPLAY_BASE,
                channel,
                calls: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, DisplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<DisplayCall> {
        self.state().calls.clone()
    }

    pub fn var(&self) -> VarInfo {
        self.state().var
    }

    /// Every y offset panned to, in order.
    pub fn pans(&self) -> Vec<u32> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                DisplayCall::Pan(y) => Some(*y),
                _ => None,
            })
            .collect()
    }
}

impl DisplaySurface for SimDisplay {
    fn var_info(&self) -> io::Result<VarInfo> {
        Ok(self.state().var)
    }

    fn set_var_info(&self, var: &VarInfo, force: bool) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(DisplayCall::SetVar(*var, force));
        state.var = *var;
        Ok(())
    }

    fn fix_info(&self) -> io::Result<FixInfo> {
        let state = self.state();
        Ok(FixInfo {
            smem_start: state.smem_start,
            line_length: state.var.xres_virtual * state.var.bits_per_pixel / 8,
        })
    }

    fn channel(&self) -> io::Result<DisplayChannel> {
        self.state()
            .channel
            .ok_or_else(|| io::Error::from(io::ErrorKind::Unsupported))
    }

    fn set_overlay_pos(&self, x: u16, y: u16) -> io::Result<()> {
        self.state().calls.push(DisplayCall::OverlayPos(x, y));
        Ok(())
    }

    fn pan(&self, yoffset: u32) -> io::Result<()> {
        let mut state = self.state();
        if yoffset + state.var.yres > state.var.yres_virtual {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        state.var.yoffset = yoffset;
        state.calls.push(DisplayCall::Pan(yoffset));
        Ok(())
    }

    fn blank(&self, blank: Blank) -> io::Result<()> {
        self.state().calls.push(DisplayCall::Blank(blank));
        Ok(())
    }

    fn copy_page(&self, from: usize, to: usize, len: usize) -> io::Result<()> {
        self.state().calls.push(DisplayCall::Copy { from, to, len });
        Ok(())
    }
}
