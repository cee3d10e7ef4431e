// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The transform device seen by a task.
//!
//! [`TransformDevice`] is the complete set of operations a task needs from
//! the IPU driver. [`crate::hw::IpuDevice`] implements it over
//! `/dev/mxc_ipu`; [`crate::sim::SimDevice`] implements it in memory.

use std::{io, time::Duration};

use ipu_sys::{
    IPU_IRQ_PP_IN_EOF, IPU_IRQ_PP_OUT_EOF, IPU_IRQ_PP_ROT_IN_EOF, IPU_IRQ_PP_ROT_OUT_EOF,
    IPU_IRQ_PRP_ENC_OUT_EOF, IPU_IRQ_PRP_ENC_ROT_IN_EOF, IPU_IRQ_PRP_ENC_ROT_OUT_EOF,
    IPU_IRQ_PRP_IN_EOF, IPU_IRQ_PRP_VF_OUT_EOF, IPU_IRQ_PRP_VF_ROT_IN_EOF,
    IPU_IRQ_PRP_VF_ROT_OUT_EOF,
};

use crate::{format::FourCC, geometry::Rotation, resource::Slot};

/// Physical (bus) address as programmed into the IDMAC.
pub type PhysAddr = u32;

/// Buffer attached to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Input,
    /// Overlay graphics combined by the convert engine.
    Graphics,
    /// Per-pixel overlay alpha plane.
    Alpha,
    Output,
}

/// End-of-frame interrupt of a slot's input or output DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Irq {
    InEof(Slot),
    OutEof(Slot),
}

impl Irq {
    pub fn slot(self) -> Slot {
        match self {
            Irq::InEof(slot) | Irq::OutEof(slot) => slot,
        }
    }

    /// Interrupt line number in the driver's numbering.
    pub fn number(self) -> u32 {
        match self {
            Irq::InEof(Slot::ConvertEncode | Slot::ConvertViewfinder) => IPU_IRQ_PRP_IN_EOF,
            Irq::InEof(Slot::ConvertPostProcess) => IPU_IRQ_PP_IN_EOF,
            Irq::InEof(Slot::RotateEncode) => IPU_IRQ_PRP_ENC_ROT_IN_EOF,
            Irq::InEof(Slot::RotateViewfinder) => IPU_IRQ_PRP_VF_ROT_IN_EOF,
            Irq::InEof(Slot::RotatePostProcess) => IPU_IRQ_PP_ROT_IN_EOF,
            Irq::OutEof(Slot::ConvertEncode) => IPU_IRQ_PRP_ENC_OUT_EOF,
            Irq::OutEof(Slot::ConvertViewfinder) => IPU_IRQ_PRP_VF_OUT_EOF,
            Irq::OutEof(Slot::ConvertPostProcess) => IPU_IRQ_PP_OUT_EOF,
            Irq::OutEof(Slot::RotateEncode) => IPU_IRQ_PRP_ENC_ROT_OUT_EOF,
            Irq::OutEof(Slot::RotateViewfinder) => IPU_IRQ_PRP_VF_ROT_OUT_EOF,
            Irq::OutEof(Slot::RotatePostProcess) => IPU_IRQ_PP_ROT_OUT_EOF,
        }
    }
}

/// Overlay alpha source of a combining convert channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendAlpha {
    Global(u8),
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blend {
    pub format: FourCC,
    pub alpha: BlendAlpha,
    pub key_color: Option<u32>,
}

/// Task parameters of a convert channel. Rotation channels take none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelParams {
    pub in_width: u32,
    pub in_height: u32,
    pub in_format: FourCC,
    pub out_width: u32,
    pub out_height: u32,
    pub out_format: FourCC,
    /// Fixed horizontal resize ratio, only set for split-mode stripes.
    pub resize_ratio: Option<u64>,
    pub overlay: Option<Blend>,
}

/// Double-buffer binding of one channel buffer role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferParams {
    pub format: FourCC,
    pub width: u32,
    pub height: u32,
    /// Line length in bytes.
    pub stride: u32,
    pub rotation: Rotation,
    pub primary: PhysAddr,
    /// Second buffer slot. `None` binds the role single-buffered.
    pub secondary: Option<PhysAddr>,
    pub u_offset: u32,
    pub v_offset: u32,
}

/// Window offsets applied to an already bound buffer, used by split mode
/// to move each stripe's planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetParams {
    pub format: FourCC,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub u_offset: u32,
    pub v_offset: u32,
    pub vertical: u32,
    pub horizontal: u32,
}

/// Physically contiguous memory owned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemBlock {
    pub paddr: PhysAddr,
    pub size: usize,
    /// Driver bookkeeping returned by the allocator and handed back on free.
    pub token: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Completed,
    TimedOut,
}

/// CPU view of a device buffer. Unmapped when dropped.
pub trait BufferMap: Send {
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];
}

pub trait TransformDevice {
    type Map: BufferMap;

    fn alloc(&self, size: usize) -> io::Result<MemBlock>;
    fn free(&self, block: MemBlock) -> io::Result<()>;
    fn map(&self, block: &MemBlock) -> io::Result<Self::Map>;

    fn init_channel(&self, slot: Slot, params: Option<&ChannelParams>) -> io::Result<()>;
    fn uninit_channel(&self, slot: Slot) -> io::Result<()>;

    fn init_buffer(&self, slot: Slot, role: BufferRole, params: &BufferParams)
        -> io::Result<()>;
    fn update_buffer(
        &self,
        slot: Slot,
        role: BufferRole,
        index: usize,
        addr: PhysAddr,
    ) -> io::Result<()>;
    fn update_offset(&self, slot: Slot, role: BufferRole, params: &OffsetParams)
        -> io::Result<()>;
    /// Marks buffer `index` of `role` ready for the hardware.
    fn select_buffer(&self, slot: Slot, role: BufferRole, index: usize) -> io::Result<()>;

    fn enable_channel(&self, slot: Slot) -> io::Result<()>;
    fn disable_channel(&self, slot: Slot) -> io::Result<()>;

    fn link(&self, src: Slot, dst: Slot) -> io::Result<()>;
    fn unlink(&self, src: Slot, dst: Slot) -> io::Result<()>;

    /// Whether the channel behind `slot` is enabled by anyone, including
    /// other processes.
    fn is_busy(&self, slot: Slot) -> io::Result<bool>;

    fn register_irq(&self, irq: Irq) -> io::Result<()>;
    fn clear_irq(&self, irq: Irq) -> io::Result<()>;
    fn free_irq(&self, irq: Irq) -> io::Result<()>;
    /// Blocks until `irq` fires or `timeout` passes.
    fn wait_irq(&self, irq: Irq, timeout: Duration) -> io::Result<WaitStatus>;
}
