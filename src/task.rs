// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Task setup and teardown.
//!
//! A [`Task`] owns everything it acquires: the resource claim, the
//! channels, internally allocated buffers and the display attachment. A
//! failed [`TaskBuilder::init`] releases whatever it had acquired before
//! returning, and dropping a task tears it down.

use std::time::Duration;
use tracing::{debug, info, info_span, instrument, warn};

use crate::{
    arbiter::{Arbiter, TaskMode},
    arch::Architecture,
    buffer::{Buffer, BufferSet},
    channel::{self, Setup, Shape, Striper},
    device::{BufferMap, Irq, PhysAddr, TransformDevice, WaitStatus},
    display::{DisplaySurface, DisplayTarget, Presenter},
    error::{HardwareContext, Result},
    geometry::{Frame, Rect, Rotation},
    pipeline::{Activation, Indices},
    plan::Plan,
    resource::{Claim, PathSet, SlotSet},
};

/// Buffering of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Operation {
    /// One frame per update, waited for before the update returns.
    #[default]
    Normal,
    /// Double-buffered input and triple-buffered output; each update
    /// returns while the hardware works on the frame it queued.
    Streaming,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mode {
    /// Paths the task may run on. [`PathSet::ANY`] searches them all.
    pub preference: PathSet,
    pub operation: Operation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputParams {
    pub frame: Frame,
    pub crop: Option<Rect>,
    /// Caller-owned physical buffers. Missing ones are allocated.
    pub buffers: [Option<PhysAddr>; 2],
}

/// Alpha source of an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAlpha {
    /// One alpha value for the whole overlay.
    Global(u8),
    /// A per-pixel 8-bit alpha plane with the overlay frame's dimensions.
    Local { buffers: [Option<PhysAddr>; 2] },
}

impl Default for OverlayAlpha {
    fn default() -> Self {
        OverlayAlpha::Global(u8::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayParams {
    pub frame: Frame,
    pub crop: Option<Rect>,
    pub buffers: [Option<PhysAddr>; 2],
    pub alpha: OverlayAlpha,
    /// Overlay colour treated as transparent.
    pub key_color: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputParams {
    pub frame: Frame,
    /// Placement of the output inside `frame`.
    pub window: Option<Rect>,
    pub rotation: Rotation,
    pub buffers: [Option<PhysAddr>; 3],
    /// Present the output on a framebuffer instead of memory.
    pub display: Option<DisplayTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    pub input: InputParams,
    pub overlay: Option<OverlayParams>,
    pub output: OutputParams,
    pub mode: Mode,
    /// Longest wait for one completion interrupt.
    pub frame_timeout: Duration,
    /// Longest wait for the in-flight frame when tearing down.
    pub teardown_timeout: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            input: InputParams::default(),
            overlay: None,
            output: OutputParams::default(),
            mode: Mode::default(),
            frame_timeout: Duration::from_secs(1),
            teardown_timeout: Duration::from_millis(200),
        }
    }
}

/// Collaborators of a task besides the transform device.
pub struct TaskBuilder<D> {
    device: D,
    arbiter: Option<Arbiter>,
    arch: Option<Architecture>,
    display: Option<Box<dyn DisplaySurface>>,
}

impl<D: TransformDevice> TaskBuilder<D> {
    pub fn new(device: D) -> Self {
        TaskBuilder {
            device,
            arbiter: None,
            arch: None,
            display: None,
        }
    }

    /// Claims resources from `arbiter` instead of the process-wide one.
    pub fn with_arbiter(mut self, arbiter: Arbiter) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Uses `arch` instead of detecting the running SoC.
    pub fn with_architecture(mut self, arch: Architecture) -> Self {
        self.arch = Some(arch);
        self
    }

    /// Presents on `surface` instead of opening the target's framebuffer.
    pub fn with_display(mut self, surface: impl DisplaySurface + 'static) -> Self {
        self.display = Some(Box::new(surface));
        self
    }

    #[instrument(skip_all)]
    pub fn init(self, config: &TaskConfig) -> Result<Task<D>> {
        let arch = self.arch.unwrap_or_else(Architecture::detect);
        let plan = Plan::new(config, &arch)?;
        let arbiter = self.arbiter.unwrap_or_default();
        let claim = arbiter.claim(&plan.request(config.mode.preference), &self.device)?;
        let shape = channel::shape_of(claim.slots())?;

        // From here on a failure drops the task, which releases whatever
        // has been acquired so far.
        let mut task = Task {
            device: self.device,
            config: config.clone(),
            irq: shape.completion_irq(),
            plan,
            shape,
            claim: Some(claim),
            buffers: BufferSet::default(),
            presenter: None,
            striper: None,
            configured: false,
            enabled: false,
            activation: Activation::default(),
            indices: Indices::default(),
            input_frames: 0,
            output_frames: 0,
            torn_down: false,
        };

        match (&config.output.display, task.plan.mode) {
            (Some(_), TaskMode::Copy) => warn!("raw copy ignores the display target"),
            (Some(target), _) => {
                let surface = match self.display {
                    Some(surface) => surface,
                    None => Box::new(crate::hw::Framebuffer::open(target.fb).op("open fb")?),
                };
                task.presenter = Some(Presenter::attach(
                    surface,
                    *target,
                    task.plan.output.width,
                    task.plan.output.height,
                    config.output.frame.format,
                    task.plan.streaming,
                )?);
            }
            (None, _) => {}
        }

        task.allocate()?;
        task.configure()?;
        info!(
            mode = ?task.plan.mode,
            slots = ?task.slots(),
            split = task.is_split(),
            "task ready"
        );
        Ok(task)
    }
}

/// A configured transform on claimed IPU resources.
pub struct Task<D: TransformDevice> {
    pub(crate) device: D,
    pub(crate) config: TaskConfig,
    pub(crate) plan: Plan,
    pub(crate) shape: Shape,
    pub(crate) irq: Irq,
    claim: Option<Claim>,
    pub(crate) buffers: BufferSet<D::Map>,
    pub(crate) presenter: Option<Presenter>,
    pub(crate) striper: Option<Striper>,
    configured: bool,
    pub(crate) enabled: bool,
    pub(crate) activation: Activation,
    pub(crate) indices: Indices,
    pub(crate) input_frames: u64,
    pub(crate) output_frames: u64,
    torn_down: bool,
}

impl<D: TransformDevice> Task<D> {
    pub fn builder(device: D) -> TaskBuilder<D> {
        TaskBuilder::new(device)
    }

    /// Sets up a task with the process-wide arbiter and the detected
    /// architecture.
    pub fn init(device: D, config: &TaskConfig) -> Result<Self> {
        TaskBuilder::new(device).init(config)
    }

    fn allocate(&mut self) -> Result<()> {
        let device = &self.device;
        let config = &self.config;
        let plan = &self.plan;
        let buffers = &mut self.buffers;
        let slots = plan.slots();
        let outputs = if plan.streaming { 3 } else { 1 };

        if plan.mode == TaskMode::Copy {
            // Checked by the planner.
            let inputs = buffers.input.iter_mut().zip(config.input.buffers);
            for (slot, addr) in inputs.take(slots) {
                *slot = addr.map(Buffer::external);
            }
            let outs = buffers.output.iter_mut().zip(config.output.buffers);
            for (slot, addr) in outs.take(outputs) {
                *slot = addr.map(Buffer::external);
            }
            return Ok(());
        }

        let frame_size = config.input.frame.size();
        let inputs = buffers.input.iter_mut().zip(config.input.buffers);
        for (slot, addr) in inputs.take(slots) {
            *slot = Some(bind_or_allocate(device, addr, frame_size, true)?);
        }

        if let Some(ov) = &config.overlay {
            let size = ov.frame.size();
            for (slot, addr) in buffers.overlay.iter_mut().zip(ov.buffers).take(slots) {
                *slot = Some(bind_or_allocate(device, addr, size, true)?);
            }
            if let OverlayAlpha::Local { buffers: alpha } = ov.alpha {
                let size = ov.frame.width as usize * ov.frame.height as usize;
                for (slot, addr) in buffers.alpha.iter_mut().zip(alpha).take(slots) {
                    *slot = Some(bind_or_allocate(device, addr, size, true)?);
                }
            }
        }

        if let Shape::Chained { .. } = self.shape {
            let (width, height) = plan.intermediate();
            let size = config.output.frame.format.frame_size(width, height);
            for slot in buffers.rotation.iter_mut().take(slots) {
                *slot = Some(Buffer::allocate(device, size, false)?);
            }
        }

        match &self.presenter {
            Some(presenter) => {
                for (slot, page) in buffers.output.iter_mut().zip(presenter.pages()) {
                    *slot = Some(Buffer::external(page));
                }
            }
            None => {
                let size = config.output.frame.size();
                let outs = buffers.output.iter_mut().zip(config.output.buffers);
                for (slot, addr) in outs.take(outputs) {
                    *slot = Some(bind_or_allocate(device, addr, size, true)?);
                }
            }
        }
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        let output_stride = match &self.presenter {
            Some(presenter) => presenter.stride(),
            None => {
                let frame = &self.config.output.frame;
                frame.width * frame.format.bytes_per_pixel()
            }
        };
        let setup = Setup {
            plan: &self.plan,
            config: &self.config,
            buffers: &self.buffers,
            output_stride,
        };
        channel::configure(&self.device, self.shape, &setup)?;
        self.striper = Striper::new(self.shape.begin(), &setup);
        self.configured = true;
        Ok(())
    }

    /// Tears the task down. Dropping it does the same.
    pub fn uninit(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let _span = info_span!("teardown", irq = ?self.irq).entered();

        if self.configured {
            if self.plan.streaming && self.enabled {
                match self.device.wait_irq(self.irq, self.config.teardown_timeout) {
                    Ok(WaitStatus::Completed) => self.output_frames += 1,
                    Ok(WaitStatus::TimedOut) => {
                        warn!("in-flight frame did not complete, disabling anyway")
                    }
                    Err(e) => warn!("waiting for in-flight frame failed: {e}"),
                }
            }

            if let Some(presenter) = &self.presenter {
                presenter.clear_position();
            }

            for slot in self.shape.end_to_start() {
                for irq in [Irq::InEof(slot), Irq::OutEof(slot)] {
                    if let Err(e) = self.device.clear_irq(irq) {
                        warn!("clearing {irq:?} failed: {e}");
                    }
                }
                if self.enabled {
                    if let Err(e) = self.device.disable_channel(slot) {
                        warn!("disabling {slot:?} failed: {e}");
                    }
                }
            }

            channel::release(&self.device, self.shape);

            if self.enabled {
                if let Err(e) = self.device.free_irq(self.irq) {
                    warn!("freeing {:?} failed: {e}", self.irq);
                }
            }
            self.enabled = false;
            self.configured = false;

            info!(
                input_frames = self.input_frames,
                output_frames = self.output_frames,
                "task finished"
            );
        }

        if let Some(claim) = self.claim.take() {
            debug!("releasing {:?}", claim.slots());
        }
        self.buffers.release(&self.device);
        if let Some(presenter) = self.presenter.take() {
            presenter.detach();
        }
    }

    /// CPU view of input buffer `index`, when the task allocated it.
    pub fn input_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.buffers.input.get_mut(index)?.as_mut()?.as_mut_slice()
    }

    pub fn overlay_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.buffers.overlay.get_mut(index)?.as_mut()?.as_mut_slice()
    }

    pub fn alpha_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.buffers.alpha.get_mut(index)?.as_mut()?.as_mut_slice()
    }

    /// CPU view of output buffer `index`, when the task allocated it.
    pub fn output(&self, index: usize) -> Option<&[u8]> {
        self.buffers.output.get(index)?.as_ref()?.as_slice()
    }

    pub fn input_addr(&self, index: usize) -> PhysAddr {
        self.buffers.input_addr(index)
    }

    pub fn output_addr(&self, index: usize) -> PhysAddr {
        self.buffers.output_addr(index)
    }

    pub fn input_frames(&self) -> u64 {
        self.input_frames
    }

    pub fn output_frames(&self) -> u64 {
        self.output_frames
    }

    pub fn slots(&self) -> SlotSet {
        self.claim.as_ref().map_or(SlotSet::EMPTY, Claim::slots)
    }

    pub fn mode(&self) -> TaskMode {
        self.plan.mode
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn indices(&self) -> Indices {
        self.indices
    }

    pub fn is_split(&self) -> bool {
        self.plan.stripes.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn irq(&self) -> Irq {
        self.irq
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: TransformDevice> Drop for Task<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<D: TransformDevice> std::fmt::Debug for Task<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("mode", &self.plan.mode)
            .field("shape", &self.shape)
            .field("enabled", &self.enabled)
            .field("activation", &self.activation)
            .field("indices", &self.indices)
            .field("presenter", &self.presenter)
            .finish()
    }
}

fn bind_or_allocate<D, M>(
    device: &D,
    addr: Option<PhysAddr>,
    size: usize,
    mapped: bool,
) -> Result<Buffer<M>>
where
    D: TransformDevice<Map = M>,
    M: BufferMap,
{
    match addr {
        Some(addr) => Ok(Buffer::external(addr)),
        None => Buffer::allocate(device, size, mapped),
    }
}
