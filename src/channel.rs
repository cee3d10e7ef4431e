// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Programming of the claimed channels.
//!
//! A task runs on one of three shapes: a single convert channel, a single
//! rotate channel, or a convert channel linked into a rotate channel
//! through an intermediate buffer. [`configure`] sets up every buffer role
//! of the shape and undoes its own work if any step fails.

use tracing::{debug, info, instrument, warn};

use crate::{
    buffer::BufferSet,
    device::{
        Blend, BlendAlpha, BufferParams, BufferRole, ChannelParams, Irq, OffsetParams, PhysAddr,
        TransformDevice,
    },
    error::{Error, HardwareContext, Result},
    geometry::Rotation,
    plan::Plan,
    resource::{Engine, Slot, SlotSet},
    stripe::Stripe,
    task::{OverlayAlpha, TaskConfig},
};

/// Channels a task drives, by data-flow position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Convert(Slot),
    Rotate(Slot),
    Chained { convert: Slot, rotate: Slot },
}

impl Shape {
    /// Shape of a claimed slot set. Raw copies claim a single slot of
    /// either engine and run on it like a transform would.
    pub fn from_slots(slots: SlotSet) -> Option<Self> {
        let mut convert = None;
        let mut rotate = None;
        for slot in slots.iter() {
            match slot.engine() {
                Engine::Convert => convert = convert.or(Some(slot)),
                Engine::Rotate => rotate = rotate.or(Some(slot)),
            }
        }
        match (convert, rotate) {
            (Some(convert), Some(rotate)) => Some(Shape::Chained { convert, rotate }),
            (Some(slot), None) => Some(Shape::Convert(slot)),
            (None, Some(slot)) => Some(Shape::Rotate(slot)),
            (None, None) => None,
        }
    }

    /// Channel that reads the input frame.
    pub fn begin(self) -> Slot {
        match self {
            Shape::Convert(slot) | Shape::Rotate(slot) => slot,
            Shape::Chained { convert, .. } => convert,
        }
    }

    /// Channel that writes the output frame.
    pub fn end(self) -> Slot {
        match self {
            Shape::Convert(slot) | Shape::Rotate(slot) => slot,
            Shape::Chained { rotate, .. } => rotate,
        }
    }

    pub fn convert(self) -> Option<Slot> {
        match self {
            Shape::Convert(slot) => Some(slot),
            Shape::Chained { convert, .. } => Some(convert),
            Shape::Rotate(_) => None,
        }
    }

    /// Channels against the direction of data flow, the order they are
    /// enabled and disabled in.
    pub fn end_to_start(self) -> impl Iterator<Item = Slot> {
        let order = match self {
            Shape::Convert(slot) | Shape::Rotate(slot) => [Some(slot), None],
            Shape::Chained { convert, rotate } => [Some(rotate), Some(convert)],
        };
        order.into_iter().flatten()
    }

    pub fn completion_irq(self) -> Irq {
        Irq::OutEof(self.end())
    }
}

/// Everything [`configure`] binds besides the shape.
pub struct Setup<'a, M> {
    pub plan: &'a Plan,
    pub config: &'a TaskConfig,
    pub buffers: &'a BufferSet<M>,
    /// Line length of the output frame, the display's when presenting.
    pub output_stride: u32,
}

impl<M: crate::device::BufferMap> Setup<'_, M> {
    fn input_stride(&self) -> u32 {
        let frame = &self.config.input.frame;
        frame.width * frame.format.bytes_per_pixel()
    }

    /// Primary and secondary address of a role. Split mode double-buffers
    /// a single frame, so without streaming both slots point at it.
    fn pair(&self, addr: impl Fn(usize) -> PhysAddr, offset: u32) -> (PhysAddr, Option<PhysAddr>) {
        let primary = addr(0) + offset;
        let secondary = if self.plan.streaming {
            Some(addr(1) + offset)
        } else if self.plan.stripes.is_some() {
            Some(primary)
        } else {
            None
        };
        (primary, secondary)
    }

    fn input_buffer(&self, width: u32, rotation: Rotation) -> BufferParams {
        let input = &self.plan.input;
        let (primary, secondary) = self.pair(|i| self.buffers.input_addr(i), input.offsets.base);
        BufferParams {
            format: self.config.input.frame.format,
            width,
            height: input.height,
            stride: self.input_stride(),
            rotation,
            primary,
            secondary,
            u_offset: input.offsets.u,
            v_offset: input.offsets.v,
        }
    }

    fn output_buffer(&self, width: u32, rotation: Rotation) -> BufferParams {
        let output = &self.plan.output;
        let (primary, secondary) =
            self.pair(|i| self.buffers.output_addr(i), output.offsets.base);
        BufferParams {
            format: self.config.output.frame.format,
            width,
            height: output.height,
            stride: self.output_stride,
            rotation,
            primary,
            secondary,
            u_offset: output.offsets.u,
            v_offset: output.offsets.v,
        }
    }

    /// Intermediate buffer between the linked convert and rotate channels.
    fn intermediate_buffer(&self, rotation: Rotation) -> BufferParams {
        let (width, height) = self.plan.intermediate();
        let format = self.config.output.frame.format;
        let (primary, secondary) = self.pair(|i| self.buffers.rotation_addr(i), 0);
        BufferParams {
            format,
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            rotation,
            primary,
            secondary,
            u_offset: 0,
            v_offset: 0,
        }
    }

    fn convert_params(&self, out_width: u32, out_height: u32) -> ChannelParams {
        let left = self.plan.stripes.map(|s| s.left);
        let overlay = self.config.overlay.as_ref().map(|ov| Blend {
            format: ov.frame.format,
            alpha: match ov.alpha {
                OverlayAlpha::Global(alpha) => BlendAlpha::Global(alpha),
                OverlayAlpha::Local { .. } => BlendAlpha::Local,
            },
            key_color: ov.key_color,
        });
        ChannelParams {
            in_width: left.map_or(self.plan.input.width, |s| s.input_width),
            in_height: self.plan.input.height,
            in_format: self.config.input.frame.format,
            out_width: left.map_or(out_width, |s| s.output_width),
            out_height,
            out_format: self.config.output.frame.format,
            resize_ratio: left.map(|s| s.resize_ratio),
            overlay,
        }
    }
}

/// Releases the channels of a partially configured shape unless disarmed.
struct Unwind<'a, D: TransformDevice> {
    device: &'a D,
    initialized: Vec<Slot>,
    linked: Option<(Slot, Slot)>,
}

impl<'a, D: TransformDevice> Unwind<'a, D> {
    fn new(device: &'a D) -> Self {
        Unwind {
            device,
            initialized: Vec::with_capacity(2),
            linked: None,
        }
    }

    fn init(&mut self, slot: Slot, params: Option<&ChannelParams>) -> Result<()> {
        self.device
            .init_channel(slot, params)
            .op("IPU_INIT_CHANNEL")?;
        self.initialized.push(slot);
        Ok(())
    }

    fn link(&mut self, src: Slot, dst: Slot) -> Result<()> {
        self.device.link(src, dst).op("IPU_LINK_CHANNELS")?;
        self.linked = Some((src, dst));
        Ok(())
    }

    fn commit(mut self) {
        self.initialized.clear();
        self.linked = None;
    }
}

impl<D: TransformDevice> Drop for Unwind<'_, D> {
    fn drop(&mut self) {
        if let Some((src, dst)) = self.linked.take() {
            if let Err(e) = self.device.unlink(src, dst) {
                warn!("unlinking {src:?} from {dst:?} failed: {e}");
            }
        }
        for slot in self.initialized.drain(..).rev() {
            match self.device.uninit_channel(slot) {
                Ok(()) => debug!("released {slot:?}"),
                Err(e) => warn!("releasing {slot:?} failed: {e}"),
            }
        }
    }
}

fn bind<D: TransformDevice>(
    device: &D,
    slot: Slot,
    role: BufferRole,
    params: &BufferParams,
) -> Result<()> {
    debug!(?slot, ?role, ?params, "binding buffer");
    device
        .init_buffer(slot, role, params)
        .op("IPU_INIT_CHANNEL_BUFFER")
}

fn bind_overlay<D: TransformDevice>(
    device: &D,
    slot: Slot,
    setup: &Setup<'_, D::Map>,
) -> Result<()> {
    let (Some(ov), Some(ov_plan)) = (&setup.config.overlay, &setup.plan.overlay) else {
        return Ok(());
    };
    let layout = &ov_plan.layout;
    let (primary, secondary) = setup.pair(|i| setup.buffers.overlay_addr(i), layout.offsets.base);
    let graphics = BufferParams {
        format: ov.frame.format,
        width: layout.width,
        height: layout.height,
        stride: ov.frame.width * ov.frame.format.bytes_per_pixel(),
        rotation: Rotation::None,
        primary,
        secondary,
        u_offset: layout.offsets.u,
        v_offset: layout.offsets.v,
    };
    bind(device, slot, BufferRole::Graphics, &graphics)?;

    if let OverlayAlpha::Local { .. } = ov.alpha {
        let (primary, secondary) =
            setup.pair(|i| setup.buffers.alpha_addr(i), ov_plan.alpha_offset);
        let alpha = BufferParams {
            format: crate::format::GENERIC,
            width: layout.width,
            height: layout.height,
            stride: ov.frame.width,
            rotation: Rotation::None,
            primary,
            secondary,
            u_offset: 0,
            v_offset: 0,
        };
        bind(device, slot, BufferRole::Alpha, &alpha)?;
    }
    Ok(())
}

/// Initialises the channels of `shape` and binds every buffer role.
///
/// On error every channel initialised here is released again, unlinking
/// first where the link was made.
#[instrument(skip(device, setup))]
pub fn configure<D: TransformDevice>(
    device: &D,
    shape: Shape,
    setup: &Setup<'_, D::Map>,
) -> Result<()> {
    let plan = setup.plan;
    let mut unwind = Unwind::new(device);
    let rotation = plan.rotation;

    match shape {
        Shape::Convert(slot) => {
            let params = setup.convert_params(plan.output.width, plan.output.height);
            unwind.init(slot, Some(&params))?;
            bind(
                device,
                slot,
                BufferRole::Input,
                &setup.input_buffer(params.in_width, Rotation::None),
            )?;
            bind_overlay(device, slot, setup)?;
            // Flips below the rotation threshold happen on the way out.
            bind(
                device,
                slot,
                BufferRole::Output,
                &setup.output_buffer(params.out_width, rotation),
            )?;
            if let Some(stripes) = Striper::new(slot, setup) {
                stripes.program(
                    device,
                    Side::Left,
                    setup.buffers.input_addr(0),
                    setup.buffers.output_addr(0),
                    false,
                )?;
            }
        }
        Shape::Rotate(slot) => {
            unwind.init(slot, None)?;
            bind(
                device,
                slot,
                BufferRole::Input,
                &setup.input_buffer(plan.input.width, rotation),
            )?;
            bind(
                device,
                slot,
                BufferRole::Output,
                &setup.output_buffer(plan.output.width, Rotation::None),
            )?;
        }
        Shape::Chained { convert, rotate } => {
            let (width, height) = plan.intermediate();
            let params = setup.convert_params(width, height);
            unwind.init(convert, Some(&params))?;
            bind(
                device,
                convert,
                BufferRole::Input,
                &setup.input_buffer(plan.input.width, Rotation::None),
            )?;
            bind_overlay(device, convert, setup)?;
            bind(
                device,
                convert,
                BufferRole::Output,
                &setup.intermediate_buffer(Rotation::None),
            )?;

            unwind.init(rotate, None)?;
            bind(
                device,
                rotate,
                BufferRole::Input,
                &setup.intermediate_buffer(rotation),
            )?;
            bind(
                device,
                rotate,
                BufferRole::Output,
                &setup.output_buffer(plan.output.width, Rotation::None),
            )?;
            unwind.link(convert, rotate)?;
        }
    }

    unwind.commit();
    info!(
        ?shape,
        irq = ?shape.completion_irq(),
        "channels configured"
    );
    Ok(())
}

/// Releases the channels of `shape`, best effort.
pub fn release<D: TransformDevice>(device: &D, shape: Shape) {
    let mut unwind = Unwind::new(device);
    match shape {
        Shape::Convert(slot) | Shape::Rotate(slot) => unwind.initialized.push(slot),
        Shape::Chained { convert, rotate } => {
            unwind.initialized.extend([convert, rotate]);
            unwind.linked = Some((convert, rotate));
        }
    }
    drop(unwind);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Double-buffer slot a stripe runs in.
    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// Per-stripe rebinding of a split convert channel.
#[derive(Debug, Clone, Copy)]
pub struct Striper {
    slot: Slot,
    left: Stripe,
    right: Stripe,
    in_bpp: u32,
    out_bpp: u32,
    in_base: u32,
    out_base: u32,
    input: OffsetParams,
    output: OffsetParams,
}

impl Striper {
    pub fn new<M: crate::device::BufferMap>(slot: Slot, setup: &Setup<'_, M>) -> Option<Self> {
        let stripes = setup.plan.stripes?;
        let plan = setup.plan;
        let in_format = setup.config.input.frame.format;
        let out_format = setup.config.output.frame.format;
        Some(Striper {
            slot,
            left: stripes.left,
            right: stripes.right,
            in_bpp: in_format.bytes_per_pixel(),
            out_bpp: out_format.bytes_per_pixel(),
            in_base: plan.input.offsets.base,
            out_base: plan.output.offsets.base,
            input: OffsetParams {
                format: in_format,
                width: plan.input.width,
                height: plan.input.height,
                stride: setup.input_stride(),
                u_offset: plan.input.offsets.u,
                v_offset: plan.input.offsets.v,
                vertical: 0,
                horizontal: 0,
            },
            output: OffsetParams {
                format: out_format,
                width: plan.output.width,
                height: plan.output.height,
                stride: setup.output_stride,
                u_offset: plan.output.offsets.u,
                v_offset: plan.output.offsets.v,
                vertical: 0,
                horizontal: 0,
            },
        })
    }

    /// Points the stripe `side` at the frames at `in_addr` and `out_addr`,
    /// arming it when `select` is set.
    pub fn program<D: TransformDevice>(
        &self,
        device: &D,
        side: Side,
        in_addr: PhysAddr,
        out_addr: PhysAddr,
        select: bool,
    ) -> Result<()> {
        let stripe = match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        };
        let index = side.index();
        let in_column = stripe.input_column * self.in_bpp;
        let out_column = stripe.output_column * self.out_bpp;
        debug!(?side, in_column, out_column, "programming stripe");

        device
            .update_buffer(
                self.slot,
                BufferRole::Output,
                index,
                out_addr + self.out_base + out_column,
            )
            .op("IPU_UPDATE_CHANNEL_BUFFER")?;
        device
            .update_offset(
                self.slot,
                BufferRole::Output,
                &OffsetParams {
                    horizontal: out_column,
                    ..self.output
                },
            )
            .op("IPU_UPDATE_BUF_OFFSET")?;
        device
            .update_buffer(
                self.slot,
                BufferRole::Input,
                index,
                in_addr + self.in_base + in_column,
            )
            .op("IPU_UPDATE_CHANNEL_BUFFER")?;
        device
            .update_offset(
                self.slot,
                BufferRole::Input,
                &OffsetParams {
                    horizontal: in_column,
                    ..self.input
                },
            )
            .op("IPU_UPDATE_BUF_OFFSET")?;

        if select {
            device
                .select_buffer(self.slot, BufferRole::Input, index)
                .op("IPU_SELECT_CHANNEL_BUFFER")?;
            device
                .select_buffer(self.slot, BufferRole::Output, index)
                .op("IPU_SELECT_CHANNEL_BUFFER")?;
        }
        Ok(())
    }
}

/// Shape for a claim, rejecting slot sets no shape covers.
pub fn shape_of(slots: SlotSet) -> Result<Shape> {
    Shape::from_slots(slots).ok_or_else(|| Error::invalid(format!("no channels in {slots:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::Architecture,
        buffer::Buffer,
        format::{RGBP, YUYV},
        geometry::Frame,
        sim::{Call, SimDevice},
        task::{InputParams, Mode, Operation, OutputParams},
    };

    fn config(input: Frame, output: Frame, rotation: Rotation) -> TaskConfig {
        TaskConfig {
            input: InputParams {
                frame: input,
                ..Default::default()
            },
            output: OutputParams {
                frame: output,
                rotation,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn buffers(dev: &SimDevice) -> BufferSet<crate::sim::SimMap> {
        let mut set = BufferSet::default();
        for i in 0..2 {
            set.input[i] = Some(Buffer::allocate(dev, 64, true).unwrap());
            set.rotation[i] = Some(Buffer::allocate(dev, 64, false).unwrap());
            set.output[i] = Some(Buffer::allocate(dev, 64, true).unwrap());
        }
        set
    }

    #[test]
    fn shapes() {
        let chained = Shape::from_slots(
            SlotSet::single(Slot::ConvertPostProcess).with(Slot::RotatePostProcess),
        )
        .unwrap();
        assert_eq!(chained.begin(), Slot::ConvertPostProcess);
        assert_eq!(chained.end(), Slot::RotatePostProcess);
        assert_eq!(
            chained.end_to_start().collect::<Vec<_>>(),
            [Slot::RotatePostProcess, Slot::ConvertPostProcess]
        );
        assert_eq!(
            chained.completion_irq(),
            Irq::OutEof(Slot::RotatePostProcess)
        );
        assert_eq!(
            Shape::from_slots(SlotSet::single(Slot::RotateViewfinder)),
            Some(Shape::Rotate(Slot::RotateViewfinder))
        );
        assert!(shape_of(SlotSet::EMPTY).is_err());
    }

    #[test]
    fn chained_links_after_binding() {
        let dev = SimDevice::new();
        let cfg = config(
            Frame::new(640, 480, YUYV),
            Frame::new(240, 320, RGBP),
            Rotation::Rotate90Right,
        );
        let plan = Plan::new(&cfg, &Architecture::default()).unwrap();
        let set = buffers(&dev);
        let setup = Setup {
            plan: &plan,
            config: &cfg,
            buffers: &set,
            output_stride: 240 * 2,
        };
        let shape = Shape::Chained {
            convert: Slot::ConvertEncode,
            rotate: Slot::RotateEncode,
        };
        configure(&dev, shape, &setup).unwrap();

        assert_eq!(
            dev.linked(),
            vec![(Slot::ConvertEncode, Slot::RotateEncode)]
        );
        let ic_out = dev
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::InitBuffer(Slot::ConvertEncode, BufferRole::Output, p) => Some(p),
                _ => None,
            })
            .unwrap();
        // The convert engine writes the unrotated 320x240 image.
        assert_eq!((ic_out.width, ic_out.height, ic_out.stride), (320, 240, 640));
        assert_eq!(ic_out.secondary, None);
        set_release(set, &dev);
    }

    #[test]
    fn failure_unwinds_in_reverse() {
        let dev = SimDevice::new();
        dev.fail_on("link");
        let cfg = config(
            Frame::new(640, 480, YUYV),
            Frame::new(240, 320, RGBP),
            Rotation::Rotate90Left,
        );
        let plan = Plan::new(&cfg, &Architecture::default()).unwrap();
        let set = buffers(&dev);
        let setup = Setup {
            plan: &plan,
            config: &cfg,
            buffers: &set,
            output_stride: 240 * 2,
        };
        let shape = Shape::Chained {
            convert: Slot::ConvertPostProcess,
            rotate: Slot::RotatePostProcess,
        };
        assert!(matches!(
            configure(&dev, shape, &setup),
            Err(Error::Hardware { op: "IPU_LINK_CHANNELS", .. })
        ));
        assert!(dev.initialized().is_empty());
        let uninits: Vec<Slot> = dev
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UninitChannel(slot) => Some(slot),
                _ => None,
            })
            .collect();
        assert_eq!(uninits, [Slot::RotatePostProcess, Slot::ConvertPostProcess]);
        set_release(set, &dev);
    }

    #[test]
    fn split_programs_left_stripe_unarmed() {
        let dev = SimDevice::new();
        let mut cfg = config(
            Frame::new(1280, 720, YUYV),
            Frame::new(1920, 1080, RGBP),
            Rotation::None,
        );
        cfg.mode = Mode {
            operation: Operation::Normal,
            ..Default::default()
        };
        let plan = Plan::new(&cfg, &Architecture::default()).unwrap();
        let set = buffers(&dev);
        let setup = Setup {
            plan: &plan,
            config: &cfg,
            buffers: &set,
            output_stride: 1920 * 2,
        };
        configure(&dev, Shape::Convert(Slot::ConvertEncode), &setup).unwrap();

        let calls = dev.calls();
        let init = calls
            .iter()
            .find_map(|c| match c {
                Call::InitChannel(_, Some(p)) => Some(*p),
                _ => None,
            })
            .unwrap();
        assert_eq!((init.in_width, init.out_width), (640, 960));
        assert!(init.resize_ratio.is_some());

        let input = calls
            .iter()
            .find_map(|c| match c {
                Call::InitBuffer(_, BufferRole::Input, p) => Some(*p),
                _ => None,
            })
            .unwrap();
        assert_eq!(input.secondary, Some(input.primary));

        assert!(calls.contains(&Call::UpdateBuffer(
            Slot::ConvertEncode,
            BufferRole::Output,
            0,
            set.output_addr(0)
        )));
        assert!(!calls.iter().any(|c| matches!(c, Call::SelectBuffer(..))));
        set_release(set, &dev);
    }

    fn set_release(mut set: BufferSet<crate::sim::SimMap>, dev: &SimDevice) {
        set.release(dev);
        assert_eq!(dev.live_allocations(), 0);
    }
}
