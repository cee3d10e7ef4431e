// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_ipu::{
    channel::Shape,
    device::{BufferRole, Irq},
    display::{DisplayChannel, DisplayTarget},
    format::{BGRA, RGBP, UYVY},
    pipeline::Indices,
    resource::{Slot, SlotSet},
    sim::{Call, DisplayCall, SimDevice, SimDisplay},
    Arbiter, Architecture, Error, Frame, FrameUpdate, Operation, OverlayAlpha, OverlayParams,
    Path, PathSet, Registry, Rotation, TaskBuilder, TaskConfig, TaskMode,
};
use serial_test::serial;
use std::{
    error::Error as StdError,
    time::{Duration, Instant},
};

fn builder(dev: &SimDevice, arbiter: &Arbiter) -> TaskBuilder<SimDevice> {
    TaskBuilder::new(dev.clone())
        .with_arbiter(arbiter.clone())
        .with_architecture(Architecture::default())
}

fn config(input: Frame, output: Frame) -> TaskConfig {
    let mut config = TaskConfig::default();
    config.input.frame = input;
    config.output.frame = output;
    config
}

fn resize() -> TaskConfig {
    config(Frame::new(640, 480, UYVY), Frame::new(320, 240, RGBP))
}

#[test]
#[serial]
fn test_convert_lifecycle() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());

    let mut task = builder(&dev, &arbiter).init(&resize())?;
    assert_eq!(task.mode(), TaskMode::Convert);
    assert_eq!(task.shape(), Shape::Convert(Slot::ConvertEncode));
    assert_eq!(task.irq(), Irq::OutEof(Slot::ConvertEncode));
    assert!(dev.initialized().contains(Slot::ConvertEncode));
    assert_eq!(dev.live_allocations(), 2);
    assert!(dev.enabled().is_empty());

    let pixels = task.input_mut(0).ok_or("input not mapped")?;
    assert_eq!(pixels.len(), 640 * 480 * 2);
    pixels.fill(0x80);

    let first = task.update(&FrameUpdate::default())?;
    assert_eq!((first.next_input, first.completed), (0, 0));
    assert!(task.is_enabled());
    assert!(dev.enabled().contains(Slot::ConvertEncode));

    let second = task.update(&FrameUpdate::default())?;
    assert_eq!((second.next_input, second.completed), (0, 0));
    assert_eq!(task.input_frames(), 2);
    assert_eq!(task.output_frames(), 2);
    assert_eq!(task.output(0).map(<[u8]>::len), Some(320 * 240 * 2));

    task.uninit();
    assert!(dev.initialized().is_empty());
    assert!(dev.enabled().is_empty());
    assert!(dev.registered().is_empty());
    assert_eq!(dev.live_allocations(), 0);
    assert!(arbiter.registry().claimed().is_empty());

    Ok(())
}

#[test]
#[serial]
fn test_update_rebinds_input() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = resize();
    cfg.input.crop = Some(edgefirst_ipu::Rect::new(0, 8, 640, 464));

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    task.update(&FrameUpdate::default())?;
    dev.clear_calls();

    task.update(&FrameUpdate::input(0x4000_0000))?;
    let base = 8 * 640 * 2;
    assert!(dev.calls().contains(&Call::UpdateBuffer(
        Slot::ConvertEncode,
        BufferRole::Input,
        0,
        0x4000_0000 + base
    )));
    Ok(())
}

#[test]
#[serial]
fn test_streaming_indices() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = resize();
    cfg.mode.operation = Operation::Streaming;

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    assert_eq!(dev.live_allocations(), 5);

    let mut completed = Vec::new();
    let mut next = Vec::new();
    for _ in 0..5 {
        let update = task.update(&FrameUpdate::default())?;
        completed.push(update.completed);
        next.push(update.next_input);
        if completed.len() == 1 {
            dev.clear_calls();
        }
    }
    assert_eq!(completed, [0, 1, 2, 0, 1]);
    assert_eq!(next, [0, 1, 0, 1, 0]);

    // The first queued frame after start-up lands in the third output.
    let out2 = task.output_addr(2);
    let first_output = dev.calls().into_iter().find_map(|call| match call {
        Call::UpdateBuffer(_, BufferRole::Output, index, addr) => Some((index, addr)),
        _ => None,
    });
    assert_eq!(first_output, Some((0, out2)));

    task.uninit();
    assert_eq!(dev.live_allocations(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_streaming_indices_are_periodic() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = resize();
    cfg.mode.operation = Operation::Streaming;

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    for n in 0..36 {
        let update = task.update(&FrameUpdate::default())?;
        let idx = task.indices();
        assert_eq!(idx.update, n % 2, "frame {n}");
        assert_eq!(idx.output, (n + 1) % 3, "frame {n}");
        assert_eq!(idx.tri_output, (n + 2) % 3, "frame {n}");
        assert_eq!(update.next_input, n % 2, "frame {n}");
        assert_eq!(update.completed, n % 3, "frame {n}");
        assert_eq!(task.output_frames(), n as u64 + 1);
        dev.clear_calls();
    }
    Ok(())
}

#[test]
#[serial]
fn test_chained_rotation() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = config(Frame::new(640, 480, UYVY), Frame::new(240, 320, RGBP));
    cfg.output.rotation = Rotation::Rotate90Right;

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    assert_eq!(task.mode(), TaskMode::Chained);
    assert_eq!(
        task.shape(),
        Shape::Chained {
            convert: Slot::ConvertEncode,
            rotate: Slot::RotateEncode
        }
    );
    assert_eq!(dev.linked(), [(Slot::ConvertEncode, Slot::RotateEncode)]);
    // Input, output and the intermediate rotation buffer.
    assert_eq!(dev.live_allocations(), 3);

    task.update(&FrameUpdate::default())?;
    let enables: Vec<Slot> = dev
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Enable(slot) => Some(slot),
            _ => None,
        })
        .collect();
    assert_eq!(enables, [Slot::RotateEncode, Slot::ConvertEncode]);

    drop(task);
    assert!(dev.linked().is_empty());
    assert!(dev.initialized().is_empty());
    assert_eq!(dev.live_allocations(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_rotate_only() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = config(Frame::new(480, 640, UYVY), Frame::new(640, 480, UYVY));
    cfg.output.rotation = Rotation::Rotate90Left;

    let task = builder(&dev, &arbiter).init(&cfg)?;
    assert_eq!(task.mode(), TaskMode::Rotate);
    assert_eq!(task.shape(), Shape::Rotate(Slot::RotateEncode));
    assert!(dev.calls().contains(&Call::InitChannel(Slot::RotateEncode, None)));
    Ok(())
}

#[test]
#[serial]
fn test_copy_needs_buffers() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = config(Frame::new(320, 240, RGBP), Frame::new(320, 240, RGBP));

    let err = builder(&dev, &arbiter).init(&cfg).unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)), "{err}");
    assert!(dev.calls().is_empty());
    assert!(arbiter.registry().claimed().is_empty());

    cfg.input.buffers[0] = Some(0x2000_0000);
    cfg.output.buffers[0] = Some(0x3000_0000);
    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    assert_eq!(task.mode(), TaskMode::Copy);
    assert_eq!(task.shape(), Shape::Convert(Slot::ConvertEncode));
    assert!(task.input_mut(0).is_none());
    assert!(!dev.calls().iter().any(|call| matches!(call, Call::Alloc(_))));

    task.update(&FrameUpdate::default())?;
    task.update(&FrameUpdate::default())?;
    assert_eq!(task.output_frames(), 2);
    Ok(())
}

#[test]
#[serial]
fn test_busy_fallback() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    dev.set_busy(Slot::ConvertEncode, true);

    let task = builder(&dev, &arbiter).init(&resize())?;
    assert_eq!(task.shape(), Shape::Convert(Slot::ConvertPostProcess));
    drop(task);

    let mut cfg = resize();
    cfg.mode.preference = PathSet::only(Path::Encode);
    let err = builder(&dev, &arbiter).init(&cfg).unwrap_err();
    assert!(matches!(err, Error::Busy { .. }), "{err}");
    assert!(err.is_retryable());
    assert!(dev.initialized().is_empty());
    Ok(())
}

#[test]
#[serial]
fn test_tasks_share_registry() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());

    let a = builder(&dev, &arbiter).init(&resize())?;
    let b = builder(&dev, &arbiter).init(&resize())?;
    assert_eq!(a.shape(), Shape::Convert(Slot::ConvertEncode));
    assert_eq!(b.shape(), Shape::Convert(Slot::ConvertPostProcess));

    // The viewfinder convert slot shares its input stage with encode.
    let err = builder(&dev, &arbiter).init(&resize()).unwrap_err();
    assert!(matches!(err, Error::Busy { .. }));

    drop(a);
    let d = builder(&dev, &arbiter).init(&resize())?;
    assert_eq!(d.slots(), SlotSet::single(Slot::ConvertEncode));
    Ok(())
}

#[test]
#[serial]
fn test_init_failure_releases_everything() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    dev.fail_on("init_buffer");

    let err = builder(&dev, &arbiter).init(&resize()).unwrap_err();
    assert!(
        matches!(
            err,
            Error::Hardware {
                op: "IPU_INIT_CHANNEL_BUFFER",
                ..
            }
        ),
        "{err}"
    );
    assert!(dev.initialized().is_empty());
    assert_eq!(dev.live_allocations(), 0);
    assert!(arbiter.registry().claimed().is_empty());

    dev.clear_failures();
    builder(&dev, &arbiter).init(&resize())?;
    Ok(())
}

#[test]
#[serial]
fn test_alloc_failure() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    dev.limit_allocations(1);

    let err = builder(&dev, &arbiter).init(&resize()).unwrap_err();
    assert!(matches!(err, Error::Alloc { .. }), "{err}");
    assert_eq!(dev.live_allocations(), 0);
    assert_eq!(dev.frees(), 1);
    assert!(dev.initialized().is_empty());
    assert!(arbiter.registry().claimed().is_empty());
    Ok(())
}

#[test]
#[serial]
fn test_timeout_keeps_task_usable() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = resize();
    cfg.mode.operation = Operation::Streaming;

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    task.update(&FrameUpdate::default())?;
    let before = task.indices();

    dev.time_out_next(1);
    let err = task.update(&FrameUpdate::default()).unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err}");
    assert!(err.is_retryable());
    assert_eq!(task.indices(), before);
    assert_eq!(task.input_frames(), 2);

    let update = task.update(&FrameUpdate::default())?;
    assert_eq!(update.completed, 1);
    Ok(())
}

#[test]
#[serial]
fn test_first_update_timeout() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = resize();
    cfg.mode.operation = Operation::Streaming;

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    dev.time_out_next(1);
    let err = task.update(&FrameUpdate::default()).unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err}");
    assert!(task.is_enabled());
    assert_eq!(task.indices(), Indices::default());
    assert_eq!(task.input_frames(), 0);
    assert_eq!(task.output_frames(), 0);

    // The retry waits for the same first frame instead of queueing one.
    dev.clear_calls();
    let first = task.update(&FrameUpdate::default())?;
    assert_eq!((first.next_input, first.completed), (0, 0));
    assert_eq!(task.indices(), Indices::primed(true, false));
    assert_eq!(task.output_frames(), 1);
    let calls = dev.calls();
    assert!(!calls.iter().any(|call| matches!(call, Call::Enable(_))));
    assert!(!calls
        .iter()
        .any(|call| matches!(call, Call::UpdateBuffer(..) | Call::SelectBuffer(..))));

    let second = task.update(&FrameUpdate::default())?;
    assert_eq!((second.next_input, second.completed), (1, 1));
    task.uninit();
    assert!(dev.enabled().is_empty());
    Ok(())
}

#[test]
#[serial]
fn test_split_first_update_timeout() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let cfg = config(Frame::new(1280, 720, UYVY), Frame::new(1920, 1080, RGBP));

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    dev.time_out_next(1);
    assert!(task.update(&FrameUpdate::default()).is_err());
    assert_eq!(task.output_frames(), 0);

    dev.clear_calls();
    task.update(&FrameUpdate::default())?;
    assert_eq!(task.output_frames(), 1);
    let right: Vec<_> = dev
        .calls()
        .into_iter()
        .filter(|call| {
            matches!(
                call,
                Call::UpdateOffset(Slot::ConvertEncode, BufferRole::Output, params)
                    if params.horizontal == 960 * 2
            )
        })
        .collect();
    assert_eq!(right.len(), 1);
    Ok(())
}

#[test]
#[serial]
fn test_stalled_teardown() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = resize();
    cfg.mode.operation = Operation::Streaming;
    cfg.teardown_timeout = Duration::from_millis(50);

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    task.update(&FrameUpdate::default())?;
    task.update(&FrameUpdate::default())?;
    let irq = task.irq();
    dev.stall(true);

    let start = Instant::now();
    task.uninit();
    assert!(start.elapsed() < cfg.teardown_timeout + Duration::from_millis(500));

    // One bounded wait for the frame in flight, then the channels stop.
    let calls = dev.calls();
    let last_select = calls
        .iter()
        .rposition(|call| matches!(call, Call::SelectBuffer(..)))
        .ok_or("no buffer selected")?;
    let first_disable = calls
        .iter()
        .position(|call| matches!(call, Call::Disable(_)))
        .ok_or("no channel disabled")?;
    assert!(last_select < first_disable);
    let waits: Vec<_> = calls[last_select..first_disable]
        .iter()
        .filter(|call| matches!(call, Call::Wait(..)))
        .collect();
    assert_eq!(waits, [&Call::Wait(irq, cfg.teardown_timeout)]);

    assert!(dev.enabled().is_empty());
    assert!(dev.initialized().is_empty());
    assert_eq!(dev.live_allocations(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_split_mode() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let cfg = config(Frame::new(1280, 720, UYVY), Frame::new(1920, 1080, RGBP));

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    assert!(task.is_split());
    let stripes = task.plan().stripes.ok_or("no stripes")?;
    assert_eq!(stripes.left.output_width, 960);
    assert_eq!(stripes.right.output_column, 960);

    task.update(&FrameUpdate::default())?;
    let right = dev.calls().into_iter().any(|call| {
        matches!(
            call,
            Call::UpdateOffset(Slot::ConvertEncode, BufferRole::Output, params)
                if params.horizontal == 960 * 2
        )
    });
    assert!(right);

    let err = {
        let mut cfg = cfg.clone();
        cfg.output.rotation = Rotation::Rotate90Right;
        cfg.output.frame = Frame::new(1080, 1920, RGBP);
        builder(&dev, &arbiter).init(&cfg).unwrap_err()
    };
    assert!(matches!(err, Error::InvalidRequest(_)), "{err}");
    Ok(())
}

#[test]
#[serial]
fn test_display_pages() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let display = SimDisplay::new(1024, 768, 16, Some(DisplayChannel::Background));
    let mut cfg = resize();
    cfg.output.display = Some(DisplayTarget { fb: 0, x: 0, y: 0 });

    let mut task = builder(&dev, &arbiter)
        .with_display(display.clone())
        .init(&cfg)?;
    assert_eq!(display.var().yres_virtual, 3 * 768);
    // Display pages are the framebuffer's, not allocated.
    assert_eq!(dev.live_allocations(), 1);

    let screen = 768 * 1024 * 2;
    let output = dev.calls().into_iter().find_map(|call| match call {
        Call::InitBuffer(_, BufferRole::Output, params) => Some(params),
        _ => None,
    });
    let output = output.ok_or("output not bound")?;
    assert_eq!(output.stride, 2048);
    assert_eq!(output.primary, 0x9000_0000 + screen);

    for _ in 0..3 {
        task.update(&FrameUpdate::default())?;
    }
    assert_eq!(display.pans(), [768, 0, 1536]);

    task.uninit();
    let len = screen as usize;
    assert!(display.calls().contains(&DisplayCall::Copy {
        from: len,
        to: 0,
        len
    }));
    Ok(())
}

#[test]
#[serial]
fn test_overlay_global_alpha() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = config(Frame::new(640, 480, UYVY), Frame::new(640, 480, RGBP));
    cfg.overlay = Some(OverlayParams {
        frame: Frame::new(640, 480, BGRA),
        alpha: OverlayAlpha::Global(128),
        ..Default::default()
    });

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    assert_eq!(task.shape(), Shape::Convert(Slot::ConvertPostProcess));
    let blend = dev.calls().into_iter().find_map(|call| match call {
        Call::InitChannel(_, Some(params)) => params.overlay,
        _ => None,
    });
    assert_eq!(blend.map(|b| b.format), Some(BGRA));
    assert!(task.overlay_mut(0).is_some());
    assert!(task.alpha_mut(0).is_none());

    task.update(&FrameUpdate::default())?;
    assert!(dev
        .calls()
        .contains(&Call::SelectBuffer(Slot::ConvertPostProcess, BufferRole::Graphics, 0)));

    cfg.mode.preference = PathSet::only(Path::Encode);
    let err = builder(&dev, &arbiter).init(&cfg).unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)), "{err}");
    Ok(())
}

#[test]
#[serial]
fn test_overlay_local_alpha() -> Result<(), Box<dyn StdError>> {
    let dev = SimDevice::new();
    let arbiter = Arbiter::new(Registry::new());
    let mut cfg = config(Frame::new(640, 480, UYVY), Frame::new(320, 240, RGBP));
    cfg.overlay = Some(OverlayParams {
        frame: Frame::new(320, 240, RGBP),
        alpha: OverlayAlpha::Local {
            buffers: [None, None],
        },
        ..Default::default()
    });

    let mut task = builder(&dev, &arbiter).init(&cfg)?;
    let alpha = task.alpha_mut(0).ok_or("alpha plane not mapped")?;
    assert_eq!(alpha.len(), 320 * 240);
    alpha.fill(0xff);

    task.update(&FrameUpdate::default())?;
    dev.clear_calls();
    task.update(&FrameUpdate {
        alpha: Some(0x5000_0000),
        ..Default::default()
    })?;
    assert!(dev.calls().contains(&Call::UpdateBuffer(
        Slot::ConvertPostProcess,
        BufferRole::Alpha,
        0,
        0x5000_0000
    )));
    Ok(())
}

#[test]
#[serial]
#[ignore = "needs /dev/mxc_ipu"]
fn test_hardware_resize() -> Result<(), Box<dyn StdError>> {
    let device = edgefirst_ipu::hw::IpuDevice::open()?;
    let mut task = TaskBuilder::new(device).init(&resize())?;
    task.input_mut(0).ok_or("input not mapped")?.fill(0x80);
    for _ in 0..10 {
        task.update(&FrameUpdate::default())?;
    }
    assert_eq!(task.output_frames(), 10);
    Ok(())
}
