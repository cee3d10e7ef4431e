use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_ipu::{
    arbiter::Arbiter,
    format::{self, FourCC},
    plan::Plan,
    sim::SimDevice,
    Architecture, Frame, FrameUpdate, Operation, Registry, Rotation, TaskBuilder, TaskConfig,
};

fn config(src: (u32, u32), dst: (u32, u32), fmt: FourCC, rotation: Rotation) -> TaskConfig {
    let mut config = TaskConfig::default();
    config.input.frame = Frame::new(src.0, src.1, fmt);
    config.output.frame = Frame::new(dst.0, dst.1, format::RGBP);
    config.output.rotation = rotation;
    config
}

pub fn benchmark_plan(c: &mut Criterion) {
    let fmts = [format::UYVY, format::I420, format::NV12];
    let dims = [(320, 240), (640, 480), (1280, 720), (1920, 1080)];
    let arch = Architecture::default();

    for fmt in fmts.iter() {
        let mut group = c.benchmark_group(format!("plan/{}", fmt));
        for src in dims.iter() {
            for dst in dims.iter() {
                for rotation in [Rotation::None, Rotation::Rotate90Right] {
                    let cfg = config(*src, *dst, *fmt, rotation);
                    group.bench_with_input(
                        format!(
                            "{}x{}-{}x{}-{:?}",
                            src.0, src.1, dst.0, dst.1, rotation
                        ),
                        &cfg,
                        |b, cfg| b.iter(|| Plan::new(cfg, &arch)),
                    );
                }
            }
        }
    }
}

pub fn benchmark_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    for (name, operation) in [("normal", Operation::Normal), ("streaming", Operation::Streaming)] {
        let mut cfg = config((640, 480), (1920, 1080), format::UYVY, Rotation::None);
        cfg.mode.operation = operation;
        let dev = SimDevice::new();
        let mut task = TaskBuilder::new(dev.clone())
            .with_arbiter(Arbiter::new(Registry::new()))
            .with_architecture(Architecture::default())
            .init(&cfg)
            .unwrap();
        task.update(&FrameUpdate::default()).unwrap();

        // The device model records every call; keep the log from growing.
        group.bench_function(name, |b| {
            b.iter(|| {
                dev.clear_calls();
                task.update(&FrameUpdate::default()).unwrap()
            })
        });
    }
}

criterion_group!(benches, benchmark_plan, benchmark_update);
criterion_main!(benches);
