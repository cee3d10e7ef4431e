// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use edgefirst_ipu::{
    hw::IpuDevice,
    sim::{SimDevice, SimDisplay},
    snapshot::encode_jpeg,
    Architecture, FrameUpdate, TaskBuilder, TaskConfig, TransformDevice,
};
use kanal::Receiver;
use std::{
    error::Error,
    fs, thread,
    time::{Duration, Instant},
};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer};

/// One completed update, handed to the stats thread.
struct Completed {
    frame: u64,
    index: usize,
    elapsed: Duration,
}

fn init_tracing(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout = tracing_subscriber::fmt::layer().with_filter(level);
    let journald = match tracing_journald::layer() {
        Ok(layer) => Some(layer.with_filter(level)),
        Err(e) => {
            eprintln!("journald unavailable: {e}");
            None
        }
    };
    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default())
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(stdout)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn update_fps(prev: &mut Instant, history: &mut [u64], index: &mut usize) -> u64 {
    let now = Instant::now();
    let elapsed = now.duration_since(*prev);
    *prev = now;

    history[*index] = 1_000_000_000 / elapsed.as_nanos().max(1) as u64;
    *index = (*index + 1) % history.len();

    history.iter().sum::<u64>() / history.len() as u64
}

fn stats(rx: Receiver<Completed>, interval: u64) -> u64 {
    let mut prev = Instant::now();
    let mut history = [0; 30];
    let mut index = 0;
    let mut count = 0;
    let mut slowest = Duration::ZERO;

    while let Ok(done) = rx.recv() {
        let fps = update_fps(&mut prev, &mut history, &mut index);
        slowest = slowest.max(done.elapsed);
        count += 1;
        if done.frame % interval == 0 {
            info!(
                frame = done.frame,
                output = done.index,
                fps,
                "update took {:?}, slowest {:?}",
                done.elapsed,
                slowest
            );
        }
    }
    count
}

/// Fills an input buffer with a diagonal ramp so every frame has content.
fn fill_pattern(pixels: &mut [u8], seed: usize) {
    for (i, px) in pixels.iter_mut().enumerate() {
        *px = ((i / 7 + seed * 64) & 0xff) as u8;
    }
}

fn run<D: TransformDevice>(builder: TaskBuilder<D>, args: &Args) -> Result<(), Box<dyn Error>> {
    let config = TaskConfig::from(args);
    let mut task = builder.init(&config)?;
    info!(mode = ?task.mode(), shape = ?task.shape(), "running {} frames", args.frames);

    for index in 0..task.plan().slots() {
        if let Some(pixels) = task.input_mut(index) {
            fill_pattern(pixels, index);
        }
    }

    let (tx, rx) = kanal::bounded(8);
    let interval = if args.verbose { 1 } else { 30 };
    let consumer = thread::Builder::new()
        .name("stats".to_string())
        .spawn(move || stats(rx, interval))?;

    let mut last = None;
    for frame in 0..args.frames {
        let start = Instant::now();
        match task.update(&FrameUpdate::default()) {
            Ok(update) => {
                last = Some(update.completed);
                let done = Completed {
                    frame,
                    index: update.completed,
                    elapsed: start.elapsed(),
                };
                if tx.send(done).is_err() {
                    warn!("stats thread exited");
                    break;
                }
            }
            Err(e) if e.is_retryable() => warn!("frame {frame}: {e}"),
            Err(e) => return Err(e.into()),
        }
    }
    drop(tx);
    let completed = consumer.join().map_err(|_| "stats thread panicked")?;
    info!(
        completed,
        input_frames = task.input_frames(),
        output_frames = task.output_frames(),
        "done"
    );

    if let (Some(path), Some(index)) = (&args.snapshot, last) {
        match task.output(index) {
            Some(pixels) => {
                let jpeg = encode_jpeg(pixels, &config.output.frame)?;
                fs::write(path, &jpeg[..])?;
                info!("wrote {} ({} KB)", path.display(), jpeg.len() / 1024);
            }
            None => warn!("output buffer {index} is not mapped, skipping snapshot"),
        }
    }

    task.uninit();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(&args)?;

    if args.sim {
        let mut builder =
            TaskBuilder::new(SimDevice::new()).with_architecture(Architecture::default());
        if args.display.is_some() {
            let bpp = args.output_format.bits_per_pixel();
            builder = builder.with_display(SimDisplay::new(1024, 768, bpp, None));
        }
        run(builder, &args)
    } else {
        run(TaskBuilder::new(IpuDevice::open()?), &args)
    }
}
