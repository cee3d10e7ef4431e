// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst i.MX IPU Task Library
//!
//! Runs memory-to-memory image transforms on the Image Processing Unit of
//! i.MX5x/6 SoCs: colour space conversion, resizing, cropping, flips and
//! rotation, optional overlay blending, with the result written to memory
//! or presented on an MXC framebuffer.
//!
//! ## Features
//!
//! - **Resource arbitration**: the IC and ROT engines on the encode,
//!   viewfinder and post-processing paths are claimed per task, so tasks
//!   in one process never share a channel.
//! - **Automatic shaping**: a request is classified as a copy, a convert,
//!   a rotation or a chained convert and rotate, and outputs wider than
//!   the convert engine are split into two stripes.
//! - **Streaming**: double-buffered input and triple-buffered output keep
//!   the hardware busy while the caller fills the next frame.
//! - **Display**: output can be panned across three framebuffer pages.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_ipu::{
//!     format::{RGBP, UYVY},
//!     geometry::Frame,
//!     hw::IpuDevice,
//!     FrameUpdate, Task, TaskConfig,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = TaskConfig::default();
//! config.input.frame = Frame::new(640, 480, UYVY);
//! config.output.frame = Frame::new(320, 240, RGBP);
//!
//! let mut task = Task::init(IpuDevice::open()?, &config)?;
//! if let Some(pixels) = task.input_mut(0) {
//!     pixels.fill(0x80);
//! }
//! let done = task.update(&FrameUpdate::default())?;
//! let frame = task.output(done.completed);
//! # let _ = frame;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: BSP kernel exposing `/dev/mxc_ipu` and the MXC framebuffer
//!   driver.
//! - Without hardware, [`sim::SimDevice`] and [`sim::SimDisplay`] stand in
//!   for the driver.
//!
//! ## Safety
//!
//! The `unsafe` ioctl and mmap calls are confined to the [`hw`] module.

pub mod arbiter;
pub mod arch;
pub mod buffer;
pub mod channel;
pub mod device;
pub mod display;
pub mod error;
pub mod format;
pub mod geometry;
pub mod hw;
pub mod pipeline;
pub mod plan;
pub mod resource;
pub mod sim;
pub mod snapshot;
pub mod stripe;
pub mod task;

pub use arbiter::{Arbiter, TaskMode};
pub use arch::Architecture;
pub use device::{PhysAddr, TransformDevice};
pub use display::{DisplaySurface, DisplayTarget};
pub use error::{Error, Result};
pub use geometry::{Frame, Rect, Rotation};
pub use pipeline::{FrameUpdate, Update};
pub use resource::{Path, PathSet, Registry};
pub use task::{
    InputParams, Mode, Operation, OutputParams, OverlayAlpha, OverlayParams, Task, TaskBuilder,
    TaskConfig,
};
