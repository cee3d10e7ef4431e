// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_ipu::{
    format::FourCC, DisplayTarget, Frame, Mode, Operation, Path, PathSet, Rect, Rotation,
    TaskConfig,
};
use std::{path::PathBuf, time::Duration};

/// Output rotation and flip options.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum RotationSetting {
    /// No rotation
    None,
    /// Flip top-bottom
    Vertical,
    /// Flip left-right
    Horizontal,
    /// Rotate 180 degrees
    Rotate180,
    /// Rotate 90 degrees clockwise
    Rotate90,
    /// Rotate 90 degrees clockwise, then flip top-bottom
    Rotate90Vertical,
    /// Rotate 90 degrees clockwise, then flip left-right
    Rotate90Horizontal,
    /// Rotate 90 degrees counter-clockwise
    Rotate270,
}

impl From<RotationSetting> for Rotation {
    fn from(setting: RotationSetting) -> Self {
        match setting {
            RotationSetting::None => Rotation::None,
            RotationSetting::Vertical => Rotation::VFlip,
            RotationSetting::Horizontal => Rotation::HFlip,
            RotationSetting::Rotate180 => Rotation::Rotate180,
            RotationSetting::Rotate90 => Rotation::Rotate90Right,
            RotationSetting::Rotate90Vertical => Rotation::Rotate90RightVFlip,
            RotationSetting::Rotate90Horizontal => Rotation::Rotate90RightHFlip,
            RotationSetting::Rotate270 => Rotation::Rotate90Left,
        }
    }
}

/// IPU data paths a task may be placed on.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum PathSetting {
    /// Pre-processing encode path
    Encode,
    /// Pre-processing viewfinder path
    Viewfinder,
    /// Post-processing path
    PostProcess,
}

impl From<PathSetting> for Path {
    fn from(setting: PathSetting) -> Self {
        match setting {
            PathSetting::Encode => Path::Encode,
            PathSetting::Viewfinder => Path::Viewfinder,
            PathSetting::PostProcess => Path::PostProcess,
        }
    }
}

/// Command-line arguments for the IPU task runner.
///
/// Every option can also be given through the environment variable named
/// next to it.
///
/// # Example
///
/// ```bash
/// # Resize a 640x480 UYVY test pattern to 320x240 RGB565 and save it
/// ipu-task --input-size "640 480" --output-size "320 240" --snapshot out.jpg
///
/// # Stream rotated output to the foreground framebuffer
/// export DISPLAY_FB=2
/// ipu-task --rotation rotate90 --streaming --frames 300
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Input resolution in pixels (width height)
    #[arg(
        long,
        env = "INPUT_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub input_size: Vec<u32>,

    /// Input pixel format as a four character code
    #[arg(long, env = "INPUT_FORMAT", default_value = "UYVY")]
    pub input_format: FourCC,

    /// Input crop window (x y width height)
    #[arg(long, env = "CROP", value_delimiter = ' ', num_args = 4)]
    pub crop: Vec<u32>,

    /// Output resolution in pixels (width height)
    #[arg(
        long,
        env = "OUTPUT_SIZE",
        default_value = "320 240",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub output_size: Vec<u32>,

    /// Output pixel format as a four character code
    #[arg(long, env = "OUTPUT_FORMAT", default_value = "RGBP")]
    pub output_format: FourCC,

    /// Output placement window (x y width height)
    #[arg(long, env = "WINDOW", value_delimiter = ' ', num_args = 4)]
    pub window: Vec<u32>,

    /// Output rotation
    #[arg(long, env = "ROTATION", default_value = "none", value_enum)]
    pub rotation: RotationSetting,

    /// Paths the task may use, all of them when empty
    #[arg(long, env = "PATHS", value_enum, value_delimiter = ',')]
    pub paths: Vec<PathSetting>,

    /// Double-buffer input and triple-buffer output
    #[arg(long, env = "STREAMING")]
    pub streaming: bool,

    /// Present output on /dev/fbN instead of memory
    #[arg(long, env = "DISPLAY_FB")]
    pub display: Option<u32>,

    /// Position of the output on the display (x y)
    #[arg(
        long,
        env = "DISPLAY_POS",
        default_value = "0 0",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub display_pos: Vec<u16>,

    /// Number of frames to run
    #[arg(short, long, env = "FRAMES", default_value = "100")]
    pub frames: u64,

    /// Longest wait for one frame in milliseconds
    #[arg(long, env = "FRAME_TIMEOUT", default_value = "1000")]
    pub frame_timeout: u64,

    /// Run against the in-memory device model instead of /dev/mxc_ipu
    #[arg(long, env = "SIM")]
    pub sim: bool,

    /// Write the last completed output frame to this JPEG file
    #[arg(long, env = "SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

fn rect(values: &[u32]) -> Option<Rect> {
    match values {
        [x, y, width, height] => Some(Rect::new(*x, *y, *width, *height)),
        _ => None,
    }
}

impl From<&Args> for TaskConfig {
    fn from(args: &Args) -> Self {
        let mut config = TaskConfig::default();

        config.input.frame = Frame::new(args.input_size[0], args.input_size[1], args.input_format);
        config.input.crop = rect(&args.crop);

        config.output.frame =
            Frame::new(args.output_size[0], args.output_size[1], args.output_format);
        config.output.window = rect(&args.window);
        config.output.rotation = args.rotation.into();
        config.output.display = args.display.map(|fb| DisplayTarget {
            fb,
            x: args.display_pos[0],
            y: args.display_pos[1],
        });

        config.mode = Mode {
            preference: args.paths.iter().copied().map(Path::from).collect::<PathSet>(),
            operation: if args.streaming {
                Operation::Streaming
            } else {
                Operation::Normal
            },
        };
        config.frame_timeout = Duration::from_millis(args.frame_timeout);
        config
    }
}
