// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Working dimensions and plane offsets for frames and their windows.
//!
//! The IPU DMA engines only accept widths that are a multiple of
//! [`ALIGN`] pixels, so every working width is aligned down. Heights are
//! aligned only where the hardware requires it (cropped inputs, display
//! outputs and rotated outputs); the caller decides through the
//! `align_height` flag of [`resolve`].

use ipu_sys::{
    IPU_ROTATE_180, IPU_ROTATE_90_LEFT, IPU_ROTATE_90_RIGHT, IPU_ROTATE_90_RIGHT_HFLIP,
    IPU_ROTATE_90_RIGHT_VFLIP, IPU_ROTATE_HORIZ_FLIP, IPU_ROTATE_NONE, IPU_ROTATE_VERT_FLIP,
};

use crate::{
    error::{Error, Result},
    format::{FourCC, I420, NV12, RGBA, YU12, YUV422P, YV16},
};

/// Pixel alignment of working widths.
pub const ALIGN: u32 = 8;

pub const fn align_down(v: u32) -> u32 {
    v - v % ALIGN
}

/// Rectangle specification for crop and placement windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    /// X coordinate of top-left corner
    pub x: u32,
    /// Y coordinate of top-left corner
    pub y: u32,
    /// Width of the rectangle in pixels
    pub width: u32,
    /// Height of the rectangle in pixels
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// A window with no size selects the whole frame.
    pub fn is_unset(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

/// Declared dimensions and format of a frame in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: FourCC,
}

impl Frame {
    pub const fn new(width: u32, height: u32, format: FourCC) -> Self {
        Frame {
            width,
            height,
            format,
        }
    }

    pub fn size(&self) -> usize {
        self.format.frame_size(self.width, self.height)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame::new(0, 0, RGBA)
    }
}

/// Byte offsets of a window into its frame. The chroma offsets are relative
/// to the luma offset, the way the IDMAC parameter memory expects them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneOffsets {
    pub base: u32,
    pub u: u32,
    pub v: u32,
}

/// Result of resolving a frame and optional window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub offsets: PlaneOffsets,
}

impl Layout {
    pub fn swapped(&self) -> (u32, u32) {
        (self.height, self.width)
    }
}

/// Output rotation and flip modes, in the driver's numbering.
///
/// The ordering matters: every mode at or past [`Rotation::Rotate90Right`]
/// swaps the output axes, and the architecture decides from which mode on
/// the rotation engine is needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Rotation {
    #[default]
    None = IPU_ROTATE_NONE,
    VFlip = IPU_ROTATE_VERT_FLIP,
    HFlip = IPU_ROTATE_HORIZ_FLIP,
    Rotate180 = IPU_ROTATE_180,
    Rotate90Right = IPU_ROTATE_90_RIGHT,
    Rotate90RightVFlip = IPU_ROTATE_90_RIGHT_VFLIP,
    Rotate90RightHFlip = IPU_ROTATE_90_RIGHT_HFLIP,
    Rotate90Left = IPU_ROTATE_90_LEFT,
}

impl Rotation {
    pub fn swaps_axes(self) -> bool {
        self >= Rotation::Rotate90Right
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Maps clockwise degrees (0, 90, 180, 270) to a rotation.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Rotate90Right),
            180 => Some(Rotation::Rotate180),
            270 => Some(Rotation::Rotate90Left),
            _ => None,
        }
    }
}

/// Computes the aligned working size of `window` (or the whole frame) and
/// its plane offsets.
///
/// A window reaching past the frame is clamped to it. Offsets stay zero
/// without a window or when the window covers the whole frame.
pub fn resolve(frame: &Frame, window: Option<&Rect>, align_height: bool) -> Result<Layout> {
    let window = window.filter(|w| !w.is_unset());

    let (x, y, width, height) = match window {
        Some(w) => {
            let x = w.x.min(frame.width);
            let y = w.y.min(frame.height);
            (
                x,
                y,
                w.width.min(frame.width - x),
                w.height.min(frame.height - y),
            )
        }
        None => (0, 0, frame.width, frame.height),
    };

    let width = align_down(width);
    let height = if align_height {
        align_down(height)
    } else {
        height
    };

    if width == 0 || height == 0 {
        return Err(Error::invalid(format!(
            "window {window:?} of {}x{} frame leaves no pixels after alignment",
            frame.width, frame.height
        )));
    }

    let offsets = if window.is_some() && (width != frame.width || height != frame.height) {
        plane_offsets(frame, x, y)
    } else {
        PlaneOffsets::default()
    };

    Ok(Layout {
        width,
        height,
        offsets,
    })
}

/// Offsets of the pixel at (`x`, `y`) in every plane of `frame`.
pub fn plane_offsets(frame: &Frame, x: u32, y: u32) -> PlaneOffsets {
    let (w, h) = (frame.width, frame.height);
    let base = y * w + x;
    // Distance from the window start to the start of the first chroma plane.
    let to_chroma = w * (h - y) - x;

    match frame.format {
        I420 | YU12 => {
            let u = to_chroma + (w / 2) * (y / 2) + x / 2;
            PlaneOffsets {
                base,
                u,
                v: u + (w / 2) * (h / 2),
            }
        }
        YV16 => {
            let v = to_chroma + (w * y) / 2 + x / 2;
            PlaneOffsets {
                base,
                u: v + (w * h) / 2,
                v,
            }
        }
        YUV422P => {
            let u = to_chroma + (w * y) / 2 + x / 2;
            PlaneOffsets {
                base,
                u,
                v: u + (w * h) / 2,
            }
        }
        NV12 => PlaneOffsets {
            base,
            u: to_chroma + w * (y / 2) + x,
            v: 0,
        },
        format => PlaneOffsets {
            base: base * format.bits_per_pixel() / 8,
            u: 0,
            v: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::YUYV;

    #[test]
    fn full_frame_width_aligned() {
        let l = resolve(&Frame::new(642, 481, RGBA), None, false).unwrap();
        assert_eq!((l.width, l.height), (640, 481));
        assert_eq!(l.offsets.base, 0);

        let l = resolve(&Frame::new(642, 481, RGBA), None, true).unwrap();
        assert_eq!((l.width, l.height), (640, 480));
    }

    #[test]
    fn unset_window_is_full_frame() {
        let frame = Frame::new(320, 240, YUYV);
        let l = resolve(&frame, Some(&Rect::default()), false).unwrap();
        assert_eq!((l.width, l.height), (320, 240));
    }

    #[test]
    fn packed_offset() {
        let frame = Frame::new(320, 240, YUYV);
        let l = resolve(&frame, Some(&Rect::new(16, 2, 64, 64)), true).unwrap();
        assert_eq!(l.offsets.base, (2 * 320 + 16) * 2);
        assert_eq!(l.offsets.u, 0);
    }

    #[test]
    fn empty_after_clamp() {
        let frame = Frame::new(320, 240, YUYV);
        assert!(resolve(&frame, Some(&Rect::new(316, 0, 64, 64)), true).is_err());
        assert!(resolve(&frame, Some(&Rect::new(400, 0, 64, 64)), true).is_err());
    }

    #[test]
    fn rotation_order() {
        assert!(!Rotation::Rotate180.swaps_axes());
        assert!(Rotation::Rotate90Left.swaps_axes());
        assert_eq!(Rotation::from_degrees(270), Some(Rotation::Rotate90Left));
        assert_eq!(Rotation::from_degrees(45), None);
        assert_eq!(Rotation::HFlip.raw(), 2);
    }
}
