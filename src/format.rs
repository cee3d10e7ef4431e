// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use core::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Four character pixel format code as understood by the IPU driver.
///
/// The driver takes the little-endian packing of the four bytes, which is
/// what [`FourCC::to_u32`] returns.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

/// RGB 5:6:5 16-bit
pub const RGBP: FourCC = FourCC(*b"RGBP");
/// BGR 24-bit
pub const BGR3: FourCC = FourCC(*b"BGR3");
/// RGB 24-bit (8 bits per channel, no alpha)
pub const RGB3: FourCC = FourCC(*b"RGB3");
/// BGR 32-bit, unused alpha
pub const BGR4: FourCC = FourCC(*b"BGR4");
/// BGRA 32-bit
pub const BGRA: FourCC = FourCC(*b"BGRA");
/// RGB 32-bit, unused alpha
pub const RGB4: FourCC = FourCC(*b"RGB4");
/// RGBA 32-bit (8 bits per channel, with alpha)
pub const RGBA: FourCC = FourCC(*b"RGBA");
/// ABGR 32-bit
pub const ABGR: FourCC = FourCC(*b"ABGR");
/// YUYV 4:2:2 packed
pub const YUYV: FourCC = FourCC(*b"YUYV");
/// UYVY 4:2:2 packed
pub const UYVY: FourCC = FourCC(*b"UYVY");
/// YUV 4:4:4 packed
pub const Y444: FourCC = FourCC(*b"Y444");
/// NV12 4:2:0 semi-planar
pub const NV12: FourCC = FourCC(*b"NV12");
/// YUV 4:2:0 planar
pub const I420: FourCC = FourCC(*b"I420");
/// YUV 4:2:0 planar, alternate code
pub const YU12: FourCC = FourCC(*b"YU12");
/// YVU 4:2:2 planar
pub const YV16: FourCC = FourCC(*b"YV16");
/// YUV 4:2:2 planar
pub const YUV422P: FourCC = FourCC(*b"422P");
/// 8-bit generic data, used for local alpha planes
pub const GENERIC: FourCC = FourCC(*b"IPU0");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Rgb,
    Yuv,
}

impl FourCC {
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub fn bits_per_pixel(self) -> u32 {
        match self {
            RGBP | YUYV | UYVY | YUV422P | YV16 => 16,
            BGR3 | RGB3 | Y444 => 24,
            BGR4 | BGRA | RGB4 | RGBA | ABGR => 32,
            I420 | YU12 | NV12 => 12,
            _ => 8,
        }
    }

    /// Bytes per pixel of the first plane. Planar formats count their luma
    /// plane only.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            RGBP | YUYV | UYVY => 2,
            BGR3 | RGB3 | Y444 => 3,
            BGR4 | BGRA | RGB4 | RGBA | ABGR => 4,
            _ => 1,
        }
    }

    pub fn color_space(self) -> Option<ColorSpace> {
        match self {
            RGBP | BGR3 | RGB3 | BGR4 | BGRA | RGB4 | RGBA | ABGR => Some(ColorSpace::Rgb),
            YUYV | UYVY | Y444 | NV12 | I420 | YU12 | YV16 | YUV422P => Some(ColorSpace::Yuv),
            _ => None,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(self, I420 | YU12 | YV16 | YUV422P | NV12)
    }

    /// Bytes occupied by a `width` x `height` frame.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bits_per_pixel() as usize / 8
    }

    /// Whether converting from `self` to `output` crosses colour spaces.
    pub fn needs_csc(self, output: FourCC) -> Result<bool> {
        match (self.color_space(), output.color_space()) {
            (Some(input), Some(out)) => Ok(input != out),
            (None, _) => Err(Error::invalid(format!("unsupported input format {self}"))),
            (_, None) => Err(Error::invalid(format!("unsupported output format {output}"))),
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

impl FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("pixel format must be four characters, got {s:?}"))?;
        Ok(FourCC(bytes))
    }
}
