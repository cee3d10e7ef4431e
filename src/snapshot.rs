// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! JPEG snapshots of task buffers for inspection off the device.

use std::{error::Error, io};
use tracing::debug;
use turbojpeg::{OwnedBuf, PixelFormat, Subsamp, YuvImage};

use crate::{
    format::{
        FourCC, ABGR, BGR3, BGR4, BGRA, I420, RGB3, RGB4, RGBA, RGBP, UYVY, YU12, YUV422P, YUYV,
    },
    geometry::Frame,
};

const QUALITY: i32 = 90;

/// Compresses the `frame` pixels in `pix` to JPEG.
///
/// Packed RGB formats and the 4:2:0/4:2:2 YUV formats are supported.
///
/// ```no_run
/// use edgefirst_ipu::{format::RGBA, geometry::Frame, snapshot::encode_jpeg};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let frame = Frame::new(640, 480, RGBA);
/// let pix = vec![0u8; frame.size()];
/// let jpeg = encode_jpeg(&pix, &frame)?;
/// println!("Compressed to {} bytes", jpeg.len());
/// # Ok(())
/// # }
/// ```
pub fn encode_jpeg(pix: &[u8], frame: &Frame) -> Result<OwnedBuf, Box<dyn Error>> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    if pix.len() < frame.size() {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} bytes is short of a {width}x{height} {} frame",
                pix.len(),
                frame.format
            ),
        )));
    }
    debug!("encoding {width}x{height} {}", frame.format);

    let packed = |pixels: &[u8], format: PixelFormat| {
        let pitch = width * format.size();
        turbojpeg::compress(
            turbojpeg::Image {
                pixels,
                width,
                pitch,
                height,
                format,
            },
            QUALITY,
            Subsamp::Sub2x2,
        )
    };
    let planar = |pixels: &[u8], subsamp: Subsamp| {
        turbojpeg::compress_yuv(
            YuvImage {
                pixels,
                width,
                align: 1,
                height,
                subsamp,
            },
            QUALITY,
        )
    };

    let jpeg = match frame.format {
        RGB3 => packed(pix, PixelFormat::RGB)?,
        BGR3 => packed(pix, PixelFormat::BGR)?,
        RGB4 => packed(pix, PixelFormat::RGBX)?,
        RGBA => packed(pix, PixelFormat::RGBA)?,
        BGR4 => packed(pix, PixelFormat::BGRX)?,
        BGRA => packed(pix, PixelFormat::BGRA)?,
        ABGR => packed(pix, PixelFormat::ABGR)?,
        RGBP => packed(&expand_rgb565(pix, width * height), PixelFormat::RGB)?,
        I420 | YU12 => planar(pix, Subsamp::Sub2x2)?,
        YUV422P => planar(pix, Subsamp::Sub2x1)?,
        YUYV | UYVY => planar(
            &deinterleave_422(pix, width, height, frame.format == UYVY),
            Subsamp::Sub2x1,
        )?,
        other => return Err(unsupported(other)),
    };
    Ok(jpeg)
}

fn unsupported(format: FourCC) -> Box<dyn Error> {
    Box::new(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("no JPEG path for {format}"),
    ))
}

fn expand_rgb565(pix: &[u8], pixels: usize) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels * 3);
    for px in pix.chunks_exact(2).take(pixels) {
        let v = u16::from_le_bytes([px[0], px[1]]);
        let r = ((v >> 11) & 0x1f) as u8;
        let g = ((v >> 5) & 0x3f) as u8;
        let b = (v & 0x1f) as u8;
        rgb.extend_from_slice(&[
            (r << 3) | (r >> 2),
            (g << 2) | (g >> 4),
            (b << 3) | (b >> 2),
        ]);
    }
    rgb
}

/// Splits packed 4:2:2 into Y, U and V planes.
fn deinterleave_422(pix: &[u8], width: usize, height: usize, uyvy: bool) -> Vec<u8> {
    let luma = width * height;
    let chroma = width.div_ceil(2) * height;
    let mut out = vec![0u8; luma + 2 * chroma];
    let (y, uv) = out.split_at_mut(luma);
    let (u, v) = uv.split_at_mut(chroma);

    let (yo, uo, vo) = if uyvy { (1, 0, 2) } else { (0, 1, 3) };
    for (i, quad) in pix.chunks_exact(4).take(luma / 2).enumerate() {
        y[2 * i] = quad[yo];
        y[2 * i + 1] = quad[yo + 2];
        u[i] = quad[uo];
        v[i] = quad[vo];
    }
    out
}
