// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Presenting task output on an MXC framebuffer.
//!
//! The framebuffer is configured with a virtual height of three screens.
//! Page 1 is the base of framebuffer memory, page 0 the second screen and
//! page 2 the third; [`Presenter::pan`] flips between them by index.

use std::io;
use tracing::{debug, info, instrument, warn};

use crate::{
    device::PhysAddr,
    error::{Error, HardwareContext, Result},
    format::{ColorSpace, FourCC},
};

/// Number of screens the presenter cycles through.
pub const PAGES: u32 = 3;

/// Display plane backing a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayChannel {
    Background,
    DisplayController,
    Foreground,
}

impl DisplayChannel {
    /// Plane conventionally behind `/dev/fb{fb}` when the driver does not
    /// report one.
    pub fn default_for(fb: u32) -> Self {
        match fb {
            0 => DisplayChannel::Background,
            1 => DisplayChannel::DisplayController,
            _ => DisplayChannel::Foreground,
        }
    }
}

/// The part of the variable screen information the presenter touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarInfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    /// Non-standard pixel format, zero for the default RGB layout.
    pub nonstd: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixInfo {
    pub smem_start: PhysAddr,
    pub line_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blank {
    Unblank,
    Powerdown,
}

pub trait DisplaySurface: Send {
    fn var_info(&self) -> io::Result<VarInfo>;
    /// Applies `var`. With `force` the driver reprograms the mode even if
    /// nothing changed.
    fn set_var_info(&self, var: &VarInfo, force: bool) -> io::Result<()>;
    fn fix_info(&self) -> io::Result<FixInfo>;
    fn channel(&self) -> io::Result<DisplayChannel>;
    fn set_overlay_pos(&self, x: u16, y: u16) -> io::Result<()>;
    fn pan(&self, yoffset: u32) -> io::Result<()>;
    fn blank(&self, blank: Blank) -> io::Result<()>;
    /// Copies `len` bytes of framebuffer memory from offset `from` to `to`.
    fn copy_page(&self, from: usize, to: usize, len: usize) -> io::Result<()>;
}

/// Where task output goes on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayTarget {
    /// Framebuffer device number, `/dev/fb{fb}`.
    pub fb: u32,
    pub x: u16,
    pub y: u16,
}

/// Whether `var` already holds three pages of the output.
fn fits(var: &VarInfo, width: u32, height: u32, format: FourCC, chan: DisplayChannel) -> bool {
    let triple = var.xres_virtual == var.xres && var.yres_virtual == PAGES * var.yres;
    if chan == DisplayChannel::Background {
        return triple;
    }

    let code = format.to_u32();
    match format.color_space() {
        Some(ColorSpace::Yuv) if var.nonstd != code => return false,
        Some(ColorSpace::Rgb) if var.nonstd != 0 && var.nonstd != code => return false,
        _ => {}
    }

    match chan {
        DisplayChannel::DisplayController => triple,
        DisplayChannel::Foreground => {
            var.xres == width
                && var.xres_virtual == width
                && var.yres == height
                && var.yres_virtual == PAGES * height
                && var.bits_per_pixel == format.bits_per_pixel()
        }
        DisplayChannel::Background => triple,
    }
}

/// Mode that makes `var` fit, and whether it must be forced.
fn reconfigured(
    var: &VarInfo,
    width: u32,
    height: u32,
    format: FourCC,
    chan: DisplayChannel,
) -> (VarInfo, bool) {
    let mut var = *var;
    if chan == DisplayChannel::Foreground {
        var.xres = width;
        var.yres = height;
    }
    var.xres_virtual = var.xres;
    var.yres_virtual = var.yres * PAGES;
    if chan == DisplayChannel::Background {
        return (var, false);
    }
    var.nonstd = format.to_u32();
    var.bits_per_pixel = format.bits_per_pixel();
    (var, true)
}

/// A framebuffer attached to a task's output.
pub struct Presenter {
    surface: Box<dyn DisplaySurface>,
    channel: DisplayChannel,
    yres: u32,
    stride: u32,
    screen_size: u32,
    pages: [PhysAddr; PAGES as usize],
}

impl Presenter {
    /// Prepares `surface` to show `width` x `height` frames of `format`.
    ///
    /// With `streaming` and a partial-screen output on a full-screen plane,
    /// the visible page is duplicated into the others so flipping does not
    /// flash stale content around the output window.
    #[instrument(skip(surface))]
    pub fn attach(
        surface: Box<dyn DisplaySurface>,
        target: DisplayTarget,
        width: u32,
        height: u32,
        format: FourCC,
        streaming: bool,
    ) -> Result<Self> {
        let channel = surface.channel().unwrap_or_else(|e| {
            let chan = DisplayChannel::default_for(target.fb);
            warn!("fb{} plane query failed: {e}, assuming {chan:?}", target.fb);
            chan
        });

        let mut var = surface.var_info().op("FBIOGET_VSCREENINFO")?;
        let mut fix = surface.fix_info().op("FBIOGET_FSCREENINFO")?;

        if !fits(&var, width, height, format, channel) {
            let (new, force) = reconfigured(&var, width, height, format, channel);
            info!("reconfiguring fb{} to {new:?}", target.fb);
            surface
                .set_var_info(&new, force)
                .op("FBIOPUT_VSCREENINFO")?;
            fix = surface.fix_info().op("FBIOGET_FSCREENINFO")?;
            var = surface.var_info().op("FBIOGET_VSCREENINFO")?;
        }

        if channel == DisplayChannel::Foreground {
            if let Err(e) = surface.set_overlay_pos(target.x, target.y) {
                warn!("setting overlay position failed: {e}");
            }
        }

        if width > var.xres || height > var.yres || format.bits_per_pixel() != var.bits_per_pixel
        {
            return Err(Error::invalid(format!(
                "{width}x{height} {format} output does not fit fb{} ({}x{} {} bpp)",
                target.fb, var.xres, var.yres, var.bits_per_pixel
            )));
        }

        let bytes_pp = var.bits_per_pixel / 8;
        let stride = var.xres * bytes_pp;
        let offset = match channel {
            DisplayChannel::Foreground => 0,
            _ => target.y as u32 * stride + target.x as u32 * bytes_pp,
        };
        let screen_size = var.yres * fix.line_length;
        let base = fix.smem_start + offset;
        let pages = [base + screen_size, base, base + 2 * screen_size];

        debug!(stride, screen_size, ?pages, "fb{} pages", target.fb);

        if channel != DisplayChannel::Foreground
            && streaming
            && (width < var.xres || height < var.yres)
        {
            let len = screen_size as usize;
            for page in 1..PAGES as usize {
                surface
                    .copy_page(0, page * len, len)
                    .op("framebuffer copy")?;
            }
        }

        if let Err(e) = surface.blank(Blank::Unblank) {
            warn!("unblanking fb{} failed: {e}", target.fb);
        }

        Ok(Presenter {
            surface,
            channel,
            yres: var.yres,
            stride,
            screen_size,
            pages,
        })
    }

    pub fn channel(&self) -> DisplayChannel {
        self.channel
    }

    /// Line length in bytes of the output window on screen.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn pages(&self) -> [PhysAddr; PAGES as usize] {
        self.pages
    }

    /// Shows page `index`.
    pub fn pan(&self, index: usize) -> Result<()> {
        let yoffset = match index {
            0 => self.yres,
            1 => 0,
            _ => 2 * self.yres,
        };
        self.surface.pan(yoffset).op("FBIOPAN_DISPLAY")
    }

    /// Moves the foreground plane back to the origin.
    pub fn clear_position(&self) {
        if self.channel == DisplayChannel::Foreground {
            if let Err(e) = self.surface.set_overlay_pos(0, 0) {
                warn!("clearing overlay position failed: {e}");
            }
        }
    }

    /// Leaves the last shown frame at the framebuffer base and restores the
    /// mode.
    pub fn detach(self) {
        let len = self.screen_size as usize;
        if let Err(e) = self.surface.copy_page(len, 0, len) {
            warn!("restoring base page failed: {e}");
        }

        match self.surface.var_info() {
            Ok(var) => {
                if let Err(e) = self.surface.set_var_info(&var, true) {
                    warn!("refreshing display mode failed: {e}");
                }
            }
            Err(e) => warn!("reading display mode failed: {e}"),
        }

        if self.channel == DisplayChannel::Foreground {
            if let Err(e) = self.surface.blank(Blank::Powerdown) {
                warn!("powering down foreground failed: {e}");
            }
        }
        debug!("display detached");
    }
}

impl std::fmt::Debug for Presenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presenter")
            .field("channel", &self.channel)
            .field("stride", &self.stride)
            .field("pages", &self.pages)
            .finish()
    }
}
