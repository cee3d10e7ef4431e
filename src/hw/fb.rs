// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::{AsRawFd, RawFd},
};

use ipu_sys as sys;
use tracing::debug;

use super::Mapping;
use crate::{
    device::BufferMap,
    display::{Blank, DisplayChannel, DisplaySurface, FixInfo, VarInfo},
};

/// An MXC framebuffer device, `/dev/fb{n}`.
#[derive(Debug)]
pub struct Framebuffer {
    file: File,
    index: u32,
}

impl Framebuffer {
    pub fn open(index: u32) -> io::Result<Self> {
        let path = format!("/dev/fb{index}");
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!("opened {path}");
        Ok(Framebuffer { file, index })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn raw_var(&self) -> io::Result<sys::fb_var_screeninfo> {
        let mut var = sys::fb_var_screeninfo::default();
        unsafe { sys::fbioget_vscreeninfo(self.fd(), &mut var) }?;
        Ok(var)
    }

    fn raw_fix(&self) -> io::Result<sys::fb_fix_screeninfo> {
        let mut fix = sys::fb_fix_screeninfo::default();
        unsafe { sys::fbioget_fscreeninfo(self.fd(), &mut fix) }?;
        Ok(fix)
    }
}

impl DisplaySurface for Framebuffer {
    fn var_info(&self) -> io::Result<VarInfo> {
        let var = self.raw_var()?;
        Ok(VarInfo {
            xres: var.xres,
            yres: var.yres,
            xres_virtual: var.xres_virtual,
            yres_virtual: var.yres_virtual,
            yoffset: var.yoffset,
            bits_per_pixel: var.bits_per_pixel,
            nonstd: var.nonstd,
        })
    }

    fn set_var_info(&self, info: &VarInfo, force: bool) -> io::Result<()> {
        let mut var = self.raw_var()?;
        var.xres = info.xres;
        var.yres = info.yres;
        var.xres_virtual = info.xres_virtual;
        var.yres_virtual = info.yres_virtual;
        var.yoffset = info.yoffset;
        var.bits_per_pixel = info.bits_per_pixel;
        var.nonstd = info.nonstd;
        var.activate = if force { sys::FB_ACTIVATE_FORCE } else { 0 };
        unsafe { sys::fbioput_vscreeninfo(self.fd(), &var) }?;
        Ok(())
    }

    fn fix_info(&self) -> io::Result<FixInfo> {
        let fix = self.raw_fix()?;
        let smem_start = u32::try_from(fix.smem_start).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "framebuffer above 4 GiB")
        })?;
        Ok(FixInfo {
            smem_start,
            line_length: fix.line_length,
        })
    }

    fn channel(&self) -> io::Result<DisplayChannel> {
        let mut chan: u32 = 0;
        unsafe { sys::mxcfb_get_fb_ipu_chan(self.fd(), &mut chan) }?;
        match chan {
            sys::MEM_BG_SYNC => Ok(DisplayChannel::Background),
            sys::MEM_DC_SYNC => Ok(DisplayChannel::DisplayController),
            sys::MEM_FG_SYNC => Ok(DisplayChannel::Foreground),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected display channel {other:#x}"),
            )),
        }
    }

    fn set_overlay_pos(&self, x: u16, y: u16) -> io::Result<()> {
        let mut pos = sys::mxcfb_pos { x, y };
        unsafe { sys::mxcfb_set_overlay_pos(self.fd(), &mut pos) }?;
        Ok(())
    }

    fn pan(&self, yoffset: u32) -> io::Result<()> {
        let mut var = self.raw_var()?;
        var.yoffset = yoffset;
        unsafe { sys::fbiopan_display(self.fd(), &var) }?;
        Ok(())
    }

    fn blank(&self, blank: Blank) -> io::Result<()> {
        let level = match blank {
            Blank::Unblank => sys::FB_BLANK_UNBLANK,
            Blank::Powerdown => sys::FB_BLANK_POWERDOWN,
        };
        unsafe { sys::fbioblank(self.fd(), level) }?;
        Ok(())
    }

    fn copy_page(&self, from: usize, to: usize, len: usize) -> io::Result<()> {
        let fix = self.raw_fix()?;
        let size = fix.smem_len as usize;
        if from.max(to).saturating_add(len) > size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("copy of {len} bytes to {to:#x} exceeds {size} bytes of fb memory"),
            ));
        }
        let mut map = Mapping::new(self.fd(), 0, size)?;
        map.as_mut_slice().copy_within(from..from + len, to);
        Ok(())
    }
}
