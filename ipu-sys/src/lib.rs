// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Raw kernel interface of the i.MX IPU character device (`/dev/mxc_ipu`) and
//! the MXC framebuffer driver.
//!
//! The layouts follow the `linux/ipu.h`, `linux/mxcfb.h` and `linux/fb.h`
//! headers of the i.MX5x BSP kernels. Nothing here is safe to call without
//! an open device descriptor; the safe wrappers live in the `edgefirst-ipu`
//! crate.
#![allow(non_camel_case_types)]

use libc::{c_char, c_int, c_ulong, c_void};
use nix::{
    ioctl_read, ioctl_read_bad, ioctl_readwrite, ioctl_write_int_bad, ioctl_write_ptr,
    ioctl_write_ptr_bad,
};

pub type dma_addr_t = u32;
pub type ipu_channel_t = u32;
pub type ipu_buffer_t = u32;
pub type ipu_rotate_mode_t = u32;

pub const IPU_MAX_CH: u32 = 32;
pub const NO_DMA: u32 = 0x3F;

/// Packs a logical channel number and its IDMAC input/graphics/alpha/output
/// DMA channels into an `ipu_channel_t`.
pub const fn make_chan(num: u32, v_in: u32, g_in: u32, a_in: u32, out: u32) -> ipu_channel_t {
    (num << 24) | (v_in << 18) | (g_in << 12) | (a_in << 6) | out
}

pub const MEM_ROT_ENC_MEM: ipu_channel_t = make_chan(1, 45, NO_DMA, NO_DMA, 48);
pub const MEM_ROT_VF_MEM: ipu_channel_t = make_chan(2, 46, NO_DMA, NO_DMA, 49);
pub const MEM_ROT_PP_MEM: ipu_channel_t = make_chan(3, 47, NO_DMA, NO_DMA, 50);
pub const MEM_PRP_ENC_MEM: ipu_channel_t = make_chan(4, 12, 14, 17, 20);
pub const MEM_PRP_VF_MEM: ipu_channel_t = make_chan(5, 12, 14, 17, 21);
pub const MEM_PP_MEM: ipu_channel_t = make_chan(6, 11, 15, 18, 22);
pub const MEM_DC_SYNC: ipu_channel_t = make_chan(7, 28, NO_DMA, NO_DMA, NO_DMA);
pub const MEM_DC_ASYNC: ipu_channel_t = make_chan(8, 41, NO_DMA, NO_DMA, NO_DMA);
pub const MEM_BG_SYNC: ipu_channel_t = make_chan(9, 23, NO_DMA, 51, NO_DMA);
pub const MEM_FG_SYNC: ipu_channel_t = make_chan(10, 27, NO_DMA, 31, NO_DMA);

pub const IPU_OUTPUT_BUFFER: ipu_buffer_t = 0;
pub const IPU_ALPHA_IN_BUFFER: ipu_buffer_t = 1;
pub const IPU_GRAPH_IN_BUFFER: ipu_buffer_t = 2;
pub const IPU_VIDEO_IN_BUFFER: ipu_buffer_t = 3;
pub const IPU_INPUT_BUFFER: ipu_buffer_t = IPU_VIDEO_IN_BUFFER;

pub const IPU_ROTATE_NONE: ipu_rotate_mode_t = 0;
pub const IPU_ROTATE_VERT_FLIP: ipu_rotate_mode_t = 1;
pub const IPU_ROTATE_HORIZ_FLIP: ipu_rotate_mode_t = 2;
pub const IPU_ROTATE_180: ipu_rotate_mode_t = 3;
pub const IPU_ROTATE_90_RIGHT: ipu_rotate_mode_t = 4;
pub const IPU_ROTATE_90_RIGHT_VFLIP: ipu_rotate_mode_t = 5;
pub const IPU_ROTATE_90_RIGHT_HFLIP: ipu_rotate_mode_t = 6;
pub const IPU_ROTATE_90_LEFT: ipu_rotate_mode_t = 7;

// End-of-frame interrupts are numbered after the IDMAC channel they follow.
pub const IPU_IRQ_PP_IN_EOF: u32 = 11;
pub const IPU_IRQ_PRP_IN_EOF: u32 = 12;
pub const IPU_IRQ_PRP_ENC_OUT_EOF: u32 = 20;
pub const IPU_IRQ_PRP_VF_OUT_EOF: u32 = 21;
pub const IPU_IRQ_PP_OUT_EOF: u32 = 22;
pub const IPU_IRQ_PRP_ENC_ROT_IN_EOF: u32 = 45;
pub const IPU_IRQ_PRP_VF_ROT_IN_EOF: u32 = 46;
pub const IPU_IRQ_PP_ROT_IN_EOF: u32 = 47;
pub const IPU_IRQ_PRP_ENC_ROT_OUT_EOF: u32 = 48;
pub const IPU_IRQ_PRP_VF_ROT_OUT_EOF: u32 = 49;
pub const IPU_IRQ_PP_ROT_OUT_EOF: u32 = 50;

/// Task-chain parameters shared by the ENC, VF and PP convert channels.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ipu_mem_prp_vf_mem {
    pub in_width: u32,
    pub in_height: u32,
    pub in_pixel_fmt: u32,
    pub out_width: u32,
    pub out_height: u32,
    pub out_pixel_fmt: u32,
    pub outh_resize_ratio: u32,
    pub outv_resize_ratio: u32,
    pub graphics_combine_en: bool,
    pub global_alpha_en: bool,
    pub key_color_en: bool,
    pub in_g_pixel_fmt: u32,
    pub alpha: u8,
    pub key_color: u32,
    pub alpha_chan_en: bool,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union ipu_channel_params_t {
    pub mem_prp_vf_mem: ipu_mem_prp_vf_mem,
    _reserved: [u32; 32],
}

impl Default for ipu_channel_params_t {
    fn default() -> Self {
        Self { _reserved: [0; 32] }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct ipu_channel_parm {
    pub channel: ipu_channel_t,
    pub params: ipu_channel_params_t,
    /// Set when `params` is absent (rotation channels), clear when it
    /// carries task parameters.
    pub flag: bool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ipu_channel_buf_parm {
    pub channel: ipu_channel_t,
    pub type_: ipu_buffer_t,
    pub pixel_fmt: u32,
    pub width: u16,
    pub height: u16,
    pub stride: u16,
    pub rot_mode: ipu_rotate_mode_t,
    pub phyaddr_0: dma_addr_t,
    pub phyaddr_1: dma_addr_t,
    pub u_offset: u32,
    pub v_offset: u32,
    pub buf_num: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ipu_buf_offset_parm {
    pub channel: ipu_channel_t,
    pub type_: ipu_buffer_t,
    pub pixel_fmt: u32,
    pub width: u16,
    pub height: u16,
    pub stride: u16,
    pub u_offset: u32,
    pub v_offset: u32,
    pub vertical_offset: u32,
    pub horizontal_offset: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ipu_channel_link {
    pub src_ch: ipu_channel_t,
    pub dest_ch: ipu_channel_t,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ipu_channel_info {
    pub channel: ipu_channel_t,
    pub stop: bool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ipu_irq_info {
    pub irq: u32,
    pub dev_id: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ipu_event_info {
    pub irq: c_int,
    pub dev_id: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ipu_mem_info {
    pub paddr: dma_addr_t,
    pub vaddr: *mut c_void,
    pub size: c_int,
}

ioctl_write_ptr!(ipu_init_channel, b'I', 0x1, ipu_channel_parm);
ioctl_write_ptr!(ipu_uninit_channel, b'I', 0x2, ipu_channel_t);
ioctl_write_ptr!(ipu_init_channel_buffer, b'I', 0x3, ipu_channel_buf_parm);
ioctl_write_ptr!(ipu_update_channel_buffer, b'I', 0x4, ipu_channel_buf_parm);
ioctl_write_ptr!(ipu_select_channel_buffer, b'I', 0x5, ipu_channel_buf_parm);
ioctl_write_ptr!(ipu_link_channels, b'I', 0x6, ipu_channel_link);
ioctl_write_ptr!(ipu_unlink_channels, b'I', 0x7, ipu_channel_link);
ioctl_write_ptr!(ipu_enable_channel, b'I', 0x8, ipu_channel_t);
ioctl_write_ptr!(ipu_disable_channel, b'I', 0x9, ipu_channel_info);
ioctl_write_ptr!(ipu_clear_irq, b'I', 0xC, c_int);
ioctl_write_ptr!(ipu_free_irq, b'I', 0xD, ipu_irq_info);
ioctl_write_ptr!(ipu_register_generic_isr, b'I', 0x14, ipu_event_info);
ioctl_readwrite!(ipu_get_event, b'I', 0x15, ipu_event_info);
ioctl_readwrite!(ipu_alloc_mem, b'I', 0x16, ipu_mem_info);
ioctl_write_ptr!(ipu_free_mem, b'I', 0x17, ipu_mem_info);
ioctl_write_ptr!(ipu_is_chan_busy, b'I', 0x18, ipu_channel_t);
ioctl_write_ptr!(ipu_update_buf_offset, b'I', 0x1A, ipu_buf_offset_parm);

pub const FB_ACTIVATE_FORCE: u32 = 128;
pub const FB_BLANK_UNBLANK: c_int = 0;
pub const FB_BLANK_POWERDOWN: c_int = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct fb_bitfield {
    pub offset: u32,
    pub length: u32,
    pub msb_right: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct fb_var_screeninfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: fb_bitfield,
    pub green: fb_bitfield,
    pub blue: fb_bitfield,
    pub transp: fb_bitfield,
    pub nonstd: u32,
    pub activate: u32,
    pub height: u32,
    pub width: u32,
    pub accel_flags: u32,
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct fb_fix_screeninfo {
    pub id: [c_char; 16],
    pub smem_start: c_ulong,
    pub smem_len: u32,
    pub type_: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    pub line_length: u32,
    pub mmio_start: c_ulong,
    pub mmio_len: u32,
    pub accel: u32,
    pub capabilities: u16,
    pub reserved: [u16; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct mxcfb_pos {
    pub x: u16,
    pub y: u16,
}

ioctl_read_bad!(fbioget_vscreeninfo, 0x4600, fb_var_screeninfo);
ioctl_write_ptr_bad!(fbioput_vscreeninfo, 0x4601, fb_var_screeninfo);
ioctl_read_bad!(fbioget_fscreeninfo, 0x4602, fb_fix_screeninfo);
ioctl_write_ptr_bad!(fbiopan_display, 0x4606, fb_var_screeninfo);
ioctl_write_int_bad!(fbioblank, 0x4611);
ioctl_readwrite!(mxcfb_set_overlay_pos, b'F', 0x24, mxcfb_pos);
ioctl_read!(mxcfb_get_fb_ipu_chan, b'F', 0x28, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_packing() {
        assert_eq!(MEM_PRP_ENC_MEM >> 24, 4);
        assert_eq!(MEM_PRP_ENC_MEM & 0x3F, 20);
        assert_eq!((MEM_ROT_PP_MEM >> 18) & 0x3F, 47);
        assert_eq!((MEM_BG_SYNC >> 6) & 0x3F, 51);
    }
}
