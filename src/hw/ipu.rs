// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::{AsRawFd, RawFd},
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use ipu_sys as sys;
use nix::errno::Errno;
use tracing::{debug, trace, warn};

use super::{narrow, Mapping};
use crate::{
    device::{
        BlendAlpha, BufferParams, BufferRole, ChannelParams, Irq, MemBlock, OffsetParams,
        PhysAddr, TransformDevice, WaitStatus,
    },
    resource::Slot,
};

pub const IPU_DEVICE: &str = "/dev/mxc_ipu";

const POLL_INTERVAL: Duration = Duration::from_millis(1);

static NEXT_DEV_ID: AtomicUsize = AtomicUsize::new(1);

fn channel(slot: Slot) -> sys::ipu_channel_t {
    match slot {
        Slot::ConvertEncode => sys::MEM_PRP_ENC_MEM,
        Slot::ConvertViewfinder => sys::MEM_PRP_VF_MEM,
        Slot::ConvertPostProcess => sys::MEM_PP_MEM,
        Slot::RotateEncode => sys::MEM_ROT_ENC_MEM,
        Slot::RotateViewfinder => sys::MEM_ROT_VF_MEM,
        Slot::RotatePostProcess => sys::MEM_ROT_PP_MEM,
    }
}

fn buffer_type(role: BufferRole) -> sys::ipu_buffer_t {
    match role {
        BufferRole::Input => sys::IPU_INPUT_BUFFER,
        BufferRole::Graphics => sys::IPU_GRAPH_IN_BUFFER,
        BufferRole::Alpha => sys::IPU_ALPHA_IN_BUFFER,
        BufferRole::Output => sys::IPU_OUTPUT_BUFFER,
    }
}

/// IC horizontal resize register value, `downsize << 14 | resize`, for a
/// stripe of `input` columns scaled to `output` columns at `ratio` (input
/// over output, 32 fractional bits).
///
/// The downsizer halves the input at most twice, until it is no wider
/// than 1024 and less than twice the output. The resizer then applies
/// the remaining ratio with 13 fractional bits.
fn resize_coeffs(input: u32, output: u32, ratio: u64) -> io::Result<u32> {
    if input > 4096 || output > 1024 || output == 0 || output * 8 < input {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot resize {input} columns to {output}"),
        ));
    }

    let mut size = input;
    let mut ratio = ratio;
    let mut downsize = 0;
    while (size > 1024 || size >= output * 2) && downsize < 2 {
        size >>= 1;
        ratio >>= 1;
        downsize += 1;
    }

    let resize = ratio >> 19;
    let resize = if resize > 0x3fff {
        warn!("resize coefficient {resize:#x} saturated");
        0x3fff
    } else {
        resize as u32
    };
    Ok((downsize << 14) | resize)
}

fn task_params(params: &ChannelParams) -> io::Result<sys::ipu_mem_prp_vf_mem> {
    let ratio = match params.resize_ratio {
        Some(ratio) => resize_coeffs(params.in_width, params.out_width, ratio)?,
        None => 0,
    };

    let mut raw = sys::ipu_mem_prp_vf_mem {
        in_width: params.in_width,
        in_height: params.in_height,
        in_pixel_fmt: params.in_format.to_u32(),
        out_width: params.out_width,
        out_height: params.out_height,
        out_pixel_fmt: params.out_format.to_u32(),
        outh_resize_ratio: ratio,
        ..Default::default()
    };

    if let Some(blend) = &params.overlay {
        raw.graphics_combine_en = true;
        raw.in_g_pixel_fmt = blend.format.to_u32();
        match blend.alpha {
            BlendAlpha::Global(alpha) => {
                raw.global_alpha_en = true;
                raw.alpha = alpha;
            }
            BlendAlpha::Local => raw.alpha_chan_en = true,
        }
        if let Some(key) = blend.key_color {
            raw.key_color_en = true;
            raw.key_color = key;
        }
    }
    Ok(raw)
}

/// The IPU character device.
#[derive(Debug)]
pub struct IpuDevice {
    file: File,
    /// Identifies this handle's interrupt registrations to the driver.
    dev_id: usize,
}

impl IpuDevice {
    pub fn open() -> io::Result<Self> {
        Self::open_path(IPU_DEVICE)
    }

    pub fn open_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let dev_id = NEXT_DEV_ID.fetch_add(1, Ordering::Relaxed);
        debug!("opened {} as dev_id {dev_id}", path.as_ref().display());
        Ok(IpuDevice { file, dev_id })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn event(&self, irq: Irq) -> sys::ipu_event_info {
        sys::ipu_event_info {
            irq: irq.number() as libc::c_int,
            dev_id: self.dev_id as *mut libc::c_void,
        }
    }
}

impl TransformDevice for IpuDevice {
    type Map = Mapping;

    fn alloc(&self, size: usize) -> io::Result<MemBlock> {
        let mut mem = sys::ipu_mem_info {
            paddr: 0,
            vaddr: std::ptr::null_mut(),
            size: libc::c_int::try_from(size)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "allocation too large"))?,
        };
        unsafe { sys::ipu_alloc_mem(self.fd(), &mut mem) }?;
        if mem.paddr == 0 {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "driver returned no memory",
            ));
        }
        trace!("allocated {size} bytes at {:#x}", mem.paddr);
        Ok(MemBlock {
            paddr: mem.paddr,
            size,
            token: mem.vaddr as usize,
        })
    }

    fn free(&self, block: MemBlock) -> io::Result<()> {
        let mem = sys::ipu_mem_info {
            paddr: block.paddr,
            vaddr: block.token as *mut libc::c_void,
            size: libc::c_int::try_from(block.size).unwrap_or(libc::c_int::MAX),
        };
        unsafe { sys::ipu_free_mem(self.fd(), &mem) }?;
        Ok(())
    }

    fn map(&self, block: &MemBlock) -> io::Result<Mapping> {
        Mapping::new(self.fd(), u64::from(block.paddr), block.size)
    }

    fn init_channel(&self, slot: Slot, params: Option<&ChannelParams>) -> io::Result<()> {
        let mut parm = sys::ipu_channel_parm {
            channel: channel(slot),
            flag: params.is_none(),
            ..Default::default()
        };
        if let Some(params) = params {
            parm.params.mem_prp_vf_mem = task_params(params)?;
        }
        unsafe { sys::ipu_init_channel(self.fd(), &parm) }?;
        Ok(())
    }

    fn uninit_channel(&self, slot: Slot) -> io::Result<()> {
        let chan = channel(slot);
        unsafe { sys::ipu_uninit_channel(self.fd(), &chan) }?;
        Ok(())
    }

    fn init_buffer(
        &self,
        slot: Slot,
        role: BufferRole,
        params: &BufferParams,
    ) -> io::Result<()> {
        let parm = sys::ipu_channel_buf_parm {
            channel: channel(slot),
            type_: buffer_type(role),
            pixel_fmt: params.format.to_u32(),
            width: narrow(params.width, "width")?,
            height: narrow(params.height, "height")?,
            stride: narrow(params.stride, "stride")?,
            rot_mode: params.rotation.raw(),
            phyaddr_0: params.primary,
            phyaddr_1: params.secondary.unwrap_or(0),
            u_offset: params.u_offset,
            v_offset: params.v_offset,
            buf_num: 0,
        };
        unsafe { sys::ipu_init_channel_buffer(self.fd(), &parm) }?;
        Ok(())
    }

    fn update_buffer(
        &self,
        slot: Slot,
        role: BufferRole,
        index: usize,
        addr: PhysAddr,
    ) -> io::Result<()> {
        let parm = sys::ipu_channel_buf_parm {
            channel: channel(slot),
            type_: buffer_type(role),
            phyaddr_0: addr,
            buf_num: index as u32,
            ..Default::default()
        };
        unsafe { sys::ipu_update_channel_buffer(self.fd(), &parm) }?;
        Ok(())
    }

    fn update_offset(
        &self,
        slot: Slot,
        role: BufferRole,
        params: &OffsetParams,
    ) -> io::Result<()> {
        let parm = sys::ipu_buf_offset_parm {
            channel: channel(slot),
            type_: buffer_type(role),
            pixel_fmt: params.format.to_u32(),
            width: narrow(params.width, "width")?,
            height: narrow(params.height, "height")?,
            stride: narrow(params.stride, "stride")?,
            u_offset: params.u_offset,
            v_offset: params.v_offset,
            vertical_offset: params.vertical,
            horizontal_offset: params.horizontal,
        };
        unsafe { sys::ipu_update_buf_offset(self.fd(), &parm) }?;
        Ok(())
    }

    fn select_buffer(&self, slot: Slot, role: BufferRole, index: usize) -> io::Result<()> {
        let parm = sys::ipu_channel_buf_parm {
            channel: channel(slot),
            type_: buffer_type(role),
            buf_num: index as u32,
            ..Default::default()
        };
        unsafe { sys::ipu_select_channel_buffer(self.fd(), &parm) }?;
        Ok(())
    }

    fn enable_channel(&self, slot: Slot) -> io::Result<()> {
        let chan = channel(slot);
        unsafe { sys::ipu_enable_channel(self.fd(), &chan) }?;
        Ok(())
    }

    fn disable_channel(&self, slot: Slot) -> io::Result<()> {
        let info = sys::ipu_channel_info {
            channel: channel(slot),
            stop: true,
        };
        unsafe { sys::ipu_disable_channel(self.fd(), &info) }?;
        Ok(())
    }

    fn link(&self, src: Slot, dst: Slot) -> io::Result<()> {
        let link = sys::ipu_channel_link {
            src_ch: channel(src),
            dest_ch: channel(dst),
        };
        unsafe { sys::ipu_link_channels(self.fd(), &link) }?;
        Ok(())
    }

    fn unlink(&self, src: Slot, dst: Slot) -> io::Result<()> {
        let link = sys::ipu_channel_link {
            src_ch: channel(src),
            dest_ch: channel(dst),
        };
        unsafe { sys::ipu_unlink_channels(self.fd(), &link) }?;
        Ok(())
    }

    fn is_busy(&self, slot: Slot) -> io::Result<bool> {
        let chan = channel(slot);
        let ret = unsafe { sys::ipu_is_chan_busy(self.fd(), &chan) }?;
        Ok(ret != 0)
    }

    fn register_irq(&self, irq: Irq) -> io::Result<()> {
        let event = self.event(irq);
        unsafe { sys::ipu_register_generic_isr(self.fd(), &event) }?;
        Ok(())
    }

    fn clear_irq(&self, irq: Irq) -> io::Result<()> {
        let number = irq.number() as libc::c_int;
        unsafe { sys::ipu_clear_irq(self.fd(), &number) }?;
        Ok(())
    }

    fn free_irq(&self, irq: Irq) -> io::Result<()> {
        let info = sys::ipu_irq_info {
            irq: irq.number(),
            dev_id: self.dev_id as *mut libc::c_void,
        };
        unsafe { sys::ipu_free_irq(self.fd(), &info) }?;
        Ok(())
    }

    fn wait_irq(&self, irq: Irq, timeout: Duration) -> io::Result<WaitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut event = self.event(irq);
            match unsafe { sys::ipu_get_event(self.fd(), &mut event) } {
                Ok(_) if event.irq == irq.number() as libc::c_int => {
                    return Ok(WaitStatus::Completed)
                }
                Ok(_) => trace!("ignoring irq {}", event.irq),
                // The driver reports an empty event queue as EPERM.
                Err(Errno::EPERM | Errno::EAGAIN | Errno::EINTR | Errno::ETIMEDOUT) => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Ok(WaitStatus::TimedOut);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::Blend,
        format::{BGRA, RGBP, UYVY},
        stripe::{self, RATIO_ONE},
    };

    #[test]
    fn blend_flags() {
        let params = ChannelParams {
            in_width: 640,
            in_height: 480,
            in_format: UYVY,
            out_width: 640,
            out_height: 480,
            out_format: RGBP,
            resize_ratio: None,
            overlay: Some(Blend {
                format: BGRA,
                alpha: BlendAlpha::Global(128),
                key_color: Some(0x00ff00),
            }),
        };
        let raw = task_params(&params).unwrap();
        assert!(raw.graphics_combine_en && raw.global_alpha_en && raw.key_color_en);
        assert!(!raw.alpha_chan_en);
        assert_eq!(raw.alpha, 128);
        assert_eq!(raw.in_g_pixel_fmt, BGRA.to_u32());
    }

    fn split_params(input: u32, output: u32) -> ChannelParams {
        let stripes = stripe::plan(input, output, 1024, RATIO_ONE).unwrap();
        ChannelParams {
            in_width: stripes.left.input_width,
            in_height: 1080,
            in_format: UYVY,
            out_width: stripes.left.output_width,
            out_height: 1080,
            out_format: RGBP,
            resize_ratio: Some(stripes.left.resize_ratio),
            overlay: None,
        }
    }

    #[test]
    fn split_same_width() {
        let raw = task_params(&split_params(1920, 1920)).unwrap();
        assert_eq!(raw.in_width, 960);
        assert_eq!(raw.out_width, 960);
        assert_eq!(raw.outh_resize_ratio, 0x2000);
    }

    #[test]
    fn split_downscale_uses_downsizer() {
        let raw = task_params(&split_params(2560, 1920)).unwrap();
        assert_eq!(raw.in_width, 1280);
        assert_eq!(raw.out_width, 960);
        // 1280 columns are halved once, leaving 640 / 960 for the resizer.
        assert_eq!(raw.outh_resize_ratio >> 14, 1);
        assert_eq!(raw.outh_resize_ratio & 0x3fff, 8192 * 2 / 3);
    }

    #[test]
    fn split_upscale() {
        let raw = task_params(&split_params(1280, 1920)).unwrap();
        assert_eq!(raw.outh_resize_ratio >> 14, 0);
        assert_eq!(raw.outh_resize_ratio, 8192 * 2 / 3);
    }

    #[test]
    fn resize_out_of_range() {
        assert!(resize_coeffs(4104, 1024, RATIO_ONE * 4).is_err());
        assert!(resize_coeffs(1024, 120, RATIO_ONE * 8).is_err());
    }

    #[test]
    fn slot_channels_are_distinct() {
        let mut seen: Vec<_> = Slot::ALL.iter().map(|s| channel(*s)).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 6);
    }
}
