// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use tracing::{debug, warn};

use crate::{
    device::{BufferMap, MemBlock, PhysAddr, TransformDevice},
    error::{Error, Result},
};

enum Origin<M> {
    /// Allocated by the task, freed at teardown.
    Internal { block: MemBlock, map: Option<M> },
    /// Owned by the caller or the display, never freed here.
    External,
}

/// Physically contiguous buffer bound to a task.
pub struct Buffer<M> {
    paddr: PhysAddr,
    size: usize,
    origin: Origin<M>,
}

impl<M: BufferMap> Buffer<M> {
    pub fn external(paddr: PhysAddr) -> Self {
        Buffer {
            paddr,
            size: 0,
            origin: Origin::External,
        }
    }

    /// Allocates `size` bytes from `device`, mapping them for the CPU when
    /// `mapped` is set.
    pub fn allocate<D>(device: &D, size: usize, mapped: bool) -> Result<Self>
    where
        D: TransformDevice<Map = M>,
    {
        let block = device
            .alloc(size)
            .map_err(|source| Error::Alloc { size, source })?;

        let map = if mapped {
            match device.map(&block) {
                Ok(map) => Some(map),
                Err(e) => {
                    if let Err(e) = device.free(block) {
                        warn!("freeing {:#x} failed: {e}", block.paddr);
                    }
                    return Err(Error::Hardware {
                        op: "mmap",
                        source: e,
                    });
                }
            }
        } else {
            None
        };

        debug!("allocated {size} bytes at {:#x}", block.paddr);
        Ok(Buffer {
            paddr: block.paddr,
            size,
            origin: Origin::Internal { block, map },
        })
    }

    pub fn paddr(&self) -> PhysAddr {
        self.paddr
    }

    /// Allocated size, zero for external buffers.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.origin, Origin::Internal { .. })
    }

    pub fn as_slice(&self) -> Option<&[u8]> {
        match &self.origin {
            Origin::Internal { map: Some(m), .. } => Some(m.as_slice()),
            _ => None,
        }
    }

    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.origin {
            Origin::Internal { map: Some(m), .. } => Some(m.as_mut_slice()),
            _ => None,
        }
    }

    /// Unmaps and frees an internal buffer.
    pub fn release<D>(self, device: &D)
    where
        D: TransformDevice<Map = M>,
    {
        if let Origin::Internal { block, map } = self.origin {
            drop(map);
            match device.free(block) {
                Ok(()) => debug!("freed {} bytes at {:#x}", block.size, block.paddr),
                Err(e) => warn!("freeing {:#x} failed: {e}", block.paddr),
            }
        }
    }
}

/// Every buffer a task binds, by role and double-buffer index.
pub struct BufferSet<M> {
    pub input: [Option<Buffer<M>>; 2],
    pub overlay: [Option<Buffer<M>>; 2],
    pub alpha: [Option<Buffer<M>>; 2],
    /// Convert-to-rotate intermediate of chained tasks.
    pub rotation: [Option<Buffer<M>>; 2],
    pub output: [Option<Buffer<M>>; 3],
}

impl<M> Default for BufferSet<M> {
    fn default() -> Self {
        BufferSet {
            input: [None, None],
            overlay: [None, None],
            alpha: [None, None],
            rotation: [None, None],
            output: [None, None, None],
        }
    }
}

fn addr<M, const N: usize>(slots: &[Option<Buffer<M>>; N], index: usize) -> PhysAddr {
    slots
        .get(index)
        .and_then(Option::as_ref)
        .map_or(0, |b| b.paddr)
}

impl<M: BufferMap> BufferSet<M> {
    pub fn input_addr(&self, index: usize) -> PhysAddr {
        addr(&self.input, index)
    }

    pub fn overlay_addr(&self, index: usize) -> PhysAddr {
        addr(&self.overlay, index)
    }

    pub fn alpha_addr(&self, index: usize) -> PhysAddr {
        addr(&self.alpha, index)
    }

    pub fn rotation_addr(&self, index: usize) -> PhysAddr {
        addr(&self.rotation, index)
    }

    pub fn output_addr(&self, index: usize) -> PhysAddr {
        addr(&self.output, index)
    }

    /// Frees every internal buffer. Safe to call more than once.
    pub fn release<D>(&mut self, device: &D)
    where
        D: TransformDevice<Map = M>,
    {
        let all = self
            .input
            .iter_mut()
            .chain(self.overlay.iter_mut())
            .chain(self.alpha.iter_mut())
            .chain(self.rotation.iter_mut())
            .chain(self.output.iter_mut());
        for slot in all {
            if let Some(buffer) = slot.take() {
                buffer.release(device);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDevice;

    #[test]
    fn external_buffers_survive_release() {
        let dev = SimDevice::new();
        let mut set = BufferSet::default();
        set.input[0] = Some(Buffer::allocate(&dev, 4096, true).unwrap());
        set.output[0] = Some(Buffer::external(0x8000_0000));
        set.rotation[0] = Some(Buffer::allocate(&dev, 4096, false).unwrap());
        assert_eq!(dev.live_allocations(), 2);
        assert!(set.rotation[0].as_ref().unwrap().as_slice().is_none());
        assert_eq!(set.output_addr(0), 0x8000_0000);

        set.release(&dev);
        set.release(&dev);
        assert_eq!(dev.live_allocations(), 0);
        assert_eq!(set.output_addr(0), 0);
        assert_eq!(dev.frees(), 2);
    }

    #[test]
    fn failed_map_frees_block() {
        let dev = SimDevice::new();
        dev.fail_on("map");
        assert!(Buffer::allocate(&dev, 4096, true).is_err());
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn exhaustion_is_alloc_error() {
        let dev = SimDevice::new();
        dev.limit_allocations(1);
        let _a = Buffer::allocate(&dev, 64, true).unwrap();
        assert!(matches!(
            Buffer::allocate(&dev, 64, true),
            Err(Error::Alloc { size: 64, .. })
        ));
    }
}
