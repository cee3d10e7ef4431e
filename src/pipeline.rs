// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-frame buffer handoff between the caller and the hardware.
//!
//! The first [`Task::update`] starts the channels on the buffers bound at
//! init and returns once the first frame is complete. Every later update
//! queues one new frame. In streaming operation it first waits for the
//! frame queued by the previous update, so the caller always fills a
//! buffer the hardware has released.

use tracing::{debug, instrument, warn};

use crate::{
    channel::{Shape, Side},
    device::{BufferRole, PhysAddr, TransformDevice, WaitStatus},
    error::{Error, HardwareContext, Result},
    resource::Slot,
    task::{OverlayAlpha, Task},
};

/// Buffer indices of a running task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Indices {
    /// Double-buffer slot refreshed by the next update, 0 or 1.
    pub update: usize,
    /// Caller's view of the output buffer last completed, 0 to 2.
    pub output: usize,
    /// Physical output buffer the next frame is written to, 0 to 2.
    pub tri_output: usize,
}

impl Indices {
    /// Indices after the first frame has been started.
    pub fn primed(streaming: bool, display: bool) -> Self {
        let tri_output = match (streaming, display) {
            (true, _) => 2,
            (false, true) => 1,
            (false, false) => 0,
        };
        Indices {
            update: 0,
            output: usize::from(streaming),
            tri_output,
        }
    }

    pub fn advance(self, streaming: bool, display: bool) -> Self {
        let mut next = self;
        if streaming {
            next.update ^= 1;
            next.output = (next.output + 1) % 3;
        }
        if streaming || display {
            next.tri_output = (next.tri_output + 1) % 3;
        }
        next
    }
}

/// Buffers replacing the bound ones for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameUpdate {
    pub input: Option<PhysAddr>,
    pub overlay: Option<PhysAddr>,
    /// Local alpha plane, ignored with global alpha.
    pub alpha: Option<PhysAddr>,
}

impl FrameUpdate {
    pub fn input(addr: PhysAddr) -> Self {
        FrameUpdate {
            input: Some(addr),
            ..Default::default()
        }
    }
}

/// Outcome of one [`Task::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Update {
    /// Input buffer index to fill for the next update.
    pub next_input: usize,
    /// Output buffer index holding the frame that completed during this
    /// update. It is complete before the display pans to it.
    pub completed: usize,
}

/// Progress of the first update. A timeout leaves it where it was, so a
/// retried update resumes with the wait that timed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Activation {
    #[default]
    Stopped,
    /// Channels enabled and the first frame queued.
    Started,
    /// Split mode: right stripe of the first frame queued.
    RightQueued,
    /// Split streaming: left stripe of the second frame queued.
    SecondLeftQueued,
    Running,
}

impl<D: TransformDevice> Task<D> {
    /// Queues one frame.
    ///
    /// The first call starts the task on the buffers bound at init and
    /// ignores `frame`. It returns once the first frame is complete. If it
    /// times out, the channels keep running, the indices and frame
    /// counters stay at their initial values, and the next call waits for
    /// that first frame again instead of queueing a new one.
    ///
    /// Later calls return [`Error::Timeout`] with the indices untouched.
    /// The task stays usable in both cases.
    pub fn update(&mut self, frame: &FrameUpdate) -> Result<Update> {
        if self.activation == Activation::Running {
            self.step(frame)
        } else {
            if *frame != FrameUpdate::default() {
                debug!("first update runs on the buffers bound at init");
            }
            self.activate()
        }
    }

    #[instrument(skip(self), fields(irq = ?self.irq))]
    fn activate(&mut self) -> Result<Update> {
        while self.activation != Activation::Running {
            self.activation = self.resume()?;
        }

        let streaming = self.plan.streaming;
        self.indices = Indices::primed(streaming, self.presenter.is_some());
        self.input_frames = if streaming { 2 } else { 1 };
        self.output_frames = 1;
        debug!(indices = ?self.indices, "first frame done");
        Ok(Update {
            next_input: self.indices.update,
            completed: 0,
        })
    }

    /// Runs the next activation step and returns the state it reached.
    fn resume(&mut self) -> Result<Activation> {
        let streaming = self.plan.streaming;
        let next = match (self.activation, self.striper) {
            (Activation::Stopped, _) => {
                self.start()?;
                Activation::Started
            }
            (Activation::Started, None) => {
                self.wait()?;
                self.present(0);
                Activation::Running
            }
            (Activation::Started, Some(striper)) => {
                self.wait()?;
                let (input, output) = (self.buffers.input_addr(0), self.buffers.output_addr(0));
                striper.program(&self.device, Side::Right, input, output, true)?;
                Activation::RightQueued
            }
            (Activation::RightQueued, Some(striper)) => {
                self.wait()?;
                self.present(0);
                if streaming {
                    let (input, output) =
                        (self.buffers.input_addr(1), self.buffers.output_addr(1));
                    striper.program(&self.device, Side::Left, input, output, true)?;
                    Activation::SecondLeftQueued
                } else {
                    Activation::Running
                }
            }
            (Activation::SecondLeftQueued, Some(striper)) => {
                self.wait()?;
                let (input, output) = (self.buffers.input_addr(1), self.buffers.output_addr(1));
                striper.program(&self.device, Side::Right, input, output, true)?;
                Activation::Running
            }
            _ => Activation::Running,
        };
        Ok(next)
    }

    fn start(&mut self) -> Result<()> {
        self.device.clear_irq(self.irq).op("IPU_CLEAR_IRQ")?;
        self.device
            .register_irq(self.irq)
            .op("IPU_REGISTER_GENERIC_ISR")?;
        self.enabled = true;

        for slot in self.shape.end_to_start() {
            self.device
                .enable_channel(slot)
                .op("IPU_ENABLE_CHANNEL")?;
        }
        self.arm()
    }

    /// Marks every bound buffer ready for the first frames.
    fn arm(&self) -> Result<()> {
        let count = if self.plan.streaming { 2 } else { 1 };
        match self.shape {
            Shape::Convert(slot) => {
                // Split mode runs both stripes of one frame in the two slots.
                let count = if self.striper.is_some() { 1 } else { count };
                for index in 0..count {
                    self.arm_convert(slot, index)?;
                }
            }
            Shape::Rotate(slot) => {
                for index in 0..count {
                    self.select(slot, BufferRole::Input, index)?;
                    self.select(slot, BufferRole::Output, index)?;
                }
            }
            Shape::Chained { convert, rotate } => {
                for index in 0..count {
                    self.select(rotate, BufferRole::Output, index)?;
                }
                for index in 0..count {
                    self.arm_convert(convert, index)?;
                }
            }
        }
        Ok(())
    }

    fn arm_convert(&self, slot: Slot, index: usize) -> Result<()> {
        self.select(slot, BufferRole::Input, index)?;
        if self.plan.overlay.is_some() {
            self.select(slot, BufferRole::Graphics, index)?;
            if self.local_alpha() {
                self.select(slot, BufferRole::Alpha, index)?;
            }
        }
        self.select(slot, BufferRole::Output, index)
    }

    fn step(&mut self, frame: &FrameUpdate) -> Result<Update> {
        let streaming = self.plan.streaming;
        let display = self.presenter.is_some();
        let idx = self.indices;
        let begin = self.shape.begin();
        debug!(?idx, ?frame, "updating buffers");

        if streaming {
            self.wait()?;
            self.present(idx.output);
        }

        let input = frame
            .input
            .unwrap_or_else(|| self.buffers.input_addr(idx.update));
        let output = self.buffers.output_addr(idx.tri_output);

        match self.striper {
            Some(striper) => {
                striper.program(&self.device, Side::Left, input, output, true)?;
                self.wait()?;
                striper.program(&self.device, Side::Right, input, output, true)?;
            }
            None => {
                self.device
                    .update_buffer(
                        begin,
                        BufferRole::Input,
                        idx.update,
                        input + self.plan.input.offsets.base,
                    )
                    .op("IPU_UPDATE_CHANNEL_BUFFER")?;
            }
        }

        if let Some(overlay) = &self.plan.overlay {
            if let Some(addr) = frame.overlay {
                self.device
                    .update_buffer(
                        begin,
                        BufferRole::Graphics,
                        idx.update,
                        addr + overlay.layout.offsets.base,
                    )
                    .op("IPU_UPDATE_CHANNEL_BUFFER")?;
            }
            let local = self.local_alpha();
            if let (Some(addr), true) = (frame.alpha, local) {
                self.device
                    .update_buffer(
                        begin,
                        BufferRole::Alpha,
                        idx.update,
                        addr + overlay.alpha_offset,
                    )
                    .op("IPU_UPDATE_CHANNEL_BUFFER")?;
            }
            self.select(begin, BufferRole::Graphics, idx.update)?;
            if local {
                self.select(begin, BufferRole::Alpha, idx.update)?;
            }
        }

        if self.striper.is_none() {
            let end = self.shape.end();
            self.device
                .update_buffer(
                    end,
                    BufferRole::Output,
                    idx.update,
                    output + self.plan.output.offsets.base,
                )
                .op("IPU_UPDATE_CHANNEL_BUFFER")?;
            self.select(end, BufferRole::Output, idx.update)?;
            self.select(begin, BufferRole::Input, idx.update)?;
        }

        if !streaming {
            self.wait()?;
            self.present(idx.tri_output);
        }

        self.indices = idx.advance(streaming, display);
        self.input_frames += 1;
        self.output_frames += 1;
        Ok(Update {
            next_input: self.indices.update,
            completed: idx.output,
        })
    }

    fn select(&self, slot: Slot, role: BufferRole, index: usize) -> Result<()> {
        self.device
            .select_buffer(slot, role, index)
            .op("IPU_SELECT_CHANNEL_BUFFER")
    }

    fn local_alpha(&self) -> bool {
        matches!(
            self.config.overlay.as_ref().map(|ov| ov.alpha),
            Some(OverlayAlpha::Local { .. })
        )
    }

    fn wait(&self) -> Result<()> {
        let timeout = self.config.frame_timeout;
        match self.device.wait_irq(self.irq, timeout).op("IPU_GET_EVENT")? {
            WaitStatus::Completed => Ok(()),
            WaitStatus::TimedOut => {
                warn!("no {:?} within {timeout:?}", self.irq);
                Err(Error::Timeout {
                    irq: self.irq,
                    timeout,
                })
            }
        }
    }

    /// Pans the display to page `index`. A failed pan only costs the
    /// frame its visibility.
    fn present(&self, index: usize) {
        if let Some(presenter) = &self.presenter {
            if let Err(e) = presenter.pan(index) {
                warn!("pan to page {index} failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(streaming: bool, display: bool, n: usize) -> Vec<Indices> {
        let mut idx = Indices::primed(streaming, display);
        let mut seen = vec![idx];
        for _ in 0..n {
            idx = idx.advance(streaming, display);
            seen.push(idx);
        }
        seen
    }

    #[test]
    fn streaming_periods() {
        let seen = run(true, false, 12);
        for (i, idx) in seen.iter().enumerate() {
            assert_eq!(idx.update, i % 2);
            assert_eq!(idx.output, (1 + i) % 3);
            assert_eq!(idx.tri_output, (2 + i) % 3);
        }
    }

    #[test]
    fn display_without_streaming_cycles_pages_only() {
        let seen = run(false, true, 6);
        assert!(seen.iter().all(|idx| idx.update == 0 && idx.output == 0));
        let tri: Vec<usize> = seen.iter().map(|idx| idx.tri_output).collect();
        assert_eq!(tri, [1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn normal_stays_put() {
        assert!(run(false, false, 5)
            .iter()
            .all(|idx| *idx == Indices::default()));
    }
}
