// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Static layout of a task, computed before any resource is claimed.
//!
//! Every malformed request is rejected here, so a failed [`Plan::new`]
//! never touches the hardware.

use tracing::debug;

use crate::{
    arbiter::{Request, TaskMode},
    arch::Architecture,
    error::{Error, Result},
    geometry::{resolve, Layout, Rect, Rotation},
    resource::{Path, PathSet},
    stripe::{self, StripePlan, RATIO_ONE},
    task::{Operation, TaskConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayPlan {
    pub layout: Layout,
    /// Offset of the window into a local alpha plane.
    pub alpha_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub mode: TaskMode,
    pub input: Layout,
    pub overlay: Option<OverlayPlan>,
    /// Output window as placed in the output frame, after any rotation.
    pub output: Layout,
    pub rotation: Rotation,
    pub stripes: Option<StripePlan>,
    pub streaming: bool,
}

impl Plan {
    pub fn new(config: &TaskConfig, arch: &Architecture) -> Result<Self> {
        let preference = config.mode.preference;
        let streaming = config.mode.operation == Operation::Streaming;
        let rotation = config.output.rotation;

        if config.overlay.is_some() && !preference.allows(Path::PostProcess) {
            return Err(Error::invalid(format!(
                "overlay needs the post-process path, preference is {preference:?}"
            )));
        }

        let crop = config.input.crop.as_ref();
        let input = resolve(&config.input.frame, crop, has_window(crop))?;

        let overlay = match &config.overlay {
            Some(ov) => {
                let crop = ov.crop.as_ref();
                let layout = resolve(&ov.frame, crop, has_window(crop))?;
                let whole = (layout.width, layout.height) == (ov.frame.width, ov.frame.height);
                let alpha_offset = match crop.filter(|w| !w.is_unset()) {
                    Some(w) if !whole => {
                        w.y.min(ov.frame.height) * ov.frame.width + w.x.min(ov.frame.width)
                    }
                    _ => 0,
                };
                Some(OverlayPlan {
                    layout,
                    alpha_offset,
                })
            }
            None => None,
        };

        let rotate = rotation >= arch.rotate_begin;
        let window = config.output.window.as_ref();
        // Rotated outputs become the convert engine's width, so they align
        // like widths do.
        let align_height = config.output.display.is_some() || rotate;
        let output = resolve(&config.output.frame, window, align_height)?;

        let split = output.width > arch.max_convert_width;

        if let Some(ov) = &overlay {
            if (ov.layout.width, ov.layout.height) != (output.width, output.height) {
                return Err(Error::invalid(format!(
                    "overlay window {}x{} differs from output window {}x{}",
                    ov.layout.width, ov.layout.height, output.width, output.height
                )));
            }
        }

        let (out_w, out_h) = if rotate && rotation.swaps_axes() {
            output.swapped()
        } else {
            (output.width, output.height)
        };
        let in_format = config.input.frame.format;
        let out_format = config.output.frame.format;
        let mut convert = input.width != out_w
            || input.height != out_h
            || in_format.needs_csc(out_format)?;
        if !rotate && !convert && (rotation > Rotation::None || in_format != out_format) {
            // Flips and same-colour-space repacking run in the convert engine.
            convert = true;
        }
        if overlay.is_some() {
            convert = true;
        }
        let mode = TaskMode::from_needs(convert, rotate);

        let stripes = if split {
            if rotate {
                return Err(Error::invalid("split mode does not support rotation"));
            }
            if overlay.is_some() {
                return Err(Error::invalid("split mode does not support overlay"));
            }
            Some(stripe::plan(
                input.width,
                output.width,
                arch.max_convert_width,
                RATIO_ONE,
            )?)
        } else {
            None
        };

        if mode == TaskMode::Copy {
            check_copy_buffers(config, streaming)?;
        }

        let plan = Plan {
            mode,
            input,
            overlay,
            output,
            rotation,
            stripes,
            streaming,
        };
        debug!(?plan, "planned task");
        Ok(plan)
    }

    pub fn request(&self, preference: PathSet) -> Request {
        Request {
            mode: self.mode,
            overlay: self.overlay.is_some(),
            split: self.stripes.is_some(),
            preference,
        }
    }

    /// Size the convert engine writes before the rotate engine turns it.
    pub fn intermediate(&self) -> (u32, u32) {
        if self.rotation.swaps_axes() {
            self.output.swapped()
        } else {
            (self.output.width, self.output.height)
        }
    }

    /// Number of input double-buffer slots in use.
    pub fn slots(&self) -> usize {
        if self.streaming {
            2
        } else {
            1
        }
    }
}

fn has_window(window: Option<&Rect>) -> bool {
    window.is_some_and(|w| !w.is_unset())
}

fn check_copy_buffers(config: &TaskConfig, streaming: bool) -> Result<()> {
    let (inputs, outputs) = if streaming { (2, 3) } else { (1, 1) };
    let input_ok = config.input.buffers[..inputs].iter().all(Option::is_some);
    let output_ok = config.output.buffers[..outputs].iter().all(Option::is_some);
    if !input_ok || !output_ok {
        return Err(Error::invalid(format!(
            "raw copy needs caller buffers for {inputs} input and {outputs} output slots"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        format::{I420, RGBA, RGBP, UYVY, YUYV},
        geometry::Frame,
        task::{InputParams, Mode, OutputParams, OverlayAlpha, OverlayParams},
    };

    fn config(input: Frame, output: Frame) -> TaskConfig {
        TaskConfig {
            input: InputParams {
                frame: input,
                ..Default::default()
            },
            output: OutputParams {
                frame: output,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn resize_is_convert() {
        let cfg = config(Frame::new(640, 480, YUYV), Frame::new(320, 240, RGBP));
        let plan = Plan::new(&cfg, &Architecture::default()).unwrap();
        assert_eq!(plan.mode, TaskMode::Convert);
        assert!(plan.stripes.is_none());
    }

    #[test]
    fn flip_below_rotation_threshold_converts() {
        let mut cfg = config(Frame::new(320, 240, RGBP), Frame::new(320, 240, RGBP));
        cfg.output.rotation = Rotation::VFlip;
        let plan = Plan::new(&cfg, &Architecture::default()).unwrap();
        assert_eq!(plan.mode, TaskMode::Convert);

        let mx37 = Architecture {
            rotate_begin: Rotation::HFlip,
            ..Default::default()
        };
        cfg.output.rotation = Rotation::HFlip;
        assert_eq!(Plan::new(&cfg, &mx37).unwrap().mode, TaskMode::Rotate);
    }

    #[test]
    fn rotate_with_swapped_size_is_rotate_only() {
        let mut cfg = config(Frame::new(320, 240, RGBP), Frame::new(240, 320, RGBP));
        cfg.output.rotation = Rotation::Rotate90Right;
        let plan = Plan::new(&cfg, &Architecture::default()).unwrap();
        assert_eq!(plan.mode, TaskMode::Rotate);
        assert_eq!(plan.intermediate(), (320, 240));
    }

    #[test]
    fn rotate_and_resize_chains() {
        let mut cfg = config(Frame::new(640, 480, YUYV), Frame::new(240, 320, RGBP));
        cfg.output.rotation = Rotation::Rotate90Left;
        let plan = Plan::new(&cfg, &Architecture::default()).unwrap();
        assert_eq!(plan.mode, TaskMode::Chained);
    }

    #[test]
    fn same_format_same_size_copies_only_with_buffers() {
        let mut cfg = config(Frame::new(320, 240, UYVY), Frame::new(320, 240, UYVY));
        assert!(matches!(
            Plan::new(&cfg, &Architecture::default()),
            Err(Error::InvalidRequest(_))
        ));
        cfg.input.buffers[0] = Some(0x1000_0000);
        cfg.output.buffers[0] = Some(0x2000_0000);
        assert_eq!(
            Plan::new(&cfg, &Architecture::default()).unwrap().mode,
            TaskMode::Copy
        );

        cfg.mode.operation = Operation::Streaming;
        assert!(Plan::new(&cfg, &Architecture::default()).is_err());
    }

    #[test]
    fn split_rejects_rotation() {
        let mut cfg = config(Frame::new(1280, 720, YUYV), Frame::new(720, 1920, RGBP));
        cfg.output.rotation = Rotation::Rotate90Right;
        // 720 wide output after rotation, no split needed.
        assert!(Plan::new(&cfg, &Architecture::default()).is_ok());

        let mut cfg = config(Frame::new(1280, 720, YUYV), Frame::new(1920, 1080, RGBP));
        assert!(Plan::new(&cfg, &Architecture::default())
            .unwrap()
            .stripes
            .is_some());
        cfg.output.rotation = Rotation::Rotate90Left;
        assert!(matches!(
            Plan::new(&cfg, &Architecture::default()),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn overlay_checks() {
        let mut cfg = config(Frame::new(640, 480, I420), Frame::new(320, 240, RGBA));
        cfg.overlay = Some(OverlayParams {
            frame: Frame::new(320, 240, RGBA),
            alpha: OverlayAlpha::Global(128),
            ..Default::default()
        });
        let plan = Plan::new(&cfg, &Architecture::default()).unwrap();
        assert_eq!(plan.mode, TaskMode::Convert);
        assert!(plan.request(PathSet::ANY).overlay);

        cfg.mode = Mode {
            preference: PathSet::only(Path::Encode),
            ..Default::default()
        };
        assert!(Plan::new(&cfg, &Architecture::default()).is_err());

        cfg.mode = Mode::default();
        cfg.overlay.as_mut().unwrap().crop = Some(Rect::new(8, 8, 160, 120));
        assert!(Plan::new(&cfg, &Architecture::default()).is_err());
    }

    #[test]
    fn local_alpha_offset() {
        let mut cfg = config(Frame::new(640, 480, I420), Frame::new(160, 120, RGBA));
        cfg.overlay = Some(OverlayParams {
            frame: Frame::new(320, 240, RGBA),
            crop: Some(Rect::new(16, 4, 160, 120)),
            alpha: OverlayAlpha::Local {
                buffers: [None, None],
            },
            ..Default::default()
        });
        let plan = Plan::new(&cfg, &Architecture::default()).unwrap();
        assert_eq!(plan.overlay.unwrap().alpha_offset, 4 * 320 + 16);
    }

    #[test]
    fn unknown_format_rejected() {
        let cfg = config(
            Frame::new(320, 240, crate::format::GENERIC),
            Frame::new(160, 120, RGBA),
        );
        assert!(matches!(
            Plan::new(&cfg, &Architecture::default()),
            Err(Error::InvalidRequest(_))
        ));
    }
}
