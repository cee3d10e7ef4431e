// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{Error, Result},
    geometry::align_down,
};

/// Fixed-point one for resize ratios, 32 fractional bits.
pub const RATIO_ONE: u64 = 1 << 32;

/// One half of a split frame. Columns are in pixels; callers convert them
/// to bytes with the format's bytes per pixel before adding them to an
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stripe {
    pub input_width: u32,
    pub output_width: u32,
    pub input_column: u32,
    pub output_column: u32,
    /// Input to output ratio scaled by the planner's denominator.
    pub resize_ratio: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripePlan {
    pub left: Stripe,
    pub right: Stripe,
}

/// Splits an `input` wide source scaled to `output` pixels into two
/// side-by-side passes no wider than `max` output pixels each.
///
/// Both output halves are kept as equal as the 8-pixel alignment allows.
/// The input is divided in the same proportion, so each stripe gets its own
/// ratio and the rounding error lands in the right stripe.
pub fn plan(input: u32, output: u32, max: u32, denominator: u64) -> Result<StripePlan> {
    if output > 2 * max {
        return Err(Error::invalid(format!(
            "output width {output} needs more than two {max} pixel passes"
        )));
    }

    let mut left_out = align_down(output / 2);
    if output - left_out > max {
        left_out = output - max;
    }
    let right_out = output - left_out;

    let scaled = (input as u64 * left_out as u64 + output as u64 / 2) / output as u64;
    let left_in = align_down(scaled as u32);
    let right_in = input - left_in;

    if left_out == 0 || left_in == 0 || right_in == 0 {
        return Err(Error::invalid(format!(
            "cannot split {input} input columns over {output} output columns"
        )));
    }

    let ratio = |i: u32, o: u32| i as u64 * denominator / o as u64;

    Ok(StripePlan {
        left: Stripe {
            input_width: left_in,
            output_width: left_out,
            input_column: 0,
            output_column: 0,
            resize_ratio: ratio(left_in, left_out),
        },
        right: Stripe {
            input_width: right_in,
            output_width: right_out,
            input_column: left_in,
            output_column: left_out,
            resize_ratio: ratio(right_in, right_out),
        },
    })
}
