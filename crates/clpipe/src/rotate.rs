//! Forward-mapped image rotation about the image center.
//!
//! Every source pixel `(x, y)` is sent to
//!
//! ```text
//! x' = trunc((x - cx)·cos θ − (y - cy)·sin θ + cx)
//! y' = trunc((x - cx)·sin θ + (y - cy)·cos θ + cy)
//! ```
//!
//! with `(cx, cy) = (W/2, H/2)` and everything computed in `f32`. Targets
//! outside the image are dropped. This is a scatter: some destination pixels
//! get several writes (last one wins) and some get none and keep their zero
//! fill. Both artifacts are part of the algorithm and are kept as is.
//!
//! The device kernel (`kernels/rotate.cl`) and [`rotate_host`] evaluate the
//! same expression in the same order with contraction disabled, so for a
//! collision-free mapping they produce identical buffers.

use bytemuck::Pod;
use std::fmt::{self, Write as _};

use crate::{
    grid::Grid,
    kernel::{ArgKind, Signature},
    pipeline::{Arg, Pipeline},
    session::SessionConfig,
    ClError,
};

pub const ROTATE_SOURCE: &str = include_str!("kernels/rotate.cl");
pub const ROTATE_ENTRY: &str = "image_rotate";

/// Element type of an image buffer, with its OpenCL C spelling.
pub trait Pixel: Pod + PartialEq + fmt::Debug {
    const CL_TYPE: &'static str;
}

impl Pixel for u8 {
    const CL_TYPE: &'static str = "uchar";
}

impl Pixel for i32 {
    const CL_TYPE: &'static str = "int";
}

impl Pixel for u32 {
    const CL_TYPE: &'static str = "uint";
}

impl Pixel for f32 {
    const CL_TYPE: &'static str = "float";
}

/// Rotation angle as the `(sin, cos)` pair the kernel consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angle {
    pub sin: f32,
    pub cos: f32,
}

impl Angle {
    pub const ZERO: Angle = Angle { sin: 0.0, cos: 1.0 };

    pub fn from_sin_cos(sin: f32, cos: f32) -> Self {
        Self { sin, cos }
    }

    /// Evaluated in `f64` and narrowed afterwards: full turns leave a sine
    /// residue around 1e-16, far below what can move a truncated coordinate.
    pub fn from_degrees(degrees: f64) -> Self {
        Self::from_radians(degrees.to_radians())
    }

    pub fn from_radians(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self { sin: sin as f32, cos: cos as f32 }
    }
}

/// `(w, h)` as kernel ints, after checking them against the buffer length.
/// The kernel indexes with `int`, so `w * h` itself has to fit in one.
fn geometry(len: usize, width: usize, height: usize) -> Result<(i32, i32), ClError> {
    let w = i32::try_from(width).map_err(|_| ClError::InvalidSize(width))?;
    let h = i32::try_from(height).map_err(|_| ClError::InvalidSize(height))?;
    if w == 0 || h == 0 || width.checked_mul(height) != Some(len) {
        return Err(ClError::InvalidSize(len));
    }
    if w.checked_mul(h).is_none() {
        return Err(ClError::InvalidSize(len));
    }
    Ok((w, h))
}

/// Destination of source pixel `(x, y)`, or `None` when it lands outside.
pub fn rotate_point(x: i32, y: i32, w: i32, h: i32, angle: Angle) -> Option<(usize, usize)> {
    let (xc, yc) = (w / 2, h / 2);
    let dx = (x - xc) as f32;
    let dy = (y - yc) as f32;
    let xpos = (dx * angle.cos - dy * angle.sin + xc as f32) as i32;
    let ypos = (dx * angle.sin + dy * angle.cos + yc as f32) as i32;
    (xpos >= 0 && ypos >= 0 && xpos < w && ypos < h).then_some((xpos as usize, ypos as usize))
}

/// For every source pixel (row-major), the destination index it writes to.
pub fn forward_map(width: usize, height: usize, angle: Angle) -> Result<Vec<Option<usize>>, ClError> {
    let len = width.checked_mul(height).ok_or(ClError::InvalidSize(width))?;
    let (w, h) = geometry(len, width, height)?;
    let grid = Grid::planar(width, height)?;
    Ok(grid
        .points()
        .map(|[x, y, _]| rotate_point(x as i32, y as i32, w, h, angle).map(|(xp, yp)| yp * width + xp))
        .collect())
}

/// Host reference rotation; `dst` starts zero filled.
pub fn rotate_host<P: Pixel>(src: &[P], width: usize, height: usize, angle: Angle) -> Result<Vec<P>, ClError> {
    geometry(src.len(), width, height)?;
    let mut dst = vec![P::zeroed(); src.len()];
    for (i, target) in forward_map(width, height, angle)?.into_iter().enumerate() {
        if let Some(j) = target {
            dst[j] = src[i];
        }
    }
    Ok(dst)
}

/// Destination pixels that no source pixel maps to.
pub fn hole_count(width: usize, height: usize, angle: Angle) -> Result<usize, ClError> {
    let map = forward_map(width, height, angle)?;
    let mut hit = vec![false; map.len()];
    for j in map.into_iter().flatten() {
        hit[j] = true;
    }
    Ok(hit.iter().filter(|h| !**h).count())
}

pub fn rotate_signature() -> Signature {
    Signature::new([
        ArgKind::Buffer,
        ArgKind::Buffer,
        ArgKind::Int,
        ArgKind::Int,
        ArgKind::Float,
        ArgKind::Float,
    ])
}

/// Pipeline that rotates `src` on a device; the result is slot 1.
/// 2-D grid of `width × height`, work-groups of one item.
pub fn rotate_pipeline<P: Pixel>(
    src: &[P],
    width: usize,
    height: usize,
    angle: Angle,
) -> Result<Pipeline, ClError> {
    let (w, h) = geometry(src.len(), width, height)?;
    let grid = Grid::planar(width, height)?.with_local(&[1, 1])?;
    Ok(Pipeline::new(ROTATE_SOURCE, ROTATE_ENTRY)
        .build_options(&format!("-D PIXEL={}", P::CL_TYPE))
        .args([
            Arg::input(src),
            Arg::output::<P>(src.len()),
            Arg::Int(w),
            Arg::Int(h),
            Arg::Float(angle.sin),
            Arg::Float(angle.cos),
        ])
        .signature(rotate_signature())
        .grid(grid))
}

pub fn rotate_device<P: Pixel>(
    config: &SessionConfig,
    src: &[P],
    width: usize,
    height: usize,
    angle: Angle,
) -> Result<Vec<P>, ClError> {
    rotate_pipeline(src, width, height, angle)?
        .config(*config)
        .run()?
        .read::<P>(1)
}

/// One line per row, values separated by spaces.
pub fn format_rows<P: fmt::Display>(pixels: &[P], width: usize) -> String {
    let mut out = String::new();
    for row in pixels.chunks(width.max(1)) {
        for p in row {
            let _ = write!(out, "{p} ");
        }
        out.push('\n');
    }
    out
}
