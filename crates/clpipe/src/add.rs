//! Element-wise `f32` vector add, the smallest complete dispatch.

use crate::{
    grid::Grid,
    kernel::{ArgKind, Signature},
    pipeline::{Arg, Pipeline},
    session::SessionConfig,
    ClError,
};

pub const VEC_ADD_SOURCE: &str = include_str!("kernels/vec_add.cl");
pub const VEC_ADD_ENTRY: &str = "vec_add";

/// `a[i] = i`, `b[i] = n - i`, so every sum is `n`.
pub fn ramp_inputs(n: usize) -> (Vec<f32>, Vec<f32>) {
    let a = (0..n).map(|i| i as f32).collect();
    let b = (0..n).map(|i| (n - i) as f32).collect();
    (a, b)
}

pub fn vec_add_host(a: &[f32], b: &[f32]) -> Result<Vec<f32>, ClError> {
    if a.len() != b.len() {
        return Err(ClError::InvalidSize(b.len()));
    }
    Ok(a.iter().zip(b).map(|(x, y)| x + y).collect())
}

/// 1-D grid of `a.len()` items, work-groups of one; result in slot 2.
pub fn vec_add_pipeline(a: &[f32], b: &[f32]) -> Result<Pipeline, ClError> {
    if a.len() != b.len() {
        return Err(ClError::InvalidSize(b.len()));
    }
    if a.is_empty() {
        return Err(ClError::InvalidSize(0));
    }
    Ok(Pipeline::new(VEC_ADD_SOURCE, VEC_ADD_ENTRY)
        .args([Arg::input(a), Arg::input(b), Arg::output::<f32>(a.len())])
        .signature(Signature::new([ArgKind::Buffer; 3]))
        .grid(Grid::linear(a.len())?.with_local(&[1])?))
}

pub fn vec_add_device(config: &SessionConfig, a: &[f32], b: &[f32]) -> Result<Vec<f32>, ClError> {
    vec_add_pipeline(a, b)?.config(*config).run()?.read::<f32>(2)
}
