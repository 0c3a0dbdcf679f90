//! Iteration space of one dispatch: 1–3 global extents plus an optional local
//! work-group shape that has to divide them.

use crate::ClError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    dims: usize,
    // unused trailing dimensions are held at 1
    global: [usize; 3],
    local: Option<[usize; 3]>,
}

impl Grid {
    pub fn new(global: &[usize]) -> Result<Self, ClError> {
        if global.is_empty() || global.len() > 3 {
            return Err(ClError::InvalidGrid(format!(
                "{} dimensions given, expected 1 to 3",
                global.len()
            )));
        }
        if let Some(axis) = global.iter().position(|&g| g == 0) {
            return Err(ClError::InvalidGrid(format!("global extent {axis} is zero")));
        }
        let mut g = [1; 3];
        g[..global.len()].copy_from_slice(global);
        Ok(Self { dims: global.len(), global: g, local: None })
    }

    pub fn linear(n: usize) -> Result<Self, ClError> {
        Self::new(&[n])
    }

    pub fn planar(width: usize, height: usize) -> Result<Self, ClError> {
        Self::new(&[width, height])
    }

    /// Attach a work-group shape. Same arity as the global size, and every
    /// local extent has to divide its global extent.
    pub fn with_local(mut self, local: &[usize]) -> Result<Self, ClError> {
        if local.len() != self.dims {
            return Err(ClError::InvalidGrid(format!(
                "local size has {} dimensions, global size has {}",
                local.len(),
                self.dims
            )));
        }
        let mut l = [1; 3];
        for (axis, (&lo, &gl)) in local.iter().zip(&self.global).enumerate() {
            if lo == 0 || gl % lo != 0 {
                return Err(ClError::InvalidGrid(format!(
                    "local extent {lo} does not divide global extent {gl} on axis {axis}"
                )));
            }
            l[axis] = lo;
        }
        self.local = Some(l);
        Ok(self)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn global(&self) -> &[usize] {
        &self.global[..self.dims]
    }

    pub fn local(&self) -> Option<&[usize]> {
        self.local.as_ref().map(|l| &l[..self.dims])
    }

    /// Number of grid points, i.e. kernel invocations.
    pub fn len(&self) -> usize {
        self.global.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every point of the grid, axis 0 varying fastest. The order carries no
    /// meaning for a device dispatch; host reference paths just need one.
    pub fn points(&self) -> impl Iterator<Item = [usize; 3]> + use<> {
        let [gx, gy, _] = self.global;
        (0..self.len()).map(move |i| [i % gx, (i / gx) % gy, i / (gx * gy)])
    }

    pub(crate) fn global_ptr(&self) -> *const usize {
        self.global.as_ptr()
    }

    pub(crate) fn local_ptr(&self) -> *const usize {
        self.local.as_ref().map_or(std::ptr::null(), |l| l.as_ptr())
    }
}
