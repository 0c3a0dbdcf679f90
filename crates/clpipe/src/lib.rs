//! Five-stage OpenCL dispatch pipeline.
//!
//! discover → session (context + queue) → program build → argument binding →
//! dispatch & read-back. Every runtime object is held in a [`Tracked`]
//! wrapper so it is released exactly once on every exit path; programs,
//! kernels and buffers borrow their [`Session`] and therefore always go away
//! before the queue and context do.

// ─── Feature‑Module ───────────────────────────────────────────────────
#[cfg(feature = "metrics")]
pub mod metrics;

pub mod add;
pub mod discover;
pub mod grid;
pub mod kernel;
pub mod pipeline;
pub mod program;
pub mod rotate;
pub mod session;
pub mod tracker;

pub use grid::Grid;
pub use kernel::{ArgKind, BoundKernel, Kernel, KernelArg, Signature};
pub use pipeline::{Arg, DispatchOutput, Pipeline};
pub use program::{KernelSource, Program};
pub use rotate::{Angle, Pixel};
pub use session::{
    Access, DeviceBuffer, DeviceClass, InFlight, PlatformSelector, Session, SessionConfig,
};
pub use tracker::{ResourceKind, ResourceTracker, Tracked, TrackerReport};

use std::path::PathBuf;

// ─── Fehler‑Typ ───────────────────────────────────────────────────────
#[derive(thiserror::Error, Debug)]
pub enum ClError {
    #[error("OpenCL API error: {0}")]
    Api(i32),
    #[error("no OpenCL platform found")]
    NoPlatformFound,
    #[error("context creation failed for {class} devices: {reason}")]
    ContextCreationFailed { class: DeviceClass, reason: String },
    #[error("no device available in context")]
    NoDeviceAvailable,
    #[error("program build failed:\n{log}")]
    BuildFailed { log: String },
    #[error("kernel `{name}` not found in program")]
    KernelNotFound { name: String },
    #[error("kernel argument {slot}: {reason}")]
    ArgumentBinding { slot: u32, reason: String },
    #[error("invalid grid: {0}")]
    InvalidGrid(String),
    #[error("dispatch failed: {0}")]
    DispatchFailure(String),
    #[error("read-back failed: {0}")]
    ReadbackFailure(String),
    #[error("invalid buffer size: {0}")]
    InvalidSize(usize),
    #[error("cannot read kernel source {}: {source}", path.display())]
    KernelSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("resource tracker: {0}")]
    Tracker(String),
}

/// Coarse failure classes surfaced to users; one per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Discovery,
    Compilation,
    ArgumentBinding,
    Dispatch,
    Readback,
    Other,
}

impl ClError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClError::NoPlatformFound
            | ClError::ContextCreationFailed { .. }
            | ClError::NoDeviceAvailable => ErrorKind::Discovery,
            ClError::BuildFailed { .. } | ClError::KernelSource { .. } => ErrorKind::Compilation,
            ClError::KernelNotFound { .. } | ClError::ArgumentBinding { .. } => {
                ErrorKind::ArgumentBinding
            }
            ClError::InvalidGrid(_) | ClError::DispatchFailure(_) => ErrorKind::Dispatch,
            ClError::ReadbackFailure(_) => ErrorKind::Readback,
            ClError::Api(_) | ClError::InvalidSize(_) | ClError::Tracker(_) => ErrorKind::Other,
        }
    }
}

impl From<opencl3::error_codes::ClError> for ClError {
    #[inline]
    fn from(err: opencl3::error_codes::ClError) -> Self {
        ClError::Api(err.0)
    }
}

impl From<i32> for ClError {
    #[inline]
    fn from(code: i32) -> Self {
        ClError::Api(code)
    }
}
