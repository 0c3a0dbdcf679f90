//! Stage 3: compile kernel source against the session's device.

use opencl3::{
    error_codes::CL_INVALID_KERNEL_NAME,
    kernel::Kernel as ClKernel,
    program::Program as ClProgram,
};
use std::{borrow::Cow, fs, marker::PhantomData, path::PathBuf};
use tracing::{debug, trace, warn};

#[cfg(feature = "metrics")]
use crate::metrics::record;
#[cfg(feature = "metrics")]
use std::time::Instant;

use crate::{
    kernel::Kernel,
    session::Session,
    tracker::{ResourceKind, ResourceTracker, Tracked},
    ClError,
};

/// Where kernel source text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    Text(Cow<'static, str>),
    File(PathBuf),
}

impl KernelSource {
    pub fn load(&self) -> Result<Cow<'_, str>, ClError> {
        match self {
            KernelSource::Text(src) => Ok(Cow::Borrowed(src.as_ref())),
            KernelSource::File(path) => fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|source| ClError::KernelSource { path: path.clone(), source }),
        }
    }
}

impl From<&'static str> for KernelSource {
    fn from(src: &'static str) -> Self {
        KernelSource::Text(Cow::Borrowed(src))
    }
}

impl From<String> for KernelSource {
    fn from(src: String) -> Self {
        KernelSource::Text(Cow::Owned(src))
    }
}

impl From<PathBuf> for KernelSource {
    fn from(path: PathBuf) -> Self {
        KernelSource::File(path)
    }
}

/// A compiled module. May be asked for any number of entry points.
///
/// ```compile_fail
/// use clpipe::{ClError, Session, SessionConfig};
///
/// fn early_release(session: Session) -> Result<(), ClError> {
///     let _program = session.build_program("__kernel void k() {}", "")?;
///     drop(session);
///     Ok(())
/// }
/// ```
pub struct Program<'s> {
    program: Tracked<ClProgram>,
    tracker: Option<ResourceTracker>,
    _session: PhantomData<&'s Session>,
}

impl Session {
    /// Compiles `source` for this session's device. On failure the
    /// compiler's build log is carried in [`ClError::BuildFailed`].
    pub fn build_program(&self, source: &str, options: &str) -> Result<Program<'_>, ClError> {
        #[cfg(feature = "metrics")]
        let t = Instant::now();

        let program = ClProgram::create_from_source(self.context(), source).map_err(|e| {
            ClError::BuildFailed { log: format!("program object rejected (error {})", e.0) }
        })?;
        let mut program = Tracked::new(program, ResourceKind::Program, self.tracker());

        if let Err(e) = program.build(&[self.device().id()], options) {
            let log = program.get_build_log(self.device().id()).unwrap_or_default();
            let log = if log.trim().is_empty() {
                format!("build returned error {} without a log", e.0)
            } else {
                log
            };
            warn!(code = e.0, "program build failed");
            return Err(ClError::BuildFailed { log });
        }

        #[cfg(feature = "metrics")]
        record("build_program", t);

        debug!(bytes = source.len(), options, "program built");
        Ok(Program { program, tracker: self.tracker().cloned(), _session: PhantomData })
    }
}

impl<'s> Program<'s> {
    pub fn kernel(&self, name: &str) -> Result<Kernel<'_>, ClError> {
        let kernel = ClKernel::create(&self.program, name).map_err(|e| {
            if e.0 == CL_INVALID_KERNEL_NAME {
                ClError::KernelNotFound { name: name.to_owned() }
            } else {
                ClError::Api(e.0)
            }
        })?;
        let kernel = Tracked::new(kernel, ResourceKind::Kernel, self.tracker.as_ref());
        Ok(Kernel::new(kernel, name))
    }
}

impl Drop for Program<'_> {
    fn drop(&mut self) {
        trace!(id = ?self.program.id(), "program released");
    }
}
