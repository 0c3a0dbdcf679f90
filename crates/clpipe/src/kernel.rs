//! Entry points and positional argument binding.

use opencl3::{kernel::Kernel as ClKernel, types::cl_mem};
use std::{fmt, marker::PhantomData};
use tracing::{debug, trace};

use crate::{program::Program, session::DeviceBuffer, tracker::Tracked, ClError};

/// Declared type of one kernel parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Buffer,
    Int,
    UInt,
    Float,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgKind::Buffer => "buffer",
            ArgKind::Int => "int",
            ArgKind::UInt => "uint",
            ArgKind::Float => "float",
        })
    }
}

/// One positional argument. Buffers are borrowed for `'a`, so they outlive
/// every dispatch of the kernel they are bound to.
#[derive(Clone, Copy)]
pub enum KernelArg<'a> {
    Buffer(MemRef<'a>),
    Int(i32),
    UInt(u32),
    Float(f32),
}

/// Borrowed device memory handle.
#[derive(Clone, Copy)]
pub struct MemRef<'a> {
    mem: cl_mem,
    _buffer: PhantomData<&'a ()>,
}

impl<'a> KernelArg<'a> {
    pub fn buffer<T>(buffer: &'a DeviceBuffer<'_, T>) -> Self {
        KernelArg::Buffer(MemRef { mem: buffer.mem(), _buffer: PhantomData })
    }

    pub fn kind(&self) -> ArgKind {
        match self {
            KernelArg::Buffer(_) => ArgKind::Buffer,
            KernelArg::Int(_) => ArgKind::Int,
            KernelArg::UInt(_) => ArgKind::UInt,
            KernelArg::Float(_) => ArgKind::Float,
        }
    }
}

impl<'a, T> From<&'a DeviceBuffer<'_, T>> for KernelArg<'a> {
    fn from(buffer: &'a DeviceBuffer<'_, T>) -> Self {
        KernelArg::buffer(buffer)
    }
}

impl From<i32> for KernelArg<'_> {
    fn from(v: i32) -> Self {
        KernelArg::Int(v)
    }
}

impl From<u32> for KernelArg<'_> {
    fn from(v: u32) -> Self {
        KernelArg::UInt(v)
    }
}

impl From<f32> for KernelArg<'_> {
    fn from(v: f32) -> Self {
        KernelArg::Float(v)
    }
}

/// Parameter list a kernel is declared with, checked before binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<ArgKind>);

impl Signature {
    pub fn new(kinds: impl Into<Vec<ArgKind>>) -> Self {
        Self(kinds.into())
    }

    pub fn check(&self, supplied: &[ArgKind]) -> Result<(), ClError> {
        for (slot, (want, got)) in self.0.iter().zip(supplied).enumerate() {
            if want != got {
                return Err(ClError::ArgumentBinding {
                    slot: slot as u32,
                    reason: format!("expected {want}, got {got}"),
                });
            }
        }
        if self.0.len() != supplied.len() {
            return Err(ClError::ArgumentBinding {
                slot: self.0.len().min(supplied.len()) as u32,
                reason: format!(
                    "signature has {} parameters, {} arguments supplied",
                    self.0.len(),
                    supplied.len()
                ),
            });
        }
        Ok(())
    }
}

// ─── Kernel ──────────────────────────────────────────────────────────

/// A resolved entry point, not yet bound.
pub struct Kernel<'p> {
    kernel: Tracked<ClKernel>,
    name: String,
    _program: PhantomData<&'p Program<'p>>,
}

impl<'p> Kernel<'p> {
    pub(crate) fn new(kernel: Tracked<ClKernel>, name: &str) -> Self {
        Self { kernel, name: name.to_owned(), _program: PhantomData }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter count as reported by the runtime.
    pub fn num_args(&self) -> Result<u32, ClError> {
        Ok(self.kernel.num_args()?)
    }

    /// Binds `args` slot by slot, after checking them against `signature`
    /// (when given) and the runtime parameter count.
    pub fn bind<'a>(
        self,
        args: &[KernelArg<'a>],
        signature: Option<&Signature>,
    ) -> Result<BoundKernel<'a>, ClError>
    where
        'p: 'a,
    {
        let kinds: Vec<ArgKind> = args.iter().map(KernelArg::kind).collect();
        if let Some(sig) = signature {
            sig.check(&kinds)?;
        }
        let declared = self.num_args()? as usize;
        if declared != args.len() {
            return Err(ClError::ArgumentBinding {
                slot: declared.min(args.len()) as u32,
                reason: format!(
                    "kernel `{}` takes {declared} arguments, {} supplied",
                    self.name,
                    args.len()
                ),
            });
        }

        for (slot, arg) in args.iter().enumerate() {
            let index = slot as u32;
            let res = unsafe {
                match arg {
                    KernelArg::Buffer(m) => self.kernel.set_arg(index, &m.mem),
                    KernelArg::Int(v) => self.kernel.set_arg(index, v),
                    KernelArg::UInt(v) => self.kernel.set_arg(index, v),
                    KernelArg::Float(v) => self.kernel.set_arg(index, v),
                }
            };
            res.map_err(|e| ClError::ArgumentBinding {
                slot: index,
                reason: format!("runtime rejected {} argument (error {})", arg.kind(), e.0),
            })?;
        }
        debug!(kernel = %self.name, args = args.len(), "arguments bound");

        Ok(BoundKernel { kernel: self, _args: PhantomData })
    }
}

impl Drop for Kernel<'_> {
    fn drop(&mut self) {
        trace!(kernel = %self.name, "kernel released");
    }
}

/// A kernel whose every slot is bound; borrows its buffer arguments.
pub struct BoundKernel<'a> {
    kernel: Kernel<'a>,
    _args: PhantomData<KernelArg<'a>>,
}

impl BoundKernel<'_> {
    pub fn name(&self) -> &str {
        &self.kernel.name
    }

    pub fn raw(&self) -> &ClKernel {
        &self.kernel.kernel
    }
}
