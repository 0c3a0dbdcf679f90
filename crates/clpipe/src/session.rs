//! Stages 1, 2 and the data-movement half of 4 and 5: platform selection,
//! context and queue, device buffers, dispatch and blocking read-back.

use bytemuck::Pod;
use opencl3::{
    command_queue::CommandQueue,
    context::Context,
    device::{
        Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
        CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
    },
    event::Event,
    memory::{
        Buffer, ClMem, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE,
        CL_MEM_WRITE_ONLY,
    },
    platform::get_platforms,
    types::{cl_device_type, cl_mem, cl_mem_flags, CL_BLOCKING},
};
use std::{ffi::c_void, fmt, marker::PhantomData, ptr, str::FromStr};
use tracing::{debug, info, trace};

#[cfg(feature = "metrics")]
use crate::metrics::{record, ALLOCS, ALLOC_BYTES};
#[cfg(feature = "metrics")]
use std::{sync::atomic::Ordering, time::Instant};

use crate::{
    grid::Grid,
    kernel::BoundKernel,
    tracker::{ResourceKind, ResourceTracker, Tracked},
    ClError,
};

// ─── Konfiguration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlatformSelector {
    #[default]
    First,
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClass {
    #[default]
    Gpu,
    Cpu,
    Accelerator,
    Default,
    All,
}

impl DeviceClass {
    pub fn cl_type(self) -> cl_device_type {
        match self {
            DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
            DeviceClass::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
            DeviceClass::Default => CL_DEVICE_TYPE_DEFAULT,
            DeviceClass::All => CL_DEVICE_TYPE_ALL,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceClass::Gpu => "gpu",
            DeviceClass::Cpu => "cpu",
            DeviceClass::Accelerator => "accelerator",
            DeviceClass::Default => "default",
            DeviceClass::All => "all",
        })
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceClass::Gpu),
            "cpu" => Ok(DeviceClass::Cpu),
            "accelerator" | "acc" => Ok(DeviceClass::Accelerator),
            "default" => Ok(DeviceClass::Default),
            "all" | "any" => Ok(DeviceClass::All),
            other => Err(format!(
                "unknown device class `{other}` (gpu, cpu, accelerator, default, all)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConfig {
    pub platform: PlatformSelector,
    pub device_class: DeviceClass,
}

/// Host-side access tag of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

impl Access {
    fn flags(self) -> cl_mem_flags {
        match self {
            Access::ReadOnly => CL_MEM_READ_ONLY,
            Access::ReadWrite => CL_MEM_READ_WRITE,
            Access::WriteOnly => CL_MEM_WRITE_ONLY,
        }
    }

    /// Whether the kernel may write into buffers with this tag.
    pub fn is_writable(self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

// ─── Session ─────────────────────────────────────────────────────────

/// Context, device and in-order queue for one run.
///
/// Field order is drop order: the queue goes before the context.
pub struct Session {
    queue: Tracked<CommandQueue>,
    context: Tracked<Context>,
    device: Device,
    tracker: Option<ResourceTracker>,
}

impl Session {
    pub fn acquire(config: &SessionConfig) -> Result<Self, ClError> {
        Self::acquire_tracked(config, None)
    }

    /// Like [`Session::acquire`], recording every created handle in `tracker`.
    pub fn acquire_tracked(
        config: &SessionConfig,
        tracker: Option<ResourceTracker>,
    ) -> Result<Self, ClError> {
        #[cfg(feature = "metrics")]
        let t = Instant::now();

        // 1. Plattform
        let mut platforms = get_platforms().map_err(|e| {
            debug!(code = e.0, "platform enumeration failed");
            ClError::NoPlatformFound
        })?;
        debug!(count = platforms.len(), "platforms enumerated");
        let index = match config.platform {
            PlatformSelector::First => 0,
            PlatformSelector::Index(i) => i,
        };
        if index >= platforms.len() {
            return Err(ClError::NoPlatformFound);
        }
        let platform = platforms.swap_remove(index);

        // 2. Kontext auf eine Geräteklasse beschränkt
        let class = config.device_class;
        let ids = platform.get_devices(class.cl_type()).map_err(|e| {
            ClError::ContextCreationFailed {
                class,
                reason: format!("device query returned error {}", e.0),
            }
        })?;
        let first = *ids.first().ok_or_else(|| ClError::ContextCreationFailed {
            class,
            reason: "platform exposes no matching device".into(),
        })?;
        let context = Context::from_device(&Device::new(first)).map_err(|e| {
            ClError::ContextCreationFailed {
                class,
                reason: format!("runtime refused context (error {})", e.0),
            }
        })?;
        let context = Tracked::new(context, ResourceKind::Context, tracker.as_ref());

        let device_id = *context.devices().first().ok_or(ClError::NoDeviceAvailable)?;
        let device = Device::new(device_id);
        info!(
            platform = %platform.name().unwrap_or_default(),
            device = %device.name().unwrap_or_default(),
            %class,
            "device selected"
        );

        #[allow(deprecated)]
        let queue = CommandQueue::create(&context, device_id, 0)?;
        let queue = Tracked::new(queue, ResourceKind::Queue, tracker.as_ref());

        #[cfg(feature = "metrics")]
        record("acquire", t);

        Ok(Self { queue, context, device, tracker })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn tracker(&self) -> Option<&ResourceTracker> {
        self.tracker.as_ref()
    }

    /// Uninitialised device buffer of `len` elements.
    pub fn create_buffer<T: Pod>(
        &self,
        access: Access,
        len: usize,
    ) -> Result<DeviceBuffer<'_, T>, ClError> {
        self.alloc(access, len, ptr::null_mut(), 0)
    }

    /// Device buffer populated from `data` at creation time.
    pub fn upload<T: Pod>(&self, access: Access, data: &[T]) -> Result<DeviceBuffer<'_, T>, ClError> {
        // COPY_HOST_PTR only reads through the pointer
        let host = data.as_ptr() as *mut c_void;
        self.alloc(access, data.len(), host, CL_MEM_COPY_HOST_PTR)
    }

    fn alloc<T: Pod>(
        &self,
        access: Access,
        len: usize,
        host: *mut c_void,
        extra: cl_mem_flags,
    ) -> Result<DeviceBuffer<'_, T>, ClError> {
        if len == 0 {
            return Err(ClError::InvalidSize(len));
        }

        #[cfg(feature = "metrics")]
        let t = Instant::now();

        let buf = unsafe { Buffer::<T>::create(&self.context, access.flags() | extra, len, host)? };

        #[cfg(feature = "metrics")]
        {
            record("create_buffer", t);
            ALLOCS.fetch_add(1, Ordering::Relaxed);
            ALLOC_BYTES.fetch_add(len * std::mem::size_of::<T>(), Ordering::Relaxed);
        }

        debug!(len, ?access, bytes = len * std::mem::size_of::<T>(), "buffer created");
        Ok(DeviceBuffer {
            buf: Tracked::new(buf, ResourceKind::Buffer, self.tracker()),
            len,
            access,
            _session: PhantomData,
        })
    }

    /// Submits `kernel` over `grid`. The returned guard blocks on the queue
    /// when dropped, so nothing the kernel borrowed is released while the
    /// dispatch is still running.
    pub fn enqueue<'a>(
        &'a self,
        kernel: &'a BoundKernel<'_>,
        grid: &Grid,
    ) -> Result<InFlight<'a>, ClError> {
        #[cfg(feature = "metrics")]
        let t = Instant::now();

        let event = unsafe {
            self.queue.enqueue_nd_range_kernel(
                kernel.raw().get(),
                grid.dims() as u32,
                ptr::null(),
                grid.global_ptr(),
                grid.local_ptr(),
                &[],
            )
        }
        .map_err(|e| {
            ClError::DispatchFailure(format!(
                "kernel `{}` rejected over {:?} (error {})",
                kernel.name(),
                grid.global(),
                e.0
            ))
        })?;

        #[cfg(feature = "metrics")]
        record("enqueue", t);

        debug!(kernel = kernel.name(), global = ?grid.global(), local = ?grid.local(), "kernel enqueued");
        Ok(InFlight { queue: self.queue(), _event: event, done: false, _kernel: PhantomData })
    }

    /// Blocking copy of the whole buffer back to host memory.
    pub fn read<T: Pod>(&self, buffer: &DeviceBuffer<'_, T>) -> Result<Vec<T>, ClError> {
        #[cfg(feature = "metrics")]
        let t = Instant::now();

        let mut host = vec![T::zeroed(); buffer.len];
        unsafe {
            self.queue
                .enqueue_read_buffer(buffer.raw(), CL_BLOCKING, 0, &mut host[..], &[])
        }
        .map_err(|e| {
            ClError::ReadbackFailure(format!(
                "reading {} bytes returned error {}",
                buffer.len * std::mem::size_of::<T>(),
                e.0
            ))
        })?;

        #[cfg(feature = "metrics")]
        record("read", t);

        Ok(host)
    }
}

// ─── Device‑Buffer ───────────────────────────────────────────────────

/// Device memory owned by a session's context. It cannot outlive the
/// session it was created from:
///
/// ```compile_fail
/// use clpipe::{Access, ClError, Session, SessionConfig};
///
/// fn early_release(session: Session) -> Result<(), ClError> {
///     let _buf = session.create_buffer::<f32>(Access::ReadOnly, 4)?;
///     drop(session);
///     Ok(())
/// }
/// ```
pub struct DeviceBuffer<'s, T> {
    buf: Tracked<Buffer<T>>,
    len: usize,
    access: Access,
    _session: PhantomData<&'s Session>,
}

impl<'s, T> DeviceBuffer<'s, T> {
    #[inline(always)]
    pub fn raw(&self) -> &Buffer<T> {
        &self.buf
    }

    /// Length in elements.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub(crate) fn mem(&self) -> cl_mem {
        self.buf.get()
    }
}

// Also what keeps `'s` alive until the buffer is gone.
impl<T> Drop for DeviceBuffer<'_, T> {
    fn drop(&mut self) {
        #[cfg(feature = "metrics")]
        {
            ALLOCS.fetch_sub(1, Ordering::Relaxed);
            ALLOC_BYTES.fetch_sub(self.len * std::mem::size_of::<T>(), Ordering::Relaxed);
        }
        trace!(len = self.len, access = ?self.access, "buffer released");
    }
}

// ─── Guard (wartet bei Drop auf die Queue) ───────────────────────────

pub struct InFlight<'a> {
    queue: &'a CommandQueue,
    _event: Event,
    done: bool,
    _kernel: PhantomData<&'a BoundKernel<'a>>,
}

impl InFlight<'_> {
    /// The single blocking wait of a run.
    pub fn wait(mut self) -> Result<(), ClError> {
        self.done = true;
        self.queue
            .finish()
            .map_err(|e| ClError::DispatchFailure(format!("queue finish returned error {}", e.0)))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.queue.finish();
        }
    }
}
