//! The five stages as one parameterised routine.

use bytemuck::Pod;
use tracing::{debug, info_span};

use crate::{
    grid::Grid,
    kernel::{ArgKind, KernelArg, Signature},
    program::KernelSource,
    session::{Access, DeviceBuffer, DeviceClass, PlatformSelector, Session, SessionConfig},
    tracker::ResourceTracker,
    ClError,
};

/// Owned argument description; buffers are created from it during `run`.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Buffer { access: Access, bytes: Vec<u8> },
    Int(i32),
    UInt(u32),
    Float(f32),
}

impl Arg {
    /// Read-only buffer holding a copy of `data`.
    pub fn input<T: Pod>(data: &[T]) -> Self {
        Arg::Buffer { access: Access::ReadOnly, bytes: bytemuck::cast_slice(data).to_vec() }
    }

    /// Read-write buffer of `len` elements, zero filled; read back after the run.
    pub fn output<T: Pod>(len: usize) -> Self {
        Arg::Buffer { access: Access::ReadWrite, bytes: vec![0; len * std::mem::size_of::<T>()] }
    }

    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Buffer { .. } => ArgKind::Buffer,
            Arg::Int(_) => ArgKind::Int,
            Arg::UInt(_) => ArgKind::UInt,
            Arg::Float(_) => ArgKind::Float,
        }
    }
}

/// Builder for one dispatch: where to run, what to compile, what to bind and
/// over which grid.
#[derive(Clone)]
pub struct Pipeline {
    config: SessionConfig,
    source: KernelSource,
    options: String,
    entry: String,
    args: Vec<Arg>,
    signature: Option<Signature>,
    grid: Option<Grid>,
    tracker: Option<ResourceTracker>,
}

impl Pipeline {
    pub fn new(source: impl Into<KernelSource>, entry: &str) -> Self {
        Self {
            config: SessionConfig::default(),
            source: source.into(),
            options: String::new(),
            entry: entry.to_owned(),
            args: Vec::new(),
            signature: None,
            grid: None,
            tracker: None,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn platform(mut self, platform: PlatformSelector) -> Self {
        self.config.platform = platform;
        self
    }

    pub fn device_class(mut self, class: DeviceClass) -> Self {
        self.config.device_class = class;
        self
    }

    /// Replaces the kernel source, e.g. with a file on disk.
    pub fn source(mut self, source: impl Into<KernelSource>) -> Self {
        self.source = source.into();
        self
    }

    pub fn build_options(mut self, options: &str) -> Self {
        self.options = options.to_owned();
        self
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = Arg>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn grid(mut self, grid: Grid) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn tracker(mut self, tracker: ResourceTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Checks everything that can be checked without a device.
    pub fn validate(&self) -> Result<&Grid, ClError> {
        let grid = self
            .grid
            .as_ref()
            .ok_or_else(|| ClError::InvalidGrid("no grid set".into()))?;
        if let Some(sig) = &self.signature {
            let kinds: Vec<ArgKind> = self.args.iter().map(Arg::kind).collect();
            sig.check(&kinds)?;
        }
        let empty = self
            .args
            .iter()
            .position(|arg| matches!(arg, Arg::Buffer { bytes, .. } if bytes.is_empty()));
        if let Some(slot) = empty {
            return Err(ClError::ArgumentBinding {
                slot: slot as u32,
                reason: "buffer argument is empty".into(),
            });
        }
        Ok(grid)
    }

    /// Discover, set up, build, bind, dispatch, wait, read back.
    pub fn run(&self) -> Result<DispatchOutput, ClError> {
        let grid = self.validate()?;
        let span = info_span!("pipeline", entry = %self.entry);
        let _enter = span.enter();

        let source = self.source.load()?;
        let session = Session::acquire_tracked(&self.config, self.tracker.clone())?;
        let program = session.build_program(&source, &self.options)?;
        let kernel = program.kernel(&self.entry)?;

        // ein Device-Buffer pro Buffer-Slot, Skalare bleiben None
        let buffers = self
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Buffer { access, bytes } => session.upload(*access, bytes.as_slice()).map(Some),
                _ => Ok(None),
            })
            .collect::<Result<Vec<Option<DeviceBuffer<'_, u8>>>, ClError>>()?;

        let bound_args = self
            .args
            .iter()
            .zip(&buffers)
            .enumerate()
            .map(|(slot, (arg, buf))| match (arg, buf) {
                (Arg::Buffer { .. }, Some(b)) => Ok(KernelArg::buffer(b)),
                (Arg::Buffer { .. }, None) => Err(ClError::ArgumentBinding {
                    slot: slot as u32,
                    reason: "buffer was not created".into(),
                }),
                (Arg::Int(v), _) => Ok(KernelArg::Int(*v)),
                (Arg::UInt(v), _) => Ok(KernelArg::UInt(*v)),
                (Arg::Float(v), _) => Ok(KernelArg::Float(*v)),
            })
            .collect::<Result<Vec<KernelArg<'_>>, ClError>>()?;
        let kernel = kernel.bind(&bound_args, self.signature.as_ref())?;

        session.enqueue(&kernel, grid)?.wait()?;
        debug!("dispatch complete");

        let mut slots = Vec::with_capacity(buffers.len());
        for buf in &buffers {
            slots.push(match buf {
                Some(b) if b.access().is_writable() => Some(session.read(b)?),
                _ => None,
            });
        }
        Ok(DispatchOutput { slots })
    }
}

/// Read-back contents of every writable buffer argument, by slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutput {
    slots: Vec<Option<Vec<u8>>>,
}

impl DispatchOutput {
    pub fn bytes(&self, slot: usize) -> Option<&[u8]> {
        self.slots.get(slot).and_then(|s| s.as_deref())
    }

    /// Decodes slot `slot` as a vector of `T`.
    pub fn read<T: Pod>(&self, slot: usize) -> Result<Vec<T>, ClError> {
        let bytes = self.bytes(slot).ok_or_else(|| {
            ClError::ReadbackFailure(format!("slot {slot} is not a writable buffer argument"))
        })?;
        let size = std::mem::size_of::<T>();
        if size == 0 || bytes.len() % size != 0 {
            return Err(ClError::InvalidSize(bytes.len()));
        }
        let mut out = vec![T::zeroed(); bytes.len() / size];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn arg_constructors_tag_access() {
        assert!(matches!(Arg::input(&[1.0_f32, 2.0]), Arg::Buffer { access: Access::ReadOnly, ref bytes } if bytes.len() == 8));
        assert!(matches!(Arg::output::<i32>(6), Arg::Buffer { access: Access::ReadWrite, ref bytes } if bytes == &vec![0; 24]));
        assert_eq!(Arg::Float(0.5).kind(), ArgKind::Float);
    }

    #[test]
    fn selector_overrides_land_in_the_config() {
        let p = Pipeline::new("", "k")
            .platform(PlatformSelector::Index(2))
            .device_class(DeviceClass::Cpu);
        assert_eq!(p.config, SessionConfig { platform: PlatformSelector::Index(2), device_class: DeviceClass::Cpu });
        let p = p.config(SessionConfig::default());
        assert_eq!(p.config.device_class, DeviceClass::Gpu);
    }

    #[test]
    fn validate_requires_a_grid() {
        let p = Pipeline::new("__kernel void k() {}", "k");
        assert_eq!(p.validate().unwrap_err().kind(), ErrorKind::Dispatch);
    }

    #[test]
    fn validate_checks_signature_before_touching_a_device() {
        let p = Pipeline::new("", "k")
            .arg(Arg::input(&[0_i32; 4]))
            .arg(Arg::Float(1.0))
            .signature(Signature::new([ArgKind::Buffer, ArgKind::Int]))
            .grid(Grid::linear(4).unwrap());
        let err = p.validate().unwrap_err();
        assert!(matches!(err, ClError::ArgumentBinding { slot: 1, .. }));
    }

    #[test]
    fn validate_rejects_empty_buffers() {
        let p = Pipeline::new("", "k")
            .arg(Arg::input::<f32>(&[]))
            .grid(Grid::linear(1).unwrap());
        assert!(matches!(p.validate(), Err(ClError::ArgumentBinding { slot: 0, .. })));
    }

    #[test]
    fn missing_kernel_file_fails_before_discovery() {
        let p = Pipeline::new(std::path::PathBuf::from("/nonexistent/add.cl"), "vec_add")
            .grid(Grid::linear(1).unwrap());
        assert!(matches!(p.run(), Err(ClError::KernelSource { .. })));
    }

    #[test]
    fn output_decodes_typed_slots() {
        let out = DispatchOutput {
            slots: vec![None, Some(bytemuck::cast_slice(&[7_i32, -1]).to_vec())],
        };
        assert_eq!(out.read::<i32>(1).unwrap(), vec![7, -1]);
        assert!(matches!(out.read::<i32>(0), Err(ClError::ReadbackFailure(_))));
        assert!(matches!(out.read::<i32>(5), Err(ClError::ReadbackFailure(_))));
        assert!(matches!(out.read::<u64>(1), Ok(v) if v.len() == 1));
        assert!(matches!(out.read::<[u8; 3]>(1), Err(ClError::InvalidSize(8))));
    }
}
