use crate::DeviceProperties;
use core::fmt::Debug;
use core::time::Duration;
use std::collections::BTreeMap;
use thiserror::Error;

/// How a kernel may access a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    /// Kernels only read the buffer.
    ReadOnly,
    /// Kernels only write the buffer.
    WriteOnly,
    /// Kernels read and write the buffer.
    ReadWrite,
}

impl BufferAccess {
    /// Whether kernels may read the buffer.
    pub fn is_readable(&self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// Whether kernels may write the buffer.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// Description of a device program, compiled by the backend.
#[derive(new, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramSource {
    /// Name of the program, e.g. `scan`.
    pub name: &'static str,
    /// Integer compile-time constants.
    #[new(default)]
    pub defines: BTreeMap<&'static str, i64>,
    /// Type compile-time constants, e.g. `SCAN_T = uint4`.
    #[new(default)]
    pub type_defines: BTreeMap<&'static str, String>,
}

impl ProgramSource {
    /// Add an integer constant.
    pub fn define(mut self, name: &'static str, value: usize) -> Self {
        self.defines.insert(name, value as i64);
        self
    }

    /// Add a type constant.
    pub fn define_type(mut self, name: &'static str, ty: impl Into<String>) -> Self {
        self.type_defines.insert(name, ty.into());
        self
    }
}

/// Argument of a kernel launch.
#[derive(Debug)]
pub enum KernelArg<B: ComputeBackend> {
    /// A device buffer.
    Buffer(B::Buffer),
    /// A 32-bit unsigned scalar.
    U32(u32),
    /// Raw bytes of a scalar or vector value.
    Bytes(Vec<u8>),
}

impl<B: ComputeBackend> Clone for KernelArg<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Buffer(buffer) => Self::Buffer(buffer.clone()),
            Self::U32(value) => Self::U32(*value),
            Self::Bytes(bytes) => Self::Bytes(bytes.clone()),
        }
    }
}

/// A one dimensional kernel launch.
#[derive(new, Debug)]
pub struct KernelLaunch<B: ComputeBackend> {
    /// The compiled program holding the kernel.
    pub program: B::Program,
    /// The kernel entry point.
    pub kernel: &'static str,
    /// Total number of work items.
    pub global_size: usize,
    /// Number of work items per work group.
    pub local_size: usize,
    /// Kernel arguments in declaration order.
    pub args: Vec<KernelArg<B>>,
}

/// Failure reported by a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The device ran out of memory or another resource.
    #[error("Out of device resources: {reason}")]
    OutOfResources {
        /// Backend description.
        reason: String,
    },
    /// The launch configuration is not supported by the device.
    #[error("Invalid launch configuration: {reason}")]
    InvalidConfiguration {
        /// Backend description.
        reason: String,
    },
    /// A program failed to compile.
    #[error("Program {program} failed to compile: {log}")]
    Compilation {
        /// The program name.
        program: String,
        /// Compiler output.
        log: String,
    },
    /// Any other backend failure.
    #[error("Unknown backend error: {reason}")]
    Unknown {
        /// Backend description.
        reason: String,
    },
}

/// The boundary between the primitives and a compute API.
///
/// Everything is enqueued on a single in-order queue owned by the backend; every command
/// returns an event that completes when the command has finished. Commands can additionally
/// wait for a list of events.
pub trait ComputeBackend: Debug + Send + Sync + Sized + 'static {
    /// Handle to a device buffer.
    type Buffer: Clone + Debug + Send + Sync;
    /// Handle to a compiled program.
    type Program: Clone + Debug + Send + Sync;
    /// Completion event of an enqueued command.
    type Event: Clone + Debug + Send + Sync + 'static;

    /// Query the device capabilities.
    fn properties(&self) -> DeviceProperties;

    /// Compile a program.
    fn build_program(&self, source: &ProgramSource) -> Result<Self::Program, LaunchError>;

    /// Allocate a buffer of `size` bytes.
    fn create_buffer(&self, size: usize, access: BufferAccess)
    -> Result<Self::Buffer, LaunchError>;

    /// Size of a buffer in bytes.
    fn buffer_size(&self, buffer: &Self::Buffer) -> usize;

    /// Access flags of a buffer.
    fn buffer_access(&self, buffer: &Self::Buffer) -> BufferAccess;

    /// Enqueue a kernel.
    fn dispatch(
        &self,
        launch: KernelLaunch<Self>,
        wait_for: &[Self::Event],
    ) -> Result<Self::Event, LaunchError>;

    /// Enqueue a copy of `size` bytes from the start of `src` to the start of `dst`.
    fn copy(
        &self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: usize,
        wait_for: &[Self::Event],
    ) -> Result<Self::Event, LaunchError>;

    /// Read `out.len()` bytes starting at `offset`, blocking until the data is available.
    fn read(
        &self,
        src: &Self::Buffer,
        offset: usize,
        out: &mut [u8],
        wait_for: &[Self::Event],
    ) -> Result<Self::Event, LaunchError>;

    /// Enqueue a write of `data` at `offset`.
    fn write(
        &self,
        dst: &Self::Buffer,
        offset: usize,
        data: &[u8],
        wait_for: &[Self::Event],
    ) -> Result<Self::Event, LaunchError>;

    /// Block until the event completes and return the device time spent executing the command.
    fn wait(&self, event: &Self::Event) -> Result<Duration, LaunchError>;
}
