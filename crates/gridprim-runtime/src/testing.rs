use crate::backend::{
    BufferAccess, ComputeBackend, KernelArg, KernelLaunch, LaunchError, ProgramSource,
};
use crate::{DeviceFeature, DeviceKind, DeviceProperties};
use core::time::Duration;
use hashbrown::HashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Buffer of the [dummy backend](DummyBackend). No memory is allocated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DummyBuffer {
    id: u64,
    size: usize,
    access: BufferAccess,
}

impl DummyBuffer {
    /// Identifier of the buffer, unique per backend.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Program of the [dummy backend](DummyBackend).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DummyProgram {
    source: Arc<ProgramSource>,
}

impl DummyProgram {
    /// The source the program was built from.
    pub fn source(&self) -> &ProgramSource {
        &self.source
    }
}

/// Completion event of the [dummy backend](DummyBackend).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DummyEvent {
    id: u64,
    command: String,
}

impl DummyEvent {
    /// Identifier of the event, increasing in enqueue order.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the command that produced the event, the kernel name for launches.
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Recorded kernel argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgRecord {
    /// Buffer identifier.
    Buffer(u64),
    /// Scalar value.
    U32(u32),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// Recorded kernel launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Program name.
    pub program: &'static str,
    /// Kernel name.
    pub kernel: &'static str,
    /// Integer constants of the program.
    pub defines: BTreeMap<&'static str, i64>,
    /// Type constants of the program.
    pub type_defines: BTreeMap<&'static str, String>,
    /// Total number of work items.
    pub global_size: usize,
    /// Work group size.
    pub local_size: usize,
    /// Arguments.
    pub args: Vec<ArgRecord>,
    /// Events the launch waited for.
    pub wait_for: Vec<u64>,
}

impl LaunchRecord {
    /// Value of an integer constant of the program.
    pub fn define(&self, name: &str) -> Option<i64> {
        self.defines.get(name).copied()
    }
}

/// Recorded command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DummyCommand {
    /// A kernel launch.
    Launch(LaunchRecord),
    /// A buffer to buffer copy.
    Copy {
        /// Source buffer.
        src: u64,
        /// Destination buffer.
        dst: u64,
        /// Bytes copied.
        size: usize,
    },
    /// A blocking read.
    Read {
        /// Source buffer.
        src: u64,
        /// Offset in bytes.
        offset: usize,
        /// Bytes read.
        len: usize,
    },
    /// A write from host memory.
    Write {
        /// Destination buffer.
        dst: u64,
        /// Offset in bytes.
        offset: usize,
        /// Bytes written.
        data: Vec<u8>,
    },
}

type CostFn = dyn Fn(&LaunchRecord) -> Result<Duration, LaunchError> + Send + Sync;
type BuildFn = dyn Fn(&ProgramSource) -> Result<(), LaunchError> + Send + Sync;

#[derive(Default)]
struct DummyState {
    next_id: u64,
    commands: Vec<DummyCommand>,
    programs_built: usize,
    buffers_created: usize,
    elapsed: HashMap<u64, Duration>,
}

impl DummyState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Backend that records every command instead of running it.
///
/// Launch durations come from a cost model, deterministic by default, which can be replaced
/// to steer the tuner or to make some candidates fail. Reads return zeroed bytes.
pub struct DummyBackend {
    properties: DeviceProperties,
    cost: Box<CostFn>,
    build: Box<BuildFn>,
    state: spin::Mutex<DummyState>,
}

impl core::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("properties", &self.properties)
            .finish()
    }
}

/// Default cost model: a fixed launch overhead plus a cost per work item and per work group.
pub fn default_cost(launch: &LaunchRecord) -> Result<Duration, LaunchError> {
    let groups = launch.global_size / launch.local_size.max(1);
    Ok(Duration::from_nanos(
        2_000 + launch.global_size as u64 + 16 * groups as u64,
    ))
}

impl DummyBackend {
    /// Create a dummy backend with the given properties.
    pub fn new(properties: DeviceProperties) -> Self {
        Self {
            properties,
            cost: Box::new(default_cost),
            build: Box::new(|_| Ok(())),
            state: spin::Mutex::new(DummyState::default()),
        }
    }

    /// A small GPU supporting every feature.
    pub fn gpu() -> Self {
        Self::new(DeviceProperties {
            name: "Dummy GPU".into(),
            vendor: "gridprim".into(),
            vendor_id: 0x1d1d,
            platform_name: "Dummy Platform".into(),
            driver_version: "1.0.0".into(),
            kind: DeviceKind::Gpu,
            compute_units: 4,
            max_work_group_size: 256,
            local_mem_size: 32 * 1024,
            warp_size_mem: 32,
            warp_size_schedule: 32,
            features: [
                DeviceFeature::ByteAddressableStore,
                DeviceFeature::Fp16,
                DeviceFeature::Fp64,
            ]
            .into_iter()
            .collect(),
        })
    }

    /// A CPU device supporting every feature.
    pub fn cpu() -> Self {
        Self::new(DeviceProperties {
            name: "Dummy CPU".into(),
            vendor: "gridprim".into(),
            vendor_id: 0x1d1e,
            platform_name: "Dummy Platform".into(),
            driver_version: "1.0.0".into(),
            kind: DeviceKind::Cpu,
            compute_units: 4,
            max_work_group_size: 1024,
            local_mem_size: 32 * 1024,
            warp_size_mem: 1,
            warp_size_schedule: 1,
            features: [
                DeviceFeature::ByteAddressableStore,
                DeviceFeature::Fp16,
                DeviceFeature::Fp64,
            ]
            .into_iter()
            .collect(),
        })
    }

    /// Replace the cost model.
    pub fn with_cost<F>(mut self, cost: F) -> Self
    where
        F: Fn(&LaunchRecord) -> Result<Duration, LaunchError> + Send + Sync + 'static,
    {
        self.cost = Box::new(cost);
        self
    }

    /// Replace the program build check.
    pub fn with_build<F>(mut self, build: F) -> Self
    where
        F: Fn(&ProgramSource) -> Result<(), LaunchError> + Send + Sync + 'static,
    {
        self.build = Box::new(build);
        self
    }

    /// Every command enqueued so far.
    pub fn commands(&self) -> Vec<DummyCommand> {
        self.state.lock().commands.clone()
    }

    /// Every kernel launch enqueued so far.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                DummyCommand::Launch(launch) => Some(launch.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of kernel launches enqueued so far.
    pub fn launch_count(&self) -> usize {
        self.launches().len()
    }

    /// Number of programs built so far.
    pub fn programs_built(&self) -> usize {
        self.state.lock().programs_built
    }

    /// Number of buffers created so far.
    pub fn buffers_created(&self) -> usize {
        self.state.lock().buffers_created
    }

    /// Forget every recorded command.
    pub fn clear_records(&self) {
        let mut state = self.state.lock();
        state.commands.clear();
        state.programs_built = 0;
        state.buffers_created = 0;
    }

    fn record(&self, command: DummyCommand, name: String, elapsed: Duration) -> DummyEvent {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.commands.push(command);
        state.elapsed.insert(id, elapsed);

        DummyEvent { id, command: name }
    }
}

impl ComputeBackend for DummyBackend {
    type Buffer = DummyBuffer;
    type Program = DummyProgram;
    type Event = DummyEvent;

    fn properties(&self) -> DeviceProperties {
        self.properties.clone()
    }

    fn build_program(&self, source: &ProgramSource) -> Result<Self::Program, LaunchError> {
        (self.build)(source)?;
        self.state.lock().programs_built += 1;

        Ok(DummyProgram {
            source: Arc::new(source.clone()),
        })
    }

    fn create_buffer(
        &self,
        size: usize,
        access: BufferAccess,
    ) -> Result<Self::Buffer, LaunchError> {
        if size == 0 {
            return Err(LaunchError::InvalidConfiguration {
                reason: "buffers can't be empty".into(),
            });
        }
        let mut state = self.state.lock();
        state.buffers_created += 1;

        Ok(DummyBuffer {
            id: state.next_id(),
            size,
            access,
        })
    }

    fn buffer_size(&self, buffer: &Self::Buffer) -> usize {
        buffer.size
    }

    fn buffer_access(&self, buffer: &Self::Buffer) -> BufferAccess {
        buffer.access
    }

    fn dispatch(
        &self,
        launch: KernelLaunch<Self>,
        wait_for: &[Self::Event],
    ) -> Result<Self::Event, LaunchError> {
        if launch.local_size == 0 || launch.local_size > self.properties.max_work_group_size {
            return Err(LaunchError::InvalidConfiguration {
                reason: format!(
                    "work group size {} exceeds the device limit {}",
                    launch.local_size, self.properties.max_work_group_size
                ),
            });
        }
        if launch.global_size == 0 || launch.global_size % launch.local_size != 0 {
            return Err(LaunchError::InvalidConfiguration {
                reason: format!(
                    "global size {} is not a multiple of the work group size {}",
                    launch.global_size, launch.local_size
                ),
            });
        }

        let source = launch.program.source();
        let record = LaunchRecord {
            program: source.name,
            kernel: launch.kernel,
            defines: source.defines.clone(),
            type_defines: source.type_defines.clone(),
            global_size: launch.global_size,
            local_size: launch.local_size,
            args: launch
                .args
                .iter()
                .map(|arg| match arg {
                    KernelArg::Buffer(buffer) => ArgRecord::Buffer(buffer.id),
                    KernelArg::U32(value) => ArgRecord::U32(*value),
                    KernelArg::Bytes(bytes) => ArgRecord::Bytes(bytes.clone()),
                })
                .collect(),
            wait_for: wait_for.iter().map(DummyEvent::id).collect(),
        };
        let elapsed = (self.cost)(&record)?;
        let name = launch.kernel.to_string();

        Ok(self.record(DummyCommand::Launch(record), name, elapsed))
    }

    fn copy(
        &self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: usize,
        _wait_for: &[Self::Event],
    ) -> Result<Self::Event, LaunchError> {
        if size > src.size || size > dst.size {
            return Err(LaunchError::InvalidConfiguration {
                reason: format!("copy of {size} bytes is out of buffer bounds"),
            });
        }
        let command = DummyCommand::Copy {
            src: src.id,
            dst: dst.id,
            size,
        };

        let elapsed = Duration::from_nanos(size as u64 / 8);
        Ok(self.record(command, "copy".into(), elapsed))
    }

    fn read(
        &self,
        src: &Self::Buffer,
        offset: usize,
        out: &mut [u8],
        _wait_for: &[Self::Event],
    ) -> Result<Self::Event, LaunchError> {
        if offset + out.len() > src.size {
            return Err(LaunchError::InvalidConfiguration {
                reason: format!("read of {} bytes is out of buffer bounds", out.len()),
            });
        }
        out.fill(0);
        let command = DummyCommand::Read {
            src: src.id,
            offset,
            len: out.len(),
        };

        Ok(self.record(command, "read".into(), Duration::ZERO))
    }

    fn write(
        &self,
        dst: &Self::Buffer,
        offset: usize,
        data: &[u8],
        _wait_for: &[Self::Event],
    ) -> Result<Self::Event, LaunchError> {
        if offset + data.len() > dst.size {
            return Err(LaunchError::InvalidConfiguration {
                reason: format!("write of {} bytes is out of buffer bounds", data.len()),
            });
        }
        let command = DummyCommand::Write {
            dst: dst.id,
            offset,
            data: data.to_vec(),
        };

        Ok(self.record(command, "write".into(), Duration::ZERO))
    }

    fn wait(&self, event: &Self::Event) -> Result<Duration, LaunchError> {
        self.state
            .lock()
            .elapsed
            .get(&event.id)
            .copied()
            .ok_or_else(|| LaunchError::Unknown {
                reason: format!("unknown event {}", event.id),
            })
    }
}
