use crate::measure::{per_element, problem_sizes, warm_then_time};
use crate::shared::{after, check_warp_sizes, ensure, kernel_u32, with_extensions, with_warp_sizes};
use core::fmt::Display;
use gridprim_runtime::algorithm::{Algorithm, Primitive};
use gridprim_runtime::backend::{
    BufferAccess, ComputeBackend, KernelArg, KernelLaunch, ProgramSource,
};
use gridprim_runtime::tune::{
    AutotuneKey, CandidateSpace, TuningParameters, powers_of_two, round_down_power2, round_up,
};
use gridprim_runtime::{ComputeDevice, DeviceKind, DeviceProperties, ElemType, PrimitiveError};
use serde::{Deserialize, Serialize};

pub(crate) const SCAN_ALGORITHM: &str = "scan";

const REDUCE_WORK_GROUP_SIZE: &str = "reduce_work_group_size";
const SCAN_WORK_GROUP_SIZE: &str = "scan_work_group_size";
const SCAN_WORK_SCALE: &str = "scan_work_scale";
const SCAN_BLOCKS: &str = "scan_blocks";

const MAX_WORK_SCALE: usize = 16;

/// Exclusive prefix sum over a device buffer, in place.
pub type Scan<B> = Algorithm<B, ScanPlan<B>>;

/// What a [scan](Scan) is built for: the element type, which must be integral.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanProblem {
    /// The element type.
    pub elem: ElemType,
}

impl Display for ScanProblem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.elem)
    }
}

impl AutotuneKey for ScanProblem {}

/// Launch geometry of a scan.
///
/// Work is split in up to `scan_blocks` blocks. Each block is reduced, the block sums are
/// scanned by a single work group, then every block is scanned starting from its offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanGeometry {
    /// Work group size of the block reduction.
    pub reduce_work_group_size: usize,
    /// Work group size of the final scan.
    pub scan_work_group_size: usize,
    /// Elements per work item in the final scan.
    pub scan_work_scale: usize,
    /// Maximum number of blocks.
    pub scan_blocks: usize,
}

struct ScanLimits {
    local_mem_elements: usize,
    work_group_size: usize,
    blocks: usize,
}

impl ScanLimits {
    fn new(device: &DeviceProperties, elem: &ElemType) -> Self {
        let local_mem_elements = device.local_mem_size / elem.storage_size().max(1);

        Self {
            local_mem_elements,
            work_group_size: device
                .max_work_group_size
                .min((local_mem_elements / 2).saturating_sub(1)),
            blocks: (2 * device.max_work_group_size).min(local_mem_elements),
        }
    }
}

impl ScanGeometry {
    /// Geometry used before any tuning: large work groups on GPUs, one work item per group
    /// and one block per compute unit on CPUs.
    pub fn default_for(device: &DeviceProperties, elem: &ElemType) -> Self {
        let limits = ScanLimits::new(device, elem);
        let (work_group_size, scale, blocks) = match device.kind {
            DeviceKind::Cpu => (1, 1, (device.compute_units as usize).max(2)),
            _ => (256, 8, 1024),
        };

        let work_group_size = round_down_power2(work_group_size.min(limits.work_group_size));
        let scale = round_down_power2(
            scale.min(limits.local_mem_elements / work_group_size.max(1)),
        );
        let blocks = round_down_power2(blocks.min(limits.blocks));

        Self {
            reduce_work_group_size: work_group_size,
            scan_work_group_size: work_group_size,
            scan_work_scale: scale,
            scan_blocks: blocks,
        }
    }

    /// Read the geometry from tuning parameters.
    pub fn from_parameters(parameters: &TuningParameters) -> Result<Self, PrimitiveError> {
        Ok(Self {
            reduce_work_group_size: parameters.get_usize(REDUCE_WORK_GROUP_SIZE)?,
            scan_work_group_size: parameters.get_usize(SCAN_WORK_GROUP_SIZE)?,
            scan_work_scale: parameters.get_usize(SCAN_WORK_SCALE)?,
            scan_blocks: parameters.get_usize(SCAN_BLOCKS)?,
        })
    }

    /// The geometry as tuning parameters.
    pub fn to_parameters(&self) -> TuningParameters {
        TuningParameters::new()
            .with(REDUCE_WORK_GROUP_SIZE, self.reduce_work_group_size)
            .with(SCAN_WORK_GROUP_SIZE, self.scan_work_group_size)
            .with(SCAN_WORK_SCALE, self.scan_work_scale)
            .with(SCAN_BLOCKS, self.scan_blocks)
    }

    /// Check the geometry fits the device.
    pub fn validate(
        &self,
        device: &DeviceProperties,
        elem: &ElemType,
    ) -> Result<(), PrimitiveError> {
        let limits = ScanLimits::new(device, elem);

        ensure(limits.work_group_size > 0, || {
            format!("Device capabilities are too limited to scan {elem}")
        })?;
        for (name, size) in [
            (REDUCE_WORK_GROUP_SIZE, self.reduce_work_group_size),
            (SCAN_WORK_GROUP_SIZE, self.scan_work_group_size),
        ] {
            ensure(size.is_power_of_two() && size <= limits.work_group_size, || {
                format!(
                    "{name} {size} must be a power of two of at most {}",
                    limits.work_group_size
                )
            })?;
        }
        ensure(
            self.scan_work_scale.is_power_of_two()
                && self.scan_work_scale * self.scan_work_group_size <= limits.local_mem_elements,
            || {
                format!(
                    "{SCAN_WORK_SCALE} {} doesn't fit in local memory",
                    self.scan_work_scale
                )
            },
        )?;
        ensure(
            self.scan_blocks.is_power_of_two()
                && self.scan_blocks >= 2
                && self.scan_blocks <= limits.blocks,
            || {
                format!(
                    "{SCAN_BLOCKS} {} must be a power of two between 2 and {}",
                    self.scan_blocks, limits.blocks
                )
            },
        )
    }

    /// Elements per block, a multiple of the tile size.
    pub fn block_size(&self, elements: usize) -> usize {
        let tile = self
            .reduce_work_group_size
            .max(self.scan_work_scale * self.scan_work_group_size);

        round_up(elements, tile * self.scan_blocks) / self.scan_blocks
    }
}

/// Where the scan starts counting from.
#[derive(Debug)]
pub enum ScanOffset<'a, B: ComputeBackend> {
    /// Start from zero.
    Zero,
    /// Start from a host value, given as the bytes of one element.
    Host(&'a [u8]),
    /// Start from an element of a device buffer.
    Device {
        /// Buffer holding the offset.
        buffer: &'a B::Buffer,
        /// Index of the offset element in the buffer.
        index: usize,
    },
}

/// Arguments of a [scan](Scan) execution.
#[derive(Debug)]
pub struct ScanArgs<'a, B: ComputeBackend> {
    /// The read-write buffer to scan in place.
    pub buffer: &'a B::Buffer,
    /// Number of elements to scan.
    pub elements: usize,
    /// The initial value.
    pub offset: ScanOffset<'a, B>,
}

impl<'a, B: ComputeBackend> ScanArgs<'a, B> {
    /// Scan the first `elements` elements of `buffer`, starting from zero.
    pub fn new(buffer: &'a B::Buffer, elements: usize) -> Self {
        Self {
            buffer,
            elements,
            offset: ScanOffset::Zero,
        }
    }

    /// Start from a host value.
    pub fn with_host_offset(mut self, offset: &'a [u8]) -> Self {
        self.offset = ScanOffset::Host(offset);
        self
    }

    /// Start from an element of a device buffer.
    pub fn with_device_offset(mut self, buffer: &'a B::Buffer, index: usize) -> Self {
        self.offset = ScanOffset::Device { buffer, index };
        self
    }
}

/// Execution plan of a [scan](Scan).
#[derive(Debug)]
pub struct ScanPlan<B: ComputeBackend> {
    program: B::Program,
    sums: B::Buffer,
    geometry: ScanGeometry,
    elem: ElemType,
}

impl<B: ComputeBackend> ScanPlan<B> {
    /// The launch geometry.
    pub fn geometry(&self) -> &ScanGeometry {
        &self.geometry
    }

    fn validate_args(&self, backend: &B, args: &ScanArgs<'_, B>) -> Result<(), PrimitiveError> {
        let elem_size = self.elem.storage_size();

        ensure(
            args.elements
                .checked_mul(elem_size)
                .is_some_and(|size| backend.buffer_size(args.buffer) >= size),
            || "Scan range is out of buffer bounds".into(),
        )?;
        ensure(
            backend.buffer_access(args.buffer) == BufferAccess::ReadWrite,
            || "Scan buffer is not read-write".into(),
        )?;
        match args.offset {
            ScanOffset::Zero => {}
            ScanOffset::Host(bytes) => ensure(bytes.len() == elem_size, || {
                format!(
                    "Scan offset has {} bytes, expected one {} of {elem_size} bytes",
                    bytes.len(),
                    self.elem
                )
            })?,
            ScanOffset::Device { buffer, index } => {
                kernel_u32("Scan offset index", index)?;
                ensure(
                    index
                        .checked_add(1)
                        .and_then(|count| count.checked_mul(elem_size))
                        .is_some_and(|end| backend.buffer_size(buffer) >= end),
                    || format!("Scan offset index {index} is out of buffer bounds"),
                )?;
                ensure(backend.buffer_access(buffer).is_readable(), || {
                    "Scan offset buffer is not readable".into()
                })?;
            }
        }
        kernel_u32("Scan element count", args.elements)?;
        ensure(args.elements != 0, || "Scan of zero elements".into())
    }
}

impl<B: ComputeBackend> Primitive<B> for ScanPlan<B> {
    type Problem = ScanProblem;
    type Args<'a> = ScanArgs<'a, B>;

    const NAME: &'static str = SCAN_ALGORITHM;
    const FORMAT_VERSION: u32 = 1;

    fn validate(device: &DeviceProperties, problem: &ScanProblem) -> Result<(), PrimitiveError> {
        let elem = &problem.elem;
        ensure(
            elem.is_integral() && elem.is_computable(device) && elem.is_storable(device),
            || format!("{elem} is not a supported integral type on {}", device.name),
        )?;
        ScanGeometry::default_for(device, elem).validate(device, elem)
    }

    fn canonical(problem: &ScanProblem) -> ScanProblem {
        ScanProblem::new(problem.elem.to_signed())
    }

    fn candidates(device: &DeviceProperties, problem: &ScanProblem) -> CandidateSpace {
        let limits = ScanLimits::new(device, &problem.elem);
        let base = ScanGeometry::default_for(device, &problem.elem).to_parameters();
        let stage = |name: &'static str, values: Vec<usize>| {
            values
                .into_iter()
                .map(|value| TuningParameters::new().with(name, value))
                .collect()
        };

        CandidateSpace::new(with_warp_sizes(base, device))
            .with_stage(stage(
                REDUCE_WORK_GROUP_SIZE,
                powers_of_two(1, limits.work_group_size).collect(),
            ))
            .with_stage(stage(
                SCAN_WORK_GROUP_SIZE,
                powers_of_two(1, limits.work_group_size).collect(),
            ))
            .with_stage(stage(
                SCAN_WORK_SCALE,
                powers_of_two(1, MAX_WORK_SCALE.min(limits.local_mem_elements)).collect(),
            ))
            .with_stage(stage(SCAN_BLOCKS, powers_of_two(2, limits.blocks).collect()))
    }

    fn build(
        device: &ComputeDevice<B>,
        problem: &ScanProblem,
        parameters: &TuningParameters,
    ) -> Result<Self, PrimitiveError> {
        let properties = device.properties();
        let elem = problem.elem;
        let geometry = ScanGeometry::from_parameters(parameters)?;
        check_warp_sizes(parameters, properties)?;
        geometry.validate(properties, &elem)?;

        let source = ProgramSource::new("scan")
            .define("WARP_SIZE_MEM", properties.warp_size_mem)
            .define("WARP_SIZE_SCHEDULE", properties.warp_size_schedule)
            .define("REDUCE_WORK_GROUP_SIZE", geometry.reduce_work_group_size)
            .define("SCAN_WORK_GROUP_SIZE", geometry.scan_work_group_size)
            .define("SCAN_WORK_SCALE", geometry.scan_work_scale)
            .define("SCAN_BLOCKS", geometry.scan_blocks)
            .define_type("SCAN_T", elem.name());
        let program = device
            .backend()
            .build_program(&with_extensions(source, &[elem]))?;
        let sums = device.backend().create_buffer(
            geometry.scan_blocks * elem.storage_size(),
            BufferAccess::ReadWrite,
        )?;

        Ok(Self {
            program,
            sums,
            geometry,
            elem,
        })
    }

    fn measure(&mut self, device: &ComputeDevice<B>) -> Result<f64, PrimitiveError> {
        let backend = device.backend();
        let mut score = 0.0;

        for elements in problem_sizes(self.elem.storage_size()) {
            let size = elements * self.elem.storage_size();
            let buffer = backend.create_buffer(size, BufferAccess::ReadWrite)?;
            let elapsed = warm_then_time(backend, || {
                self.enqueue(device, ScanArgs::new(&buffer, elements), &[])
            })?;
            score += per_element(elapsed, elements);
        }

        Ok(score)
    }

    fn enqueue(
        &mut self,
        device: &ComputeDevice<B>,
        args: ScanArgs<'_, B>,
        wait_for: &[B::Event],
    ) -> Result<Vec<B::Event>, PrimitiveError> {
        let backend = device.backend();
        self.validate_args(backend, &args)?;

        let geometry = &self.geometry;
        let block_size = geometry.block_size(args.elements);
        let all_blocks = args.elements.div_ceil(block_size);
        ensure(all_blocks > 0 && all_blocks <= geometry.scan_blocks, || {
            format!(
                "Scan of {} elements needs {all_blocks} blocks",
                args.elements
            )
        })?;

        let mut events = Vec::with_capacity(3);

        if all_blocks > 1 {
            let launch = KernelLaunch::new(
                self.program.clone(),
                "reduce",
                geometry.reduce_work_group_size * (all_blocks - 1),
                geometry.reduce_work_group_size,
                vec![
                    KernelArg::Buffer(self.sums.clone()),
                    KernelArg::Buffer(args.buffer.clone()),
                    KernelArg::U32(kernel_u32("Scan block size", block_size)?),
                ],
            );
            events.push(backend.dispatch(launch, wait_for)?);
        }

        let (kernel, offset_args) = match args.offset {
            ScanOffset::Zero => (
                "scanExclusiveSmall",
                vec![KernelArg::Bytes(vec![0; self.elem.storage_size()])],
            ),
            ScanOffset::Host(bytes) => (
                "scanExclusiveSmall",
                vec![KernelArg::Bytes(bytes.to_vec())],
            ),
            ScanOffset::Device { buffer, index } => (
                "scanExclusiveSmallOffset",
                vec![
                    KernelArg::Buffer(buffer.clone()),
                    KernelArg::U32(kernel_u32("Scan offset index", index)?),
                ],
            ),
        };
        let mut small_args = vec![KernelArg::Buffer(self.sums.clone())];
        small_args.extend(offset_args);
        let small = KernelLaunch::new(
            self.program.clone(),
            kernel,
            geometry.scan_blocks / 2,
            geometry.scan_blocks / 2,
            small_args,
        );
        let event = backend.dispatch(small, after(&events, wait_for))?;
        events.push(event);

        let scan = KernelLaunch::new(
            self.program.clone(),
            "scanExclusive",
            geometry.scan_work_group_size * all_blocks,
            geometry.scan_work_group_size,
            vec![
                KernelArg::Buffer(args.buffer.clone()),
                KernelArg::Buffer(self.sums.clone()),
                KernelArg::U32(kernel_u32("Scan block size", block_size)?),
                KernelArg::U32(kernel_u32("Scan element count", args.elements)?),
            ],
        );
        let event = backend.dispatch(scan, after(&events, wait_for))?;
        events.push(event);

        Ok(events)
    }

    fn details(&self) -> Vec<(&'static str, String)> {
        vec![
            ("elem", self.elem.name()),
            (REDUCE_WORK_GROUP_SIZE, self.geometry.reduce_work_group_size.to_string()),
            (SCAN_WORK_GROUP_SIZE, self.geometry.scan_work_group_size.to_string()),
            (SCAN_WORK_SCALE, self.geometry.scan_work_scale.to_string()),
            (SCAN_BLOCKS, self.geometry.scan_blocks.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridprim_runtime::BaseType;
    use gridprim_runtime::testing::DummyBackend;
    use pretty_assertions::assert_eq;

    type Plan = ScanPlan<DummyBackend>;

    fn elem(base: BaseType, length: u32) -> ElemType {
        ElemType::new(base, length).unwrap()
    }

    #[test]
    fn default_geometry_on_gpu() {
        let props = DummyBackend::gpu().properties();
        let geometry = ScanGeometry::default_for(&props, &elem(BaseType::UInt, 1));

        assert_eq!(
            geometry,
            ScanGeometry {
                reduce_work_group_size: 256,
                scan_work_group_size: 256,
                scan_work_scale: 8,
                scan_blocks: 512,
            }
        );
        assert!(geometry.validate(&props, &elem(BaseType::UInt, 1)).is_ok());
    }

    #[test]
    fn default_geometry_shrinks_with_local_memory() {
        let props = DummyBackend::gpu().properties();
        let ulong16 = elem(BaseType::ULong, 16);
        let geometry = ScanGeometry::default_for(&props, &ulong16);

        assert_eq!(geometry.scan_work_group_size, 64);
        assert_eq!(geometry.scan_work_scale, 4);
        assert_eq!(geometry.scan_blocks, 256);
        assert!(geometry.validate(&props, &ulong16).is_ok());
    }

    #[test]
    fn default_geometry_on_cpu() {
        let props = DummyBackend::cpu().properties();
        let geometry = ScanGeometry::default_for(&props, &elem(BaseType::Int, 1));

        assert_eq!(
            geometry,
            ScanGeometry {
                reduce_work_group_size: 1,
                scan_work_group_size: 1,
                scan_work_scale: 1,
                scan_blocks: 4,
            }
        );
    }

    #[test]
    fn block_size_covers_every_element() {
        let props = DummyBackend::gpu().properties();
        let geometry = ScanGeometry::default_for(&props, &elem(BaseType::UInt, 1));

        for elements in [1, 2047, 2048, 2049, 1 << 20, (1 << 20) + 3] {
            let block_size = geometry.block_size(elements);
            let blocks = elements.div_ceil(block_size);

            assert_eq!(block_size % 2048, 0);
            assert!(blocks <= geometry.scan_blocks);
            assert!(blocks * block_size >= elements);
        }
    }

    #[test]
    fn floats_are_rejected() {
        let props = DummyBackend::gpu().properties();
        let problem = ScanProblem::new(elem(BaseType::Float, 1));

        let err = Plan::validate(&props, &problem).unwrap_err();

        assert!(err.is_internal());
    }

    #[test]
    fn unsigned_and_signed_share_a_key() {
        let uint = ScanProblem::new(elem(BaseType::UInt, 2));
        let int = ScanProblem::new(elem(BaseType::Int, 2));

        assert_eq!(Plan::canonical(&uint), int);
    }

    #[test]
    fn candidates_start_from_the_default_geometry() {
        let props = DummyBackend::gpu().properties();
        let problem = ScanProblem::new(elem(BaseType::Int, 1));
        let space = Plan::candidates(&props, &problem);
        let base = ScanGeometry::from_parameters(space.base()).unwrap();

        assert_eq!(base, ScanGeometry::default_for(&props, &problem.elem));
        assert_eq!(space.stages().len(), 4);
        assert_eq!(space.stages()[0].len(), 9);
        assert_eq!(space.stages()[2].len(), 5);
        assert_eq!(space.stages()[3].len(), 9);
    }
}
