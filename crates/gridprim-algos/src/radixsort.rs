use crate::measure::{per_element, problem_sizes, warm_then_time};
use crate::shared::{after, check_warp_sizes, ensure, kernel_u32, with_extensions, with_warp_sizes};
use core::fmt::Display;
use gridprim_runtime::algorithm::{Algorithm, Primitive};
use gridprim_runtime::backend::{
    BufferAccess, ComputeBackend, KernelArg, KernelLaunch, ProgramSource,
};
use gridprim_runtime::tune::{
    AutotuneKey, CandidateSpace, TuningParameters, powers_of_two, round_down, round_down_power2,
    round_up,
};
use gridprim_runtime::{
    BaseType, ComputeDevice, DeviceKind, DeviceProperties, ElemType, PrimitiveError,
};
use serde::{Deserialize, Serialize};

pub(crate) const RADIXSORT_ALGORITHM: &str = "radixsort";

const RADIX_BITS: &str = "radix_bits";
const REDUCE_WORK_GROUP_SIZE: &str = "reduce_work_group_size";
const SCAN_WORK_GROUP_SIZE: &str = "scan_work_group_size";
const SCATTER_WORK_GROUP_SIZE: &str = "scatter_work_group_size";
const SCATTER_WORK_SCALE: &str = "scatter_work_scale";
const SCAN_BLOCKS: &str = "scan_blocks";

const DEFAULT_RADIX_BITS: usize = 4;
const DEFAULT_SCATTER_WORK_SCALE: usize = 7;
const MAX_SCATTER_WORK_SCALE: usize = 8;

/// Stable sort of unsigned integer keys, optionally carrying values along.
pub type Radixsort<B> = Algorithm<B, RadixsortPlan<B>>;

/// What a [radix sort](Radixsort) is built for.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RadixsortProblem {
    /// Key type, an unsigned integer scalar.
    pub key: ElemType,
    /// Value type, [void](ElemType::void) to sort keys only.
    pub value: ElemType,
}

impl RadixsortProblem {
    /// Sort keys without values.
    pub fn keys_only(key: ElemType) -> Self {
        Self::new(key, ElemType::void())
    }
}

impl Display for RadixsortProblem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.key, self.value)
    }
}

impl AutotuneKey for RadixsortProblem {}

/// The unsigned integer type occupying as much device memory as `value`.
///
/// Values are only moved around, so every value type of one storage size sorts alike.
fn storage_equivalent(value: &ElemType) -> ElemType {
    if value.is_void() {
        return ElemType::void();
    }
    let size = value.storage_size();

    [BaseType::ULong, BaseType::UInt, BaseType::UShort, BaseType::UChar]
        .into_iter()
        .filter(|base| size % base.size() == 0)
        .find_map(|base| ElemType::new(base, (size / base.size()) as u32).ok())
        .unwrap_or(*value)
}

/// Launch geometry of a radix sort.
///
/// Each pass sorts on `radix_bits` bits: per-block digit histograms are reduced, scanned by a
/// single work group, then every block scatters its elements. Scatter work groups are made of
/// slices of `scatter_slice` work items, each handling one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RadixsortGeometry {
    /// Bits sorted per pass.
    pub radix_bits: usize,
    /// Work group size of the histogram reduction.
    pub reduce_work_group_size: usize,
    /// Work group size of the histogram scan.
    pub scan_work_group_size: usize,
    /// Work group size of the scatter.
    pub scatter_work_group_size: usize,
    /// Elements per work item in the scatter.
    pub scatter_work_scale: usize,
    /// Work items handling one block in the scatter.
    pub scatter_slice: usize,
    /// Maximum number of blocks.
    pub scan_blocks: usize,
}

impl RadixsortGeometry {
    /// Geometry used before any tuning.
    pub fn default_for(device: &DeviceProperties) -> Result<Self, PrimitiveError> {
        let units = (device.compute_units as usize).max(1);
        let (work_group_size, scatter_work_group_size, blocks) = match device.kind {
            DeviceKind::Cpu => (1, 1, 4 * units),
            _ => (128, 64, 128 * units),
        };
        let radix = 1 << DEFAULT_RADIX_BITS;
        let max = device.max_work_group_size;
        ensure(max >= radix, || {
            "Device capabilities are too limited for radixsort".into()
        })?;

        let work_group_size = round_down_power2(work_group_size.min(max).max(radix));
        let slice = device.warp_size_mem.max(radix);
        let scatter_work_group_size = round_down(scatter_work_group_size.max(slice), slice);

        let parameters = TuningParameters::new()
            .with(RADIX_BITS, DEFAULT_RADIX_BITS)
            .with(REDUCE_WORK_GROUP_SIZE, work_group_size)
            .with(SCAN_WORK_GROUP_SIZE, work_group_size)
            .with(SCATTER_WORK_GROUP_SIZE, scatter_work_group_size)
            .with(SCATTER_WORK_SCALE, DEFAULT_SCATTER_WORK_SCALE)
            .with(SCAN_BLOCKS, blocks);

        Self::from_parameters(device, &parameters)
    }

    /// Read the geometry from tuning parameters.
    ///
    /// Work group sizes are taken as is and must fit the device. The number of blocks is an
    /// upper bound, lowered to what fits in local memory and rounded to a multiple of the
    /// blocks handled by one scan work item and by one scatter work group.
    pub fn from_parameters(
        device: &DeviceProperties,
        parameters: &TuningParameters,
    ) -> Result<Self, PrimitiveError> {
        let radix_bits = parameters.get_usize(RADIX_BITS)?;
        ensure((1..=8).contains(&radix_bits), || {
            format!("{RADIX_BITS} {radix_bits} must be between 1 and 8")
        })?;
        let radix = 1usize << radix_bits;
        let max = device.max_work_group_size;
        ensure(max >= radix, || {
            "Device capabilities are too limited for radixsort".into()
        })?;

        let reduce_work_group_size = parameters.get_usize(REDUCE_WORK_GROUP_SIZE)?;
        let scan_work_group_size = parameters.get_usize(SCAN_WORK_GROUP_SIZE)?;
        for (name, size) in [
            (REDUCE_WORK_GROUP_SIZE, reduce_work_group_size),
            (SCAN_WORK_GROUP_SIZE, scan_work_group_size),
        ] {
            ensure(
                size.is_power_of_two() && size >= radix && size <= max,
                || format!("{name} {size} must be a power of two between {radix} and {max}"),
            )?;
        }

        let scatter_slice = device.warp_size_mem.max(radix);
        let scatter_work_group_size = parameters.get_usize(SCATTER_WORK_GROUP_SIZE)?;
        ensure(
            scatter_work_group_size > 0
                && scatter_work_group_size % scatter_slice == 0
                && (scatter_work_group_size / scatter_slice).is_power_of_two()
                && scatter_work_group_size <= max,
            || "Device capabilities are too limited for radixsort".into(),
        )?;
        let scatter_work_scale = parameters.get_usize(SCATTER_WORK_SCALE)?;
        ensure(scatter_work_scale > 0, || {
            format!("{SCATTER_WORK_SCALE} must not be zero")
        })?;

        let scan_granularity = (scan_work_group_size / radix).max(1);
        let granularity = scan_granularity.max(scatter_work_group_size / scatter_slice);
        let mut scan_blocks = round_up(parameters.get_usize(SCAN_BLOCKS)?, scan_granularity);
        scan_blocks = scan_blocks.min((device.local_mem_size / radix).saturating_sub(1) / 4);
        scan_blocks = round_down(scan_blocks, granularity);
        ensure(scan_blocks > 0, || {
            "Device capabilities are too limited for radixsort".into()
        })?;

        Ok(Self {
            radix_bits,
            reduce_work_group_size,
            scan_work_group_size,
            scatter_work_group_size,
            scatter_work_scale,
            scatter_slice,
            scan_blocks,
        })
    }

    /// The geometry as tuning parameters.
    pub fn to_parameters(&self) -> TuningParameters {
        TuningParameters::new()
            .with(RADIX_BITS, self.radix_bits)
            .with(REDUCE_WORK_GROUP_SIZE, self.reduce_work_group_size)
            .with(SCAN_WORK_GROUP_SIZE, self.scan_work_group_size)
            .with(SCATTER_WORK_GROUP_SIZE, self.scatter_work_group_size)
            .with(SCATTER_WORK_SCALE, self.scatter_work_scale)
            .with(SCAN_BLOCKS, self.scan_blocks)
    }

    /// Number of digits per pass.
    pub fn radix(&self) -> usize {
        1 << self.radix_bits
    }

    fn slices_per_work_group(&self) -> usize {
        self.scatter_work_group_size / self.scatter_slice
    }

    /// Elements per block, a multiple of the tile size.
    pub fn block_size(&self, elements: usize) -> usize {
        let tile = self
            .reduce_work_group_size
            .max(self.scatter_work_scale * self.scatter_work_group_size);

        elements.div_ceil(tile * self.scan_blocks) * tile
    }

    /// Number of blocks covering `elements` elements, a multiple of the slices per scatter
    /// work group.
    pub fn blocks(&self, elements: usize, block_size: usize) -> usize {
        round_up(elements.div_ceil(block_size), self.slices_per_work_group())
    }

    /// Size in bytes of the digit histogram of every block.
    pub fn histogram_size(&self) -> usize {
        self.scan_blocks * self.radix() * 4
    }
}

/// Arguments of a [radix sort](Radixsort) execution.
#[derive(Debug)]
pub struct RadixsortArgs<'a, B: ComputeBackend> {
    /// The read-write key buffer, sorted in place.
    pub keys: &'a B::Buffer,
    /// The read-write value buffer, required unless the value type is void.
    pub values: Option<&'a B::Buffer>,
    /// Number of elements to sort.
    pub elements: usize,
    /// Only the lowest `max_bits` bits of the keys are sorted on, zero meaning all of them.
    pub max_bits: u32,
}

impl<'a, B: ComputeBackend> RadixsortArgs<'a, B> {
    /// Sort the first `elements` keys on all their bits.
    pub fn new(keys: &'a B::Buffer, elements: usize) -> Self {
        Self {
            keys,
            values: None,
            elements,
            max_bits: 0,
        }
    }

    /// Carry values along.
    pub fn with_values(mut self, values: &'a B::Buffer) -> Self {
        self.values = Some(values);
        self
    }

    /// Only sort on the lowest `max_bits` bits.
    pub fn with_max_bits(mut self, max_bits: u32) -> Self {
        self.max_bits = max_bits;
        self
    }
}

/// Execution plan of a [radix sort](Radixsort).
#[derive(Debug)]
pub struct RadixsortPlan<B: ComputeBackend> {
    program: B::Program,
    histogram: B::Buffer,
    geometry: RadixsortGeometry,
    key_size: usize,
    value_size: usize,
    temp_keys: Option<B::Buffer>,
    temp_values: Option<B::Buffer>,
}

impl<B: ComputeBackend> RadixsortPlan<B> {
    /// The launch geometry.
    pub fn geometry(&self) -> &RadixsortGeometry {
        &self.geometry
    }

    /// Buffers to ping-pong with, used when they are large enough instead of allocating
    /// temporaries on each execution.
    pub fn set_temporary_buffers(&mut self, keys: Option<B::Buffer>, values: Option<B::Buffer>) {
        self.temp_keys = keys;
        self.temp_values = values;
    }

    fn temporary(
        backend: &B,
        provided: &Option<B::Buffer>,
        size: usize,
    ) -> Result<B::Buffer, PrimitiveError> {
        match provided {
            Some(buffer) if backend.buffer_size(buffer) >= size => Ok(buffer.clone()),
            _ => Ok(backend.create_buffer(size, BufferAccess::ReadWrite)?),
        }
    }

    fn validate_args(
        &self,
        backend: &B,
        args: &RadixsortArgs<'_, B>,
    ) -> Result<u32, PrimitiveError> {
        let key_bits = 8 * self.key_size as u32;

        ensure(
            args.elements
                .checked_mul(self.key_size)
                .is_some_and(|size| backend.buffer_size(args.keys) >= size),
            || "Radixsort range is out of buffer bounds for keys".into(),
        )?;
        ensure(
            backend.buffer_access(args.keys) == BufferAccess::ReadWrite,
            || "Radixsort keys are not read-write".into(),
        )?;
        match (self.value_size, args.values) {
            (0, None) => {}
            (0, Some(_)) => {
                return Err(PrimitiveError::internal(
                    "Radixsort values were given but the value type is void",
                ));
            }
            (_, None) => return Err(PrimitiveError::internal("Radixsort values are missing")),
            (value_size, Some(values)) => {
                ensure(
                    args.elements
                        .checked_mul(value_size)
                        .is_some_and(|size| backend.buffer_size(values) >= size),
                    || "Radixsort range is out of buffer bounds for values".into(),
                )?;
                ensure(
                    backend.buffer_access(values) == BufferAccess::ReadWrite,
                    || "Radixsort values are not read-write".into(),
                )?;
            }
        }
        ensure(args.elements != 0, || "Radixsort of zero elements".into())?;
        kernel_u32("Radixsort element count", args.elements)?;

        match args.max_bits {
            0 => Ok(key_bits),
            bits if bits > key_bits => Err(PrimitiveError::internal(format!(
                "max_bits {bits} is too large for {key_bits}-bit keys"
            ))),
            bits => Ok(bits),
        }
    }
}

impl<B: ComputeBackend> Primitive<B> for RadixsortPlan<B> {
    type Problem = RadixsortProblem;
    type Args<'a> = RadixsortArgs<'a, B>;

    const NAME: &'static str = RADIXSORT_ALGORITHM;
    const FORMAT_VERSION: u32 = 1;

    fn validate(
        device: &DeviceProperties,
        problem: &RadixsortProblem,
    ) -> Result<(), PrimitiveError> {
        let key = &problem.key;
        let value = &problem.value;

        ensure(
            key.is_integral()
                && !key.is_signed()
                && key.length() == 1
                && key.is_computable(device)
                && key.is_storable(device),
            || format!("{key} is not a valid radixsort key type on {}", device.name),
        )?;
        ensure(value.is_void() || value.is_storable(device), || {
            format!(
                "{value} is not a valid radixsort value type on {}",
                device.name
            )
        })?;
        RadixsortGeometry::default_for(device).map(|_| ())
    }

    fn canonical(problem: &RadixsortProblem) -> RadixsortProblem {
        RadixsortProblem::new(problem.key, storage_equivalent(&problem.value))
    }

    fn candidates(device: &DeviceProperties, _problem: &RadixsortProblem) -> CandidateSpace {
        let Ok(default) = RadixsortGeometry::default_for(device) else {
            return CandidateSpace::default();
        };
        let radix = default.radix();
        let max = device.max_work_group_size;
        let units = (device.compute_units as usize).max(1);
        let stage = |name: &'static str, values: Vec<usize>| {
            values
                .into_iter()
                .map(|value| TuningParameters::new().with(name, value))
                .collect()
        };

        CandidateSpace::new(with_warp_sizes(default.to_parameters(), device))
            .with_stage(stage(
                REDUCE_WORK_GROUP_SIZE,
                powers_of_two(radix, max).collect(),
            ))
            .with_stage(stage(SCAN_WORK_GROUP_SIZE, powers_of_two(radix, max).collect()))
            .with_stage(stage(
                SCATTER_WORK_GROUP_SIZE,
                powers_of_two(1, max / default.scatter_slice)
                    .map(|slices| slices * default.scatter_slice)
                    .collect(),
            ))
            .with_stage(stage(
                SCATTER_WORK_SCALE,
                (1..=MAX_SCATTER_WORK_SCALE).collect(),
            ))
            .with_stage(stage(SCAN_BLOCKS, (2..=7).map(|shift| units << shift).collect()))
    }

    fn build(
        device: &ComputeDevice<B>,
        problem: &RadixsortProblem,
        parameters: &TuningParameters,
    ) -> Result<Self, PrimitiveError> {
        let properties = device.properties();
        check_warp_sizes(parameters, properties)?;
        let geometry = RadixsortGeometry::from_parameters(properties, parameters)?;
        let backend = device.backend();

        let mut source = ProgramSource::new("radixsort")
            .define("WARP_SIZE_MEM", properties.warp_size_mem)
            .define("WARP_SIZE_SCHEDULE", properties.warp_size_schedule)
            .define("REDUCE_WORK_GROUP_SIZE", geometry.reduce_work_group_size)
            .define("SCAN_WORK_GROUP_SIZE", geometry.scan_work_group_size)
            .define("SCATTER_WORK_GROUP_SIZE", geometry.scatter_work_group_size)
            .define("SCATTER_WORK_SCALE", geometry.scatter_work_scale)
            .define("SCATTER_SLICE", geometry.scatter_slice)
            .define("SCAN_BLOCKS", geometry.scan_blocks)
            .define("RADIX_BITS", geometry.radix_bits)
            .define_type("KEY_T", problem.key.name());
        if !problem.value.is_void() {
            source = source.define_type("VALUE_T", problem.value.name());
        }
        let types = [problem.key, problem.value];
        let program = backend.build_program(&with_extensions(source, &types))?;
        let histogram = backend.create_buffer(geometry.histogram_size(), BufferAccess::ReadWrite)?;

        Ok(Self {
            program,
            histogram,
            geometry,
            key_size: problem.key.storage_size(),
            value_size: match problem.value.is_void() {
                true => 0,
                false => problem.value.storage_size(),
            },
            temp_keys: None,
            temp_values: None,
        })
    }

    fn measure(&mut self, device: &ComputeDevice<B>) -> Result<f64, PrimitiveError> {
        let backend = device.backend();
        let mut score = 0.0;

        for elements in problem_sizes(self.key_size + self.value_size) {
            let keys = backend.create_buffer(elements * self.key_size, BufferAccess::ReadWrite)?;
            let values = match self.value_size {
                0 => None,
                size => {
                    let buffer = backend.create_buffer(elements * size, BufferAccess::ReadWrite)?;
                    Some(buffer)
                }
            };
            let elapsed = warm_then_time(backend, || {
                let mut args = RadixsortArgs::new(&keys, elements);
                args.values = values.as_ref();
                self.enqueue(device, args, &[])
            })?;
            score += per_element(elapsed, elements);
        }

        Ok(score)
    }

    fn enqueue(
        &mut self,
        device: &ComputeDevice<B>,
        args: RadixsortArgs<'_, B>,
        wait_for: &[B::Event],
    ) -> Result<Vec<B::Event>, PrimitiveError> {
        let backend = device.backend();
        let max_bits = self.validate_args(backend, &args)? as usize;
        let elements = args.elements;
        let geometry = self.geometry;

        let temp_keys = Self::temporary(backend, &self.temp_keys, elements * self.key_size)?;
        let temp_values = match args.values {
            Some(_) => Some(Self::temporary(
                backend,
                &self.temp_values,
                elements * self.value_size,
            )?),
            None => None,
        };

        let block_size = geometry.block_size(elements);
        let blocks = geometry.blocks(elements, block_size);
        ensure(blocks <= geometry.scan_blocks, || {
            format!("Radixsort of {elements} elements needs {blocks} blocks")
        })?;
        let elements_arg = kernel_u32("Radixsort element count", elements)?;
        let block_size_arg = kernel_u32("Radixsort block size", block_size)?;
        let blocks_arg = kernel_u32("Radixsort block count", blocks)?;

        let mut current = (args.keys, args.values);
        let mut next = (&temp_keys, temp_values.as_ref());
        let mut events = Vec::new();

        for first_bit in (0..max_bits).step_by(geometry.radix_bits) {
            let first_bit = kernel_u32("Radixsort first bit", first_bit)?;
            let reduce = KernelLaunch::new(
                self.program.clone(),
                "radixsortReduce",
                geometry.reduce_work_group_size * blocks,
                geometry.reduce_work_group_size,
                vec![
                    KernelArg::Buffer(self.histogram.clone()),
                    KernelArg::Buffer(current.0.clone()),
                    KernelArg::U32(block_size_arg),
                    KernelArg::U32(elements_arg),
                    KernelArg::U32(first_bit),
                ],
            );
            let event = backend.dispatch(reduce, after(&events, wait_for))?;
            events.push(event);

            let scan = KernelLaunch::new(
                self.program.clone(),
                "radixsortScan",
                geometry.scan_work_group_size,
                geometry.scan_work_group_size,
                vec![
                    KernelArg::Buffer(self.histogram.clone()),
                    KernelArg::U32(blocks_arg),
                ],
            );
            let event = backend.dispatch(scan, after(&events, wait_for))?;
            events.push(event);

            let mut scatter_args = vec![
                KernelArg::Buffer(next.0.clone()),
                KernelArg::Buffer(current.0.clone()),
                KernelArg::Buffer(self.histogram.clone()),
                KernelArg::U32(block_size_arg),
                KernelArg::U32(elements_arg),
                KernelArg::U32(first_bit),
            ];
            if let (Some(out_values), Some(in_values)) = (next.1, current.1) {
                scatter_args.push(KernelArg::Buffer(out_values.clone()));
                scatter_args.push(KernelArg::Buffer(in_values.clone()));
            }
            let work_groups = blocks / geometry.slices_per_work_group();
            let scatter = KernelLaunch::new(
                self.program.clone(),
                "radixsortScatter",
                geometry.scatter_work_group_size * work_groups,
                geometry.scatter_work_group_size,
                scatter_args,
            );
            let event = backend.dispatch(scatter, after(&events, wait_for))?;
            events.push(event);

            core::mem::swap(&mut current, &mut next);
        }

        // An odd number of passes leaves the result in the temporaries.
        if !core::ptr::eq(current.0, args.keys) {
            let event = backend.copy(
                current.0,
                next.0,
                elements * self.key_size,
                after(&events, wait_for),
            )?;
            events.push(event);

            if let (Some(from), Some(to)) = (current.1, next.1) {
                let event = backend.copy(
                    from,
                    to,
                    elements * self.value_size,
                    after(&events, wait_for),
                )?;
                events.push(event);
            }
        }

        Ok(events)
    }

    fn details(&self) -> Vec<(&'static str, String)> {
        let geometry = &self.geometry;
        vec![
            (RADIX_BITS, geometry.radix_bits.to_string()),
            (REDUCE_WORK_GROUP_SIZE, geometry.reduce_work_group_size.to_string()),
            (SCAN_WORK_GROUP_SIZE, geometry.scan_work_group_size.to_string()),
            (SCATTER_WORK_GROUP_SIZE, geometry.scatter_work_group_size.to_string()),
            (SCATTER_WORK_SCALE, geometry.scatter_work_scale.to_string()),
            ("scatter_slice", geometry.scatter_slice.to_string()),
            (SCAN_BLOCKS, geometry.scan_blocks.to_string()),
        ]
    }
}
