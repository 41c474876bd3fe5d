use crate::measure::{per_element, problem_sizes, warm_then_time};
use crate::shared::{ensure, kernel_u32, with_extensions};
use core::fmt::Display;
use gridprim_runtime::algorithm::{Algorithm, Primitive};
use gridprim_runtime::backend::{
    BufferAccess, ComputeBackend, KernelArg, KernelLaunch, ProgramSource,
};
use gridprim_runtime::tune::{
    AutotuneKey, CandidateSpace, TuningParameters, powers_of_two, round_down_power2, round_up,
};
use gridprim_runtime::{ComputeDevice, DeviceProperties, ElemType, PrimitiveError};
use serde::{Deserialize, Serialize};

pub(crate) const REDUCE_ALGORITHM: &str = "reduce";

const REDUCE_WORK_GROUP_SIZE: &str = "reduce_work_group_size";
const REDUCE_BLOCKS: &str = "reduce_blocks";

/// Sum of a range of a device buffer.
pub type Reduce<B> = Algorithm<B, ReducePlan<B>>;

/// What a [reduction](Reduce) is built for: the element type.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReduceProblem {
    /// The element type.
    pub elem: ElemType,
}

impl Display for ReduceProblem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.elem)
    }
}

impl AutotuneKey for ReduceProblem {}

fn max_work_group_size(device: &DeviceProperties, elem: &ElemType) -> usize {
    let local_mem_elements = device.local_mem_size / elem.storage_size().max(1);
    device.max_work_group_size.min(local_mem_elements)
}

/// Where the sum is written.
#[derive(Debug)]
pub enum ReduceOutput<'a, B: ComputeBackend> {
    /// An element of a device buffer.
    Buffer {
        /// The writable output buffer.
        buffer: &'a B::Buffer,
        /// Index of the element receiving the sum.
        position: usize,
    },
    /// Host memory, one element. The execution blocks until the sum is read back.
    Host(&'a mut [u8]),
}

/// Arguments of a [reduction](Reduce) execution.
#[derive(Debug)]
pub struct ReduceArgs<'a, B: ComputeBackend> {
    /// The readable input buffer.
    pub input: &'a B::Buffer,
    /// Index of the first element to sum.
    pub first: usize,
    /// Number of elements to sum.
    pub elements: usize,
    /// Where the sum goes.
    pub output: ReduceOutput<'a, B>,
}

impl<'a, B: ComputeBackend> ReduceArgs<'a, B> {
    /// Sum `input[first..first + elements]` into `output[position]`.
    pub fn to_buffer(
        input: &'a B::Buffer,
        first: usize,
        elements: usize,
        output: &'a B::Buffer,
        position: usize,
    ) -> Self {
        Self {
            input,
            first,
            elements,
            output: ReduceOutput::Buffer {
                buffer: output,
                position,
            },
        }
    }

    /// Sum `input[first..first + elements]` into host memory.
    pub fn to_host(input: &'a B::Buffer, first: usize, elements: usize, out: &'a mut [u8]) -> Self {
        Self {
            input,
            first,
            elements,
            output: ReduceOutput::Host(out),
        }
    }
}

/// Execution plan of a [reduction](Reduce).
#[derive(Debug)]
pub struct ReducePlan<B: ComputeBackend> {
    program: B::Program,
    // One partial sum per block, plus the final sum read back for host outputs.
    sums: B::Buffer,
    counter: B::Buffer,
    work_group_size: usize,
    blocks: usize,
    elem: ElemType,
}

impl<B: ComputeBackend> ReducePlan<B> {
    /// Work group size of the reduction.
    pub fn work_group_size(&self) -> usize {
        self.work_group_size
    }

    /// Number of work groups.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Elements per block, a multiple of the work group size.
    pub fn block_size(&self, elements: usize) -> usize {
        round_up(elements, self.work_group_size * self.blocks) / self.blocks
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        backend: &B,
        input: &B::Buffer,
        first: usize,
        elements: usize,
        output: &B::Buffer,
        position: usize,
        wait_for: &[B::Event],
    ) -> Result<B::Event, PrimitiveError> {
        let launch = KernelLaunch::new(
            self.program.clone(),
            "reduce",
            self.work_group_size * self.blocks,
            self.work_group_size,
            vec![
                KernelArg::Buffer(self.counter.clone()),
                KernelArg::Buffer(output.clone()),
                KernelArg::U32(kernel_u32("Reduce output position", position)?),
                KernelArg::Buffer(input.clone()),
                KernelArg::U32(kernel_u32("Reduce first element", first)?),
                KernelArg::U32(kernel_u32("Reduce element count", elements)?),
                KernelArg::Buffer(self.sums.clone()),
                KernelArg::U32(kernel_u32("Reduce block size", self.block_size(elements))?),
            ],
        );

        Ok(backend.dispatch(launch, wait_for)?)
    }

    fn validate_input(
        &self,
        backend: &B,
        input: &B::Buffer,
        first: usize,
        elements: usize,
    ) -> Result<(), PrimitiveError> {
        let elem_size = self.elem.storage_size();

        ensure(
            first
                .checked_add(elements)
                .is_some_and(|end| backend.buffer_size(input) / elem_size >= end),
            || "Reduce range is out of input buffer bounds".into(),
        )?;
        kernel_u32("Reduce range end", first + elements)?;
        ensure(backend.buffer_access(input).is_readable(), || {
            "Reduce input buffer is not readable".into()
        })?;
        ensure(elements != 0, || "Reduce of zero elements".into())
    }
}

impl<B: ComputeBackend> Primitive<B> for ReducePlan<B> {
    type Problem = ReduceProblem;
    type Args<'a> = ReduceArgs<'a, B>;

    const NAME: &'static str = REDUCE_ALGORITHM;
    const FORMAT_VERSION: u32 = 1;

    fn validate(device: &DeviceProperties, problem: &ReduceProblem) -> Result<(), PrimitiveError> {
        let elem = &problem.elem;
        ensure(elem.is_computable(device) && elem.is_storable(device), || {
            format!("{elem} is not a supported type on {}", device.name)
        })?;
        ensure(max_work_group_size(device, elem) > 0, || {
            format!("Device capabilities are too limited to reduce {elem}")
        })
    }

    fn canonical(problem: &ReduceProblem) -> ReduceProblem {
        ReduceProblem::new(problem.elem.to_signed())
    }

    /// Work group sizes first, with 16 blocks per compute unit, then the number of blocks in
    /// steps of 4 per compute unit.
    fn candidates(device: &DeviceProperties, problem: &ReduceProblem) -> CandidateSpace {
        let max_work_group_size = max_work_group_size(device, &problem.elem);
        let units = (device.compute_units as usize).max(1);
        let work_group_size = round_down_power2(max_work_group_size);
        let base = TuningParameters::new()
            .with(REDUCE_WORK_GROUP_SIZE, work_group_size)
            .with(REDUCE_BLOCKS, 16 * units);

        CandidateSpace::new(base)
            .with_stage(
                powers_of_two(1, max_work_group_size)
                    .map(|size| TuningParameters::new().with(REDUCE_WORK_GROUP_SIZE, size))
                    .collect(),
            )
            .with_stage(
                (1..=16)
                    .map(|step| TuningParameters::new().with(REDUCE_BLOCKS, 4 * units * step))
                    .collect(),
            )
    }

    fn build(
        device: &ComputeDevice<B>,
        problem: &ReduceProblem,
        parameters: &TuningParameters,
    ) -> Result<Self, PrimitiveError> {
        let properties = device.properties();
        let elem = problem.elem;
        let work_group_size = parameters.get_usize(REDUCE_WORK_GROUP_SIZE)?;
        let blocks = parameters.get_usize(REDUCE_BLOCKS)?;
        let limit = max_work_group_size(properties, &elem);

        ensure(work_group_size > 0 && work_group_size <= limit, || {
            format!("{REDUCE_WORK_GROUP_SIZE} {work_group_size} must be between 1 and {limit}")
        })?;
        ensure(blocks > 0 && blocks <= u32::MAX as usize, || {
            format!("Invalid {REDUCE_BLOCKS} {blocks}")
        })?;

        let backend = device.backend();
        let source = ProgramSource::new("reduce")
            .define("REDUCE_WORK_GROUP_SIZE", work_group_size)
            .define("REDUCE_BLOCKS", blocks)
            .define_type("REDUCE_T", elem.name());
        let program = backend.build_program(&with_extensions(source, &[elem]))?;
        let sums_size = (blocks + 1) * elem.storage_size();
        let sums = backend.create_buffer(sums_size, BufferAccess::ReadWrite)?;
        let counter = backend.create_buffer(4, BufferAccess::ReadWrite)?;
        let blocks_arg = kernel_u32("Reduce block count", blocks)?;
        let init = backend.write(&counter, 0, &blocks_arg.to_le_bytes(), &[])?;
        backend.wait(&init)?;

        Ok(Self {
            program,
            sums,
            counter,
            work_group_size,
            blocks,
            elem,
        })
    }

    fn measure(&mut self, device: &ComputeDevice<B>) -> Result<f64, PrimitiveError> {
        let backend = device.backend();
        let elem_size = self.elem.storage_size();
        let output = backend.create_buffer(elem_size, BufferAccess::WriteOnly)?;
        let mut score = 0.0;

        for elements in problem_sizes(elem_size) {
            let input = backend.create_buffer(elements * elem_size, BufferAccess::ReadOnly)?;
            let elapsed = warm_then_time(backend, || {
                self.enqueue(
                    device,
                    ReduceArgs::to_buffer(&input, 0, elements, &output, 0),
                    &[],
                )
            })?;
            score += per_element(elapsed, elements);
        }

        Ok(score)
    }

    fn enqueue(
        &mut self,
        device: &ComputeDevice<B>,
        args: ReduceArgs<'_, B>,
        wait_for: &[B::Event],
    ) -> Result<Vec<B::Event>, PrimitiveError> {
        let backend = device.backend();
        let elem_size = self.elem.storage_size();
        self.validate_input(backend, args.input, args.first, args.elements)?;

        match args.output {
            ReduceOutput::Buffer { buffer, position } => {
                ensure(backend.buffer_size(buffer) / elem_size > position, || {
                    format!("Reduce output position {position} is out of buffer bounds")
                })?;
                ensure(backend.buffer_access(buffer).is_writable(), || {
                    "Reduce output buffer is not writable".into()
                })?;
                kernel_u32("Reduce output position", position)?;
                let event = self.dispatch(
                    backend,
                    args.input,
                    args.first,
                    args.elements,
                    buffer,
                    position,
                    wait_for,
                )?;

                Ok(vec![event])
            }
            ReduceOutput::Host(out) => {
                ensure(out.len() == elem_size, || {
                    format!(
                        "Reduce host output has {} bytes, expected one {} of {elem_size} bytes",
                        out.len(),
                        self.elem
                    )
                })?;
                let reduce = self.dispatch(
                    backend,
                    args.input,
                    args.first,
                    args.elements,
                    &self.sums,
                    self.blocks,
                    wait_for,
                )?;
                let read = backend.read(
                    &self.sums,
                    self.blocks * elem_size,
                    out,
                    core::slice::from_ref(&reduce),
                )?;

                Ok(vec![reduce, read])
            }
        }
    }

    fn details(&self) -> Vec<(&'static str, String)> {
        vec![
            ("elem", self.elem.name()),
            (REDUCE_WORK_GROUP_SIZE, self.work_group_size.to_string()),
            (REDUCE_BLOCKS, self.blocks.to_string()),
        ]
    }
}
