use crate::radixsort::RADIXSORT_ALGORITHM;
use crate::reduce::REDUCE_ALGORITHM;
use crate::scan::SCAN_ALGORITHM;
use crate::{RadixsortPlan, RadixsortProblem, ReducePlan, ReduceProblem, ScanPlan, ScanProblem};
use core::fmt::Display;
use gridprim_runtime::algorithm::{Algorithm, Primitive, Resolution};
use gridprim_runtime::backend::ComputeBackend;
use gridprim_runtime::tune::Autotuner;
use gridprim_runtime::{BaseType, ComputeDevice, DeviceProperties, ElemType, PrimitiveError};
use hashbrown::HashSet;

/// One problem to tune.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TuneTarget {
    /// A scan.
    Scan(ScanProblem),
    /// A reduction.
    Reduce(ReduceProblem),
    /// A radix sort.
    Radixsort(RadixsortProblem),
}

impl TuneTarget {
    /// Every problem the device supports, one per tuning key.
    pub fn all<B: ComputeBackend>(device: &DeviceProperties) -> Vec<Self> {
        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        let mut push = |target: TuneTarget| {
            if seen.insert(target.canonical::<B>()) {
                targets.push(target);
            }
        };

        for elem in ElemType::all() {
            let scan = ScanProblem::new(elem);
            if ScanPlan::<B>::validate(device, &scan).is_ok() {
                push(TuneTarget::Scan(scan));
            }
        }
        for elem in ElemType::all() {
            let reduce = ReduceProblem::new(elem);
            if ReducePlan::<B>::validate(device, &reduce).is_ok() {
                push(TuneTarget::Reduce(reduce));
            }
        }
        let values = core::iter::once(ElemType::void()).chain(ElemType::all());
        for value in values {
            for base in [BaseType::UChar, BaseType::UShort, BaseType::UInt, BaseType::ULong] {
                let Ok(key) = ElemType::scalar(base) else {
                    continue;
                };
                let sort = RadixsortProblem::new(key, value);
                if RadixsortPlan::<B>::validate(device, &sort).is_ok() {
                    push(TuneTarget::Radixsort(sort));
                }
            }
        }

        targets
    }

    /// Name of the algorithm.
    pub fn algorithm(&self) -> &'static str {
        match self {
            TuneTarget::Scan(_) => SCAN_ALGORITHM,
            TuneTarget::Reduce(_) => REDUCE_ALGORITHM,
            TuneTarget::Radixsort(_) => RADIXSORT_ALGORITHM,
        }
    }

    fn canonical<B: ComputeBackend>(&self) -> Self {
        match self {
            TuneTarget::Scan(problem) => TuneTarget::Scan(ScanPlan::<B>::canonical(problem)),
            TuneTarget::Reduce(problem) => TuneTarget::Reduce(ReducePlan::<B>::canonical(problem)),
            TuneTarget::Radixsort(problem) => {
                TuneTarget::Radixsort(RadixsortPlan::<B>::canonical(problem))
            }
        }
    }

    /// Resolve the parameters of the problem, tuning it on a cache miss.
    pub fn tune<B: ComputeBackend>(
        &self,
        device: &ComputeDevice<B>,
        tuner: &Autotuner,
    ) -> Result<Resolution, PrimitiveError> {
        match self {
            TuneTarget::Scan(problem) => resolve::<B, ScanPlan<B>>(device, *problem, tuner),
            TuneTarget::Reduce(problem) => resolve::<B, ReducePlan<B>>(device, *problem, tuner),
            TuneTarget::Radixsort(problem) => {
                resolve::<B, RadixsortPlan<B>>(device, *problem, tuner)
            }
        }
    }
}

impl Display for TuneTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let problem: &dyn Display = match self {
            TuneTarget::Scan(problem) => problem,
            TuneTarget::Reduce(problem) => problem,
            TuneTarget::Radixsort(problem) => problem,
        };
        write!(f, "{} {problem}", self.algorithm())
    }
}

fn resolve<B: ComputeBackend, P: Primitive<B>>(
    device: &ComputeDevice<B>,
    problem: P::Problem,
    tuner: &Autotuner,
) -> Result<Resolution, PrimitiveError> {
    let algorithm = Algorithm::<B, P>::new(device, problem, tuner)?;
    algorithm.resolution().cloned()
}

/// Result of tuning one problem.
#[derive(Debug)]
pub struct TuneRecord {
    /// The tuned problem.
    pub target: TuneTarget,
    /// How its parameters were resolved.
    pub result: Result<Resolution, PrimitiveError>,
}

/// Outcome of [tune_device].
#[derive(Debug, Default)]
pub struct TuneReport {
    /// One record per problem, in tuning order.
    pub records: Vec<TuneRecord>,
}

impl TuneReport {
    /// Number of problems that were tuned during this run.
    pub fn tuned(&self) -> usize {
        self.count(|result| matches!(result, Ok(Resolution::Tuned { .. })))
    }

    /// Number of problems already present in the cache.
    pub fn cached(&self) -> usize {
        self.count(|result| matches!(result, Ok(Resolution::Cached { .. })))
    }

    /// Number of problems that couldn't be tuned.
    pub fn failed(&self) -> usize {
        self.count(Result::is_err)
    }

    fn count(&self, filter: impl Fn(&Result<Resolution, PrimitiveError>) -> bool) -> usize {
        self.records
            .iter()
            .filter(|record| filter(&record.result))
            .count()
    }
}

impl Display for TuneReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for record in self.records.iter() {
            match &record.result {
                Ok(Resolution::Cached { .. }) => writeln!(f, "{}: cached", record.target)?,
                Ok(Resolution::Tuned { evaluated, .. }) => {
                    writeln!(f, "{}: tuned over {evaluated} candidates", record.target)?
                }
                Err(err) => writeln!(f, "{}: failed ({err})", record.target)?,
            }
        }
        write!(
            f,
            "{} tuned, {} cached, {} failed",
            self.tuned(),
            self.cached(),
            self.failed()
        )
    }
}

/// Tune every primitive for every type the device supports, filling the cache.
pub fn tune_device<B: ComputeBackend>(device: &ComputeDevice<B>, tuner: &Autotuner) -> TuneReport {
    tune_targets(device, tuner, &TuneTarget::all::<B>(device.properties()))
}

/// Tune the given problems, in order. Failures are recorded and don't stop the run.
pub fn tune_targets<B: ComputeBackend>(
    device: &ComputeDevice<B>,
    tuner: &Autotuner,
    targets: &[TuneTarget],
) -> TuneReport {
    let records = targets
        .iter()
        .map(|target| {
            log::info!("Tuning {target} on {}", device.fingerprint());
            let result = target.tune(device, tuner);
            if let Err(err) = &result {
                log::warn!("Can't tune {target} on {}: {err}", device.fingerprint());
            }

            TuneRecord {
                target: *target,
                result,
            }
        })
        .collect();

    TuneReport { records }
}
