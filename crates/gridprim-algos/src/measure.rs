use core::time::Duration;
use gridprim_runtime::PrimitiveError;
use gridprim_runtime::algorithm::total_elapsed;
use gridprim_runtime::backend::ComputeBackend;

/// Number of elements of the small tuning problem.
pub(crate) const TUNE_SMALL_ELEMENTS: usize = 65536;
/// Bytes covered by the large tuning problem.
pub(crate) const TUNE_LARGE_BYTES: usize = 32 * 1024 * 1024;

/// Problem sizes a plan is measured on, for elements of `elem_size` bytes.
pub(crate) fn problem_sizes(elem_size: usize) -> [usize; 2] {
    [
        TUNE_SMALL_ELEMENTS,
        (TUNE_LARGE_BYTES / elem_size.max(1)).max(1),
    ]
}

/// Run once to warm up, then run again and return the device time of the second run.
pub(crate) fn warm_then_time<B, F>(backend: &B, mut run: F) -> Result<Duration, PrimitiveError>
where
    B: ComputeBackend,
    F: FnMut() -> Result<Vec<B::Event>, PrimitiveError>,
{
    let warmup = run()?;
    total_elapsed(backend, &warmup)?;

    let timed = run()?;
    total_elapsed(backend, &timed)
}

/// Nanoseconds per element.
pub(crate) fn per_element(elapsed: Duration, elements: usize) -> f64 {
    elapsed.as_nanos() as f64 / elements.max(1) as f64
}
