use super::EventCallback;
use crate::backend::ComputeBackend;
use crate::tune::{AutotuneKey, Autotuner, CandidateSpace, TuningKey, TuningParameters};
use crate::{CacheError, ComputeDevice, DeviceProperties, PrimitiveError, TuneError};
use core::fmt::Debug;
use core::time::Duration;
use std::collections::BTreeMap;

/// Capabilities an algorithm variant provides to the tuning engine.
///
/// An implementation is the execution plan of one primitive for one problem on one device,
/// built from a set of [tuning parameters](TuningParameters).
pub trait Primitive<B: ComputeBackend>: Sized + Send {
    /// Describes what the algorithm is asked to process, e.g. the element type.
    type Problem: AutotuneKey;
    /// Arguments of one execution, possibly borrowing host memory.
    type Args<'a>;

    /// Name of the algorithm, part of the tuning key.
    const NAME: &'static str;
    /// Revision of the parameter layout, part of the tuning key.
    const FORMAT_VERSION: u32;

    /// Reject problems the device can't run.
    fn validate(device: &DeviceProperties, problem: &Self::Problem) -> Result<(), PrimitiveError>;

    /// The problem equivalent problems are tuned as, so they share one cache entry.
    fn canonical(problem: &Self::Problem) -> Self::Problem {
        problem.clone()
    }

    /// The candidates to tune the canonical problem over.
    fn candidates(device: &DeviceProperties, problem: &Self::Problem) -> CandidateSpace;

    /// Prepare an execution plan.
    fn build(
        device: &ComputeDevice<B>,
        problem: &Self::Problem,
        parameters: &TuningParameters,
    ) -> Result<Self, PrimitiveError>;

    /// Score the plan on representative inputs, lower is better.
    fn measure(&mut self, device: &ComputeDevice<B>) -> Result<f64, PrimitiveError>;

    /// Enqueue one execution and return the events of every enqueued command, in order.
    fn enqueue(
        &mut self,
        device: &ComputeDevice<B>,
        args: Self::Args<'_>,
        wait_for: &[B::Event],
    ) -> Result<Vec<B::Event>, PrimitiveError>;

    /// Diagnostic details about the plan.
    fn details(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Wait for every event and return the total device time.
pub fn total_elapsed<B: ComputeBackend>(
    backend: &B,
    events: &[B::Event],
) -> Result<Duration, PrimitiveError> {
    let mut total = Duration::ZERO;
    for event in events {
        total += backend.wait(event)?;
    }
    Ok(total)
}

/// How the parameters of an algorithm were obtained.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Found in the cache, no candidate was measured.
    Cached {
        /// Score recorded with the entry.
        score: f64,
    },
    /// Produced by a tuning run.
    Tuned {
        /// Number of candidates measured.
        evaluated: usize,
        /// Score of the selected candidate.
        score: f64,
    },
}

impl Resolution {
    /// Number of candidates measured while resolving the parameters.
    pub fn evaluated(&self) -> usize {
        match self {
            Resolution::Cached { .. } => 0,
            Resolution::Tuned { evaluated, .. } => *evaluated,
        }
    }
}

/// Lifecycle state of an [algorithm](Algorithm).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgorithmState {
    /// Parameters are resolved and the plan is ready to execute.
    Ready,
    /// The algorithm was moved from, or disposed. Executing fails.
    Disposed,
}

struct Ready<B: ComputeBackend, P: Primitive<B>> {
    device: ComputeDevice<B>,
    problem: P::Problem,
    parameters: TuningParameters,
    plan: P,
    resolution: Resolution,
    details: BTreeMap<String, String>,
    persist_error: Option<CacheError>,
    callback: Option<EventCallback<B::Event>>,
}

/// A primitive with resolved parameters and a prepared plan.
///
/// Construction looks the parameters up in the cache and tunes on a miss. Moving out with
/// [take](Algorithm::take) or disposing leaves an empty algorithm behind that refuses to
/// execute.
pub struct Algorithm<B: ComputeBackend, P: Primitive<B>> {
    inner: Option<Ready<B, P>>,
}

impl<B: ComputeBackend, P: Primitive<B>> Default for Algorithm<B, P> {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<B: ComputeBackend, P: Primitive<B>> Debug for Algorithm<B, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.inner {
            Some(ready) => f
                .debug_struct(P::NAME)
                .field("problem", &ready.problem)
                .field("parameters", &ready.parameters)
                .field("resolution", &ready.resolution)
                .finish(),
            None => f.debug_struct(P::NAME).field("state", &"disposed").finish(),
        }
    }
}

impl<B: ComputeBackend, P: Primitive<B>> Algorithm<B, P> {
    /// Resolve the parameters of a problem on a device and prepare the plan.
    ///
    /// Invalid problems are rejected before the cache is touched. Cached parameters that can't
    /// be used anymore are ignored and the problem is tuned again.
    pub fn new(
        device: &ComputeDevice<B>,
        problem: P::Problem,
        tuner: &Autotuner,
    ) -> Result<Self, PrimitiveError> {
        P::validate(device.properties(), &problem)?;

        let canonical = P::canonical(&problem);
        let space = P::candidates(device.properties(), &canonical);
        if space.is_empty() {
            return Err(TuneError::EmptySpace {
                algorithm: P::NAME.into(),
            }
            .into());
        }
        let key = TuningKey::new(
            P::NAME,
            device.fingerprint().clone(),
            canonical,
            P::FORMAT_VERSION,
        );

        if let Some(entry) = tuner.lookup(&key, &space) {
            match P::build(device, &problem, &entry.parameters) {
                Ok(plan) => {
                    log::debug!("Using cached parameters {} for {key}", entry.parameters);
                    let resolution = Resolution::Cached { score: entry.score };
                    return Ok(Self::ready(
                        device,
                        problem,
                        entry.parameters,
                        plan,
                        resolution,
                        None,
                    ));
                }
                Err(err) => {
                    log::warn!("Cached parameters for {key} can't be used, tuning again: {err}")
                }
            }
        }

        let mut outcome = tuner.search(P::NAME, key.device.name(), &space, |parameters| {
            let mut plan = P::build(device, &problem, parameters)?;
            plan.measure(device)
        })?;
        let plan = P::build(device, &problem, &outcome.parameters)?;
        tuner.persist(&key, &space, &mut outcome);
        let resolution = Resolution::Tuned {
            evaluated: outcome.evaluated,
            score: outcome.score,
        };

        Ok(Self::ready(
            device,
            problem,
            outcome.parameters,
            plan,
            resolution,
            outcome.persist_error,
        ))
    }

    fn ready(
        device: &ComputeDevice<B>,
        problem: P::Problem,
        parameters: TuningParameters,
        plan: P,
        resolution: Resolution,
        persist_error: Option<CacheError>,
    ) -> Self {
        let details = plan
            .details()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();

        Self {
            inner: Some(Ready {
                device: device.clone(),
                problem,
                parameters,
                plan,
                resolution,
                details,
                persist_error,
                callback: None,
            }),
        }
    }

    fn get(&self) -> Result<&Ready<B, P>, PrimitiveError> {
        self.inner.as_ref().ok_or_else(disposed::<B, P>)
    }

    fn get_mut(&mut self) -> Result<&mut Ready<B, P>, PrimitiveError> {
        self.inner.as_mut().ok_or_else(disposed::<B, P>)
    }

    /// The lifecycle state.
    pub fn state(&self) -> AlgorithmState {
        match self.inner {
            Some(_) => AlgorithmState::Ready,
            None => AlgorithmState::Disposed,
        }
    }

    /// Whether the algorithm can execute.
    pub fn is_ready(&self) -> bool {
        self.inner.is_some()
    }

    /// The problem the algorithm was built for.
    pub fn problem(&self) -> Result<&P::Problem, PrimitiveError> {
        self.get().map(|ready| &ready.problem)
    }

    /// The resolved parameters.
    pub fn parameters(&self) -> Result<&TuningParameters, PrimitiveError> {
        self.get().map(|ready| &ready.parameters)
    }

    /// How the parameters were obtained.
    pub fn resolution(&self) -> Result<&Resolution, PrimitiveError> {
        self.get().map(|ready| &ready.resolution)
    }

    /// The error that prevented freshly tuned parameters from being persisted, if any.
    pub fn persist_error(&self) -> Option<&CacheError> {
        self.inner
            .as_ref()
            .and_then(|ready| ready.persist_error.as_ref())
    }

    /// The execution plan.
    pub fn plan(&self) -> Result<&P, PrimitiveError> {
        self.get().map(|ready| &ready.plan)
    }

    /// The execution plan, mutably.
    pub fn plan_mut(&mut self) -> Result<&mut P, PrimitiveError> {
        self.get_mut().map(|ready| &mut ready.plan)
    }

    /// The device the algorithm runs on.
    pub fn device(&self) -> Result<&ComputeDevice<B>, PrimitiveError> {
        self.get().map(|ready| &ready.device)
    }

    /// Diagnostic details.
    pub fn details(&self) -> Result<&BTreeMap<String, String>, PrimitiveError> {
        self.get().map(|ready| &ready.details)
    }

    /// Record a diagnostic detail.
    pub fn set_detail(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), PrimitiveError> {
        self.get_mut()?.details.insert(name.into(), value.into());
        Ok(())
    }

    /// Register the completion callback, dropping the previous one first.
    pub fn set_event_callback(
        &mut self,
        callback: EventCallback<B::Event>,
    ) -> Result<(), PrimitiveError> {
        let ready = self.get_mut()?;
        drop(ready.callback.take());
        ready.callback = Some(callback);
        Ok(())
    }

    /// Remove the completion callback.
    pub fn clear_event_callback(&mut self) -> Result<(), PrimitiveError> {
        self.get_mut()?.callback = None;
        Ok(())
    }

    /// Execute the algorithm and return the completion event.
    pub fn execute(&mut self, args: P::Args<'_>) -> Result<B::Event, PrimitiveError> {
        self.execute_after(args, &[])
    }

    /// Execute the algorithm once the given events completed and return the completion event.
    ///
    /// The completion callback, if any, is invoked once with the returned event.
    pub fn execute_after(
        &mut self,
        args: P::Args<'_>,
        wait_for: &[B::Event],
    ) -> Result<B::Event, PrimitiveError> {
        let ready = self.get_mut()?;
        let events = ready.plan.enqueue(&ready.device, args, wait_for)?;
        let event = events.last().cloned().ok_or_else(|| {
            PrimitiveError::internal(format!("{} enqueued no command", P::NAME))
        })?;

        if let Some(callback) = ready.callback.as_mut() {
            callback.call(&event);
        }

        Ok(event)
    }

    /// Exchange the state of two algorithms.
    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.inner, &mut other.inner);
    }

    /// Move the state out, leaving a disposed algorithm behind.
    pub fn take(&mut self) -> Self {
        Self {
            inner: self.inner.take(),
        }
    }

    /// Release the plan and the callback.
    pub fn dispose(&mut self) {
        self.inner = None;
    }
}

fn disposed<B: ComputeBackend, P: Primitive<B>>() -> PrimitiveError {
    PrimitiveError::internal(format!(
        "The {} algorithm was moved from or disposed",
        P::NAME
    ))
}
