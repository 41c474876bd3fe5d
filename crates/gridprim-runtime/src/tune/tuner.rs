use super::{
    AutotuneKey, CacheEntry, CacheStore, CandidateSpace, TunePolicy, TuningKey, TuningParameters,
};
use crate::config::{OutputSink, autotune::TuneVerbosity};
use crate::{CacheError, PrimitiveError, TuneError};
use core::any::Any;
use core::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Result of a tuning run.
#[derive(Clone, Debug)]
pub struct TuneOutcome {
    /// The selected parameters.
    pub parameters: TuningParameters,
    /// Score of the selected parameters, lower is better.
    pub score: f64,
    /// Number of candidates measured.
    pub evaluated: usize,
    /// Set when the result could not be persisted. The parameters are still valid.
    pub persist_error: Option<CacheError>,
}

/// Searches candidate spaces and persists the results.
///
/// Candidates are measured one after the other, never concurrently. A candidate that fails or
/// panics is skipped; the candidate with the lowest score wins, the first one on ties.
#[derive(Clone, Debug)]
pub struct Autotuner {
    cache: CacheStore,
    policy: TunePolicy,
}

impl Autotuner {
    /// Create an autotuner persisting into the given cache.
    pub fn new(cache: CacheStore, policy: TunePolicy) -> Self {
        Self { cache, policy }
    }

    /// An autotuner with an in-memory cache and the default policy.
    pub fn in_memory() -> Self {
        Self::new(CacheStore::in_memory(), TunePolicy::default())
    }

    /// An autotuner with the cache and policy of the [global config](crate::config::GlobalConfig).
    #[cfg(std_io)]
    pub fn from_config() -> Self {
        Self::new(CacheStore::from_config(), TunePolicy::from_config())
    }

    /// Replace the policy.
    pub fn with_policy(mut self, policy: TunePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The cache store.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// The tune policy.
    pub fn policy(&self) -> &TunePolicy {
        &self.policy
    }

    /// Replace the policy.
    pub fn set_policy(&mut self, policy: TunePolicy) {
        self.policy = policy;
    }

    /// Set every field of the policy.
    pub fn set_tune_policy(&mut self, enabled: bool, verbosity: TuneVerbosity, output: OutputSink) {
        self.policy = TunePolicy::new(enabled, verbosity, output);
    }

    /// Find the cached entry of a key, if it was produced from the same candidate space.
    pub fn lookup<P: AutotuneKey>(
        &self,
        key: &TuningKey<P>,
        space: &CandidateSpace,
    ) -> Option<CacheEntry<P>> {
        let entry = self.cache.lookup(key)?;

        if entry.checksum != space.checksum() {
            log::info!("Ignoring cached parameters of {key} from another candidate space");
            return None;
        }

        Some(entry)
    }

    /// Tune a key and offer the result to the cache.
    ///
    /// A failure to persist the result is logged and reported in the outcome, it doesn't fail
    /// the tuning run.
    pub fn tune<P, F, E>(
        &self,
        key: &TuningKey<P>,
        space: &CandidateSpace,
        measure: F,
    ) -> Result<TuneOutcome, PrimitiveError>
    where
        P: AutotuneKey,
        F: FnMut(&TuningParameters) -> Result<f64, E>,
        E: Display,
    {
        let mut outcome = self.search(&key.algorithm, key.device.name(), space, measure)?;
        self.persist(key, space, &mut outcome);

        Ok(outcome)
    }

    /// Offer the result of a [search](Self::search) to the cache, recording a failure to
    /// persist it in the outcome.
    pub fn persist<P: AutotuneKey>(
        &self,
        key: &TuningKey<P>,
        space: &CandidateSpace,
        outcome: &mut TuneOutcome,
    ) {
        log::info!("Fastest result {} for {key}", outcome.parameters);

        let entry = CacheEntry::new(
            key.clone(),
            outcome.parameters.clone(),
            outcome.score,
            space.checksum(),
        );
        if let Err(err) = self.cache.store(&entry) {
            log::warn!("Tuned parameters for {key} are used but not persisted: {err}");
            outcome.persist_error = Some(err);
        }
    }

    /// Search a candidate space without touching the cache.
    pub fn search<F, E>(
        &self,
        algorithm: &str,
        device: &str,
        space: &CandidateSpace,
        mut measure: F,
    ) -> Result<TuneOutcome, PrimitiveError>
    where
        F: FnMut(&TuningParameters) -> Result<f64, E>,
        E: Display,
    {
        if !self.policy.enabled {
            return Err(TuneError::Disabled {
                algorithm: algorithm.into(),
                device: device.into(),
            }
            .into());
        }
        if space.is_empty() {
            return Err(TuneError::EmptySpace {
                algorithm: algorithm.into(),
            }
            .into());
        }

        let mut logger = self.policy.logger();
        logger.start(algorithm, device);

        let mut current = space.base().clone();
        let mut score = None;
        let mut evaluated = 0;
        let mut last_failure = String::new();

        for stage in space.stages() {
            let mut fastest: Option<(TuningParameters, f64)> = None;

            for overrides in stage.iter() {
                let candidate = current.merged(overrides);
                evaluated += 1;

                match measure_candidate(&mut measure, &candidate) {
                    Ok(value) => {
                        log::debug!("{algorithm} candidate {candidate}: {value}");
                        logger.candidate(&candidate, value);
                        if fastest.as_ref().is_none_or(|(_, best)| value < *best) {
                            fastest = Some((candidate, value));
                        }
                    }
                    Err(reason) => {
                        log::debug!("{algorithm} candidate {candidate} failed: {reason}");
                        logger.candidate_failed(&candidate, &reason);
                        last_failure = reason;
                    }
                }
            }

            match fastest {
                Some((candidate, value)) => {
                    current = candidate;
                    score = Some(value);
                }
                None => log::warn!(
                    "No candidate of a {algorithm} stage succeeded, keeping {current}"
                ),
            }
        }

        let Some(score) = score else {
            logger.finish(None);
            return Err(TuneError::AllCandidatesFailed {
                algorithm: algorithm.into(),
                attempts: evaluated,
                last: last_failure,
            }
            .into());
        };

        logger.finish(Some(&current));

        Ok(TuneOutcome {
            parameters: current,
            score,
            evaluated,
            persist_error: None,
        })
    }
}

fn measure_candidate<F, E>(measure: &mut F, candidate: &TuningParameters) -> Result<f64, String>
where
    F: FnMut(&TuningParameters) -> Result<f64, E>,
    E: Display,
{
    match catch_unwind(AssertUnwindSafe(|| measure(candidate))) {
        Ok(Ok(score)) if score.is_finite() && score >= 0.0 => Ok(score),
        Ok(Ok(score)) => Err(format!("invalid score {score}")),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => {
            log::warn!("Caught panic while measuring {candidate}, skipping it");
            Err(panic_message(payload.as_ref()))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".into()
    }
}
