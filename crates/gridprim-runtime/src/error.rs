use crate::backend::LaunchError;
use core::fmt::Debug;
use thiserror::Error;

/// Error returned by every fallible operation of the primitives.
#[derive(Error, Clone, PartialEq)]
pub enum PrimitiveError {
    /// An invariant was violated inside the library: invalid element type, invalid arguments,
    /// a disposed algorithm or a device failure while executing.
    #[error("Internal error\nCaused by:\n  {reason}")]
    Internal {
        /// Description of the violated invariant.
        reason: String,
    },

    /// The tuning cache could not be written or cleared.
    #[error("Tuning cache error\nCaused by:\n  {0}")]
    Cache(#[from] CacheError),

    /// No viable set of tuning parameters could be produced.
    #[error("Tuning error\nCaused by:\n  {0}")]
    Tune(#[from] TuneError),
}

impl Debug for PrimitiveError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}

impl PrimitiveError {
    /// Create an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Whether this is an [internal](PrimitiveError::Internal) error.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

impl From<LaunchError> for PrimitiveError {
    fn from(value: LaunchError) -> Self {
        Self::internal(value.to_string())
    }
}

/// Failure of the persistent tuning cache.
///
/// Read failures never surface as errors, they are treated as cache misses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A record could not be written.
    #[error("Can't write the tuning record {path}: {reason}")]
    Io {
        /// The record path.
        path: String,
        /// The underlying I/O failure.
        reason: String,
    },
    /// A record could not be serialized.
    #[error("Can't serialize the tuning record {path}: {reason}")]
    Serialization {
        /// The record path, or the key when no path could be derived.
        path: String,
        /// The underlying serialization failure.
        reason: String,
    },
    /// Records could not be removed.
    #[error("Can't remove tuning records under {path}: {reason}")]
    Remove {
        /// The removed record path, or the storage root.
        path: String,
        /// The underlying I/O failure.
        reason: String,
    },
}

/// Failure to produce tuning parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TuneError {
    /// Tuning is disabled by the policy and the cache holds no usable entry.
    #[error("Autotuning is disabled and no cached parameters exist for {algorithm} on {device}")]
    Disabled {
        /// The algorithm name.
        algorithm: String,
        /// The device name.
        device: String,
    },
    /// Every candidate failed to build or to run.
    #[error("All {attempts} candidates failed while tuning {algorithm}, last failure: {last}")]
    AllCandidatesFailed {
        /// The algorithm name.
        algorithm: String,
        /// Number of candidates evaluated.
        attempts: usize,
        /// Description of the last failure.
        last: String,
    },
    /// The algorithm has no candidate for this device and problem.
    #[error("No tuning candidate exists for {algorithm} on this device")]
    EmptySpace {
        /// The algorithm name.
        algorithm: String,
    },
}
