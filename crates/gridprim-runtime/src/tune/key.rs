use crate::{CacheError, DeviceFingerprint, ElemType};
use core::fmt::{Debug, Display};
use core::hash::Hash;
use gridprim_common::hash::StableHasher;
use gridprim_common::storage::{RECORD_EXTENSION, RecordPath};
use serde::{Deserialize, Serialize};

/// Number of segments of a [record path](TuningKey::record_path).
pub const RECORD_DEPTH: usize = 4;

/// Trait alias for problem descriptors that can be part of a persisted tuning key.
pub trait AutotuneKey:
    Clone
    + Debug
    + PartialEq
    + Eq
    + Hash
    + Display
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl AutotuneKey for String {}
impl AutotuneKey for ElemType {}

/// Identifies one tuning result: an algorithm revision, a device and a problem.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(bound = "P: AutotuneKey")]
pub struct TuningKey<P> {
    /// Name of the algorithm.
    pub algorithm: String,
    /// Fingerprint of the device the parameters were tuned on.
    pub device: DeviceFingerprint,
    /// The canonical problem descriptor.
    pub problem: P,
    /// Revision of the algorithm's parameter layout. Entries of other revisions are ignored.
    pub format_version: u32,
}

impl<P: AutotuneKey> TuningKey<P> {
    /// Create a new tuning key.
    pub fn new(
        algorithm: impl Into<String>,
        device: DeviceFingerprint,
        problem: P,
        format_version: u32,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            device,
            problem,
            format_version,
        }
    }

    /// Where the entry of this key is stored.
    ///
    /// `<algorithm>/v<format_version>/<device digest>/<key digest>.json`
    pub fn record_path(&self) -> Result<RecordPath, CacheError> {
        let content = serde_json::to_vec(self).map_err(|err| CacheError::Serialization {
            path: self.to_string(),
            reason: err.to_string(),
        })?;

        Ok(RecordPath::new([
            self.algorithm.clone(),
            format!("v{}", self.format_version),
            self.device.digest(),
            format!("{}.{RECORD_EXTENSION}", StableHasher::hex_digest(&content)),
        ]))
    }
}

impl<P: Display> Display for TuningKey<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}_v{}-{} on {}",
            self.algorithm, self.format_version, self.problem, self.device
        )
    }
}
