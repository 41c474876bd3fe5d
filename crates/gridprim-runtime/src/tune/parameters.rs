use crate::PrimitiveError;
use core::fmt::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of a single tuning parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// An integer, e.g. a work group size.
    Int(u64),
    /// One of a fixed set of named choices.
    Enum(String),
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Enum(value) => f.write_str(value),
        }
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(value as u64)
    }
}

impl From<usize> for ParamValue {
    fn from(value: usize) -> Self {
        Self::Int(value as u64)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Enum(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Enum(value)
    }
}

/// Named parameters selecting one kernel configuration.
///
/// Parameters are ordered by name, so two sets with the same values always compare, hash and
/// print the same way.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TuningParameters {
    values: BTreeMap<String, ParamValue>,
}

impl TuningParameters {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Add or replace a parameter.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// The value of a parameter.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// The value of an integer parameter, failing when it is missing or not an integer.
    pub fn get_usize(&self, name: &str) -> Result<usize, PrimitiveError> {
        match self.values.get(name) {
            Some(ParamValue::Int(value)) => usize::try_from(*value).map_err(|_| {
                PrimitiveError::internal(format!("Parameter {name}={value} doesn't fit in usize"))
            }),
            Some(value) => Err(PrimitiveError::internal(format!(
                "Parameter {name}={value} is not an integer"
            ))),
            None => Err(PrimitiveError::internal(format!(
                "Missing tuning parameter {name}"
            ))),
        }
    }

    /// The value of an enum parameter, failing when it is missing or not an enum.
    pub fn get_enum(&self, name: &str) -> Result<&str, PrimitiveError> {
        match self.values.get(name) {
            Some(ParamValue::Enum(value)) => Ok(value),
            Some(value) => Err(PrimitiveError::internal(format!(
                "Parameter {name}={value} is not an enum"
            ))),
            None => Err(PrimitiveError::internal(format!(
                "Missing tuning parameter {name}"
            ))),
        }
    }

    /// A copy of these parameters with every value of `overrides` applied on top.
    pub fn merged(&self, overrides: &TuningParameters) -> Self {
        let mut merged = self.clone();
        for (name, value) in overrides.iter() {
            merged.values.insert(name.to_string(), value.clone());
        }
        merged
    }

    /// Iterate over the parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Display for TuningParameters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// The ordered set of candidates an algorithm is tuned over.
///
/// Candidates are grouped in stages. Each stage lists parameter overrides applied on top of the
/// best candidate of the previous stage (or the base parameters for the first stage), so one
/// parameter can be tuned at a time while the others keep their best known value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateSpace {
    base: TuningParameters,
    stages: Vec<Vec<TuningParameters>>,
}

impl CandidateSpace {
    /// Create a space without stages, starting from the given base parameters.
    pub fn new(base: TuningParameters) -> Self {
        Self {
            base,
            stages: Vec::new(),
        }
    }

    /// A space made of a single stage of complete candidates.
    pub fn flat(candidates: Vec<TuningParameters>) -> Self {
        Self::new(TuningParameters::new()).with_stage(candidates)
    }

    /// Append a stage.
    pub fn with_stage(mut self, overrides: Vec<TuningParameters>) -> Self {
        self.stages.push(overrides);
        self
    }

    /// The base parameters.
    pub fn base(&self) -> &TuningParameters {
        &self.base
    }

    /// The stages in evaluation order.
    pub fn stages(&self) -> &[Vec<TuningParameters>] {
        &self.stages
    }

    /// Total number of candidates over all stages.
    pub fn len(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }

    /// Whether some stage has no candidate, in which case nothing can be selected.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty() || self.stages.iter().any(Vec::is_empty)
    }

    /// Checksum of the whole space, used to detect cached entries produced by a different
    /// candidate space.
    pub fn checksum(&self) -> String {
        let mut content = self.base.to_string();
        for stage in self.stages.iter() {
            content += "\n#";
            for candidate in stage.iter() {
                content += "\n";
                content += &candidate.to_string();
            }
        }

        format!("{:x}", md5::compute(content))
    }
}
