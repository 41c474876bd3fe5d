#![warn(missing_docs)]

//! gridprim runtime crate.
//!
//! Provides the pieces shared by every data-parallel primitive: element type descriptors,
//! device fingerprints, the compute backend boundary, and the autotuning engine with its
//! persistent cache.

#[macro_use]
extern crate derive_new;

/// Algorithm lifecycle shared by all primitives.
pub mod algorithm;
/// Compute backend boundary.
pub mod backend;
/// Global configuration.
pub mod config;
/// Autotune module
pub mod tune;

mod device;
mod error;
mod types;

pub use device::*;
pub use error::*;
pub use types::*;

/// In-process backend used to exercise the tuning engine without a device.
#[cfg(any(test, feature = "testing"))]
pub mod testing;
