#![warn(missing_docs)]

//! gridprim primitives.
//!
//! Exclusive prefix sum, reduction and radix sort over device buffers. Each primitive is an
//! [Algorithm](gridprim_runtime::algorithm::Algorithm) whose launch geometry is resolved from
//! the tuning cache, or tuned on first use.

#[macro_use]
extern crate derive_new;

mod device_tune;
mod measure;
mod radixsort;
mod reduce;
mod scan;
mod shared;

pub use device_tune::*;
pub use radixsort::*;
pub use reduce::*;
pub use scan::*;
