#![warn(missing_docs)]

//! Common crate for gridprim.
//!
//! Holds the storage layer used by the tuning cache and the stable hasher used to derive
//! record names from tuning keys.

/// Record storage backends.
pub mod storage;

/// Stable hashing.
pub mod hash;
