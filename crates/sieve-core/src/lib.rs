//! # sieve-core
//! Foundation types and traits for the Sieve wallet node.

pub mod codec;
pub mod constants;
pub mod error;
pub mod future;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod mock;
