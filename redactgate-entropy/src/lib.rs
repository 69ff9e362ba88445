// redactgate-entropy/src/lib.rs
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod context;
pub mod entropy;
pub mod metrics;

/// Common type definitions
pub type EntropyScore = f64;
