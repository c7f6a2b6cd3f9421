//! Internal utilities for the Coreflow runtime.
//!
//! Kept minimal and dependency-free so scheduling decisions stay
//! deterministic under a fixed seed.

pub mod det_rng;

pub use det_rng::DetRng;
