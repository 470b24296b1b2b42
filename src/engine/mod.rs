//! Validation engine module.
//!
//! Stages resources, runs the validator and turns every outcome into a
//! result row.

pub mod process;
pub mod result;
pub mod staging;
pub mod worker;
