//! Platform abstraction layer.
//!
//! Provides:
//! - Host identification for reports
//! - Shutdown signalling wired to SIGINT/SIGTERM

pub mod host;
pub mod signal;
