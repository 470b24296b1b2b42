//! Test doubles for the worker's external dependencies.
//!
//! - `blob_server`: loopback HTTP endpoint that fails or stalls
//! - `dataset`: resource files on local disk plus the matching dispatch table
//! - `validator`: shell-script validators with controlled exit behavior

pub mod dataset;

pub use blob_server::{allow_http, Behavior, BlobServer};
pub use dataset::*;
pub use validator::*;
