//! Test doubles for the compute backend
//!
//! Exposed outside `cfg(test)` so integration tests and downstream crates can
//! drive workflows without cloud credentials.

pub mod mock_compute;

pub use mock_compute::{BackendCall, MockComputeClient};
