//! Application-level functionality used by the `cloudflow` binary

pub mod logging;

pub use logging::init_logging;
