//! # cloudflow
//!
//! Declarative workflows that create and delete compute resources: disks,
//! images and instances. Steps fan out one task per resource, names are
//! reserved up front so collisions surface before any API call, and every
//! resource a run creates is deleted when the run ends unless marked
//! `no_cleanup`.
//!
//! ## Modules
//!
//! - `compute` - Backend abstraction, request types and the dry-run client
//! - `workflow` - Documents, steps, registries, execution and cleanup
//! - `config` - Engine defaults loaded from TOML and the environment
//! - `error` - Typed errors for validation, steps, backends and workflows
//! - `app` - Logging setup for the binary
//! - `testing` - Recording mock backend
pub mod app;
pub mod compute;
pub mod config;
pub mod error;
pub mod workflow;

pub mod testing;
