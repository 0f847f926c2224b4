//! Declarative compute workflows
//!
//! A workflow is a set of named steps with dependencies between them. Each
//! step creates or deletes compute resources through a [`ComputeClient`],
//! fanning out one task per resource. Everything a run creates is tracked in
//! per-kind registries and deleted when the run ends unless marked
//! `no_cleanup`.
//!
//! [`ComputeClient`]: crate::compute::ComputeClient

pub mod cleanup;
pub mod context;
pub mod document;
pub mod naming;
pub mod reference;
pub mod registry;
pub mod runner;
pub mod steps;

pub use cleanup::{cleanup_resources, CleanupFailure, CleanupReport};
pub use context::WorkflowContext;
pub use document::{StepDocument, WorkflowDocument};
pub use naming::{generate_run_id, NameGenerator};
pub use reference::ResourceRef;
pub use registry::{Registries, ResourceKind, ResourceRegistry, TrackedResource};
pub use runner::{RunStatus, Workflow};
pub use steps::{
    CreateDisk, CreateDisks, CreateImage, CreateImages, CreateInstance, CreateInstances,
    DeleteResources, FanOutOutcome, Step, StepAction, StepState, ValidationScope,
};
