//! Error types for workflow validation, execution and the compute backend
//!
//! Validation errors are raised synchronously before any backend call is
//! made. Step errors come out of the concurrent run phase and always name the
//! sub-operation that failed. Backend errors are whatever the compute client
//! reports; this crate never retries them.

use crate::workflow::registry::ResourceKind;
use thiserror::Error;

/// Errors detected while validating a step against the workflow registries
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("duplicate {kind} name {name:?}")]
    DuplicateName { kind: ResourceKind, name: String },

    #[error("{kind} {reference:?} referenced by {name:?} not found")]
    UnresolvedReference {
        kind: ResourceKind,
        name: String,
        reference: String,
    },

    #[error("cannot parse {field} {value:?} for {name:?}: {reason}")]
    MalformedField {
        name: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{name:?} must set at least one of: {}", .fields.join(", "))]
    MissingField {
        name: String,
        fields: Vec<&'static str>,
    },

    #[error("{name:?} sets mutually exclusive fields: {}", .fields.join(", "))]
    ConflictingFields {
        name: String,
        fields: Vec<&'static str>,
    },

    #[error("{kind} {name:?} is already scheduled for deletion")]
    AlreadyDeleted { kind: ResourceKind, name: String },

    #[error("{kind} {name:?} is used by step {step:?}, which does not run before the deletion")]
    InUse {
        kind: ResourceKind,
        name: String,
        step: String,
    },

    #[error("step {step:?} cannot be validated from state {state}")]
    InvalidState { step: String, state: String },

    #[error("step {step:?} must declare exactly one action, found {found}")]
    InvalidStep { step: String, found: usize },

    #[error("step {step:?} depends on unknown step {dependency:?}")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle involving step {step:?}")]
    DependencyCycle { step: String },
}

/// Failure reported by a [`ComputeClient`](crate::compute::ComputeClient) call
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("resource {name:?} already exists")]
    AlreadyExists { name: String },

    #[error("resource {name:?} not found")]
    NotFound { name: String },

    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl BackendError {
    /// Whether the resource is already gone, which cleanup treats as success
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
            || matches!(self, BackendError::Api { code: 404, .. })
    }
}

/// Errors from the run phase of a step
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{kind} {name:?}: {source}")]
    Backend {
        kind: ResourceKind,
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("{kind} {name:?}: invalid or missing reference to {reference_kind} {reference:?}")]
    UnresolvedReference {
        kind: ResourceKind,
        name: String,
        reference_kind: ResourceKind,
        reference: String,
    },

    #[error("{kind} {name:?}: {source}")]
    InvalidInput {
        kind: ResourceKind,
        name: String,
        #[source]
        source: ValidationError,
    },

    #[error("step {step:?} cannot run from state {state}")]
    NotValidated { step: String, state: String },

    #[error("sub-operation task panicked: {0}")]
    TaskPanicked(#[from] tokio::task::JoinError),
}

/// Top-level error returned by a workflow run
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("step {step:?} failed validation: {source}")]
    Validation {
        step: String,
        #[source]
        source: ValidationError,
    },

    #[error("step {step:?} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("invalid workflow document: {0}")]
    Document(#[from] serde_yaml::Error),
}

impl WorkflowError {
    /// The validation error behind this failure, if validation caused it
    pub fn validation_error(&self) -> Option<&ValidationError> {
        match self {
            WorkflowError::Validation { source, .. } => Some(source),
            _ => None,
        }
    }
}
