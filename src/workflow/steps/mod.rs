//! Workflow steps
//!
//! A step is one node of the workflow graph. It is validated against the
//! registries before anything runs, then executed as a concurrent fan-out
//! of its sub-operations.

pub mod create_disks;
pub mod create_images;
pub mod create_instances;
pub mod delete_resources;
pub mod fanout;
pub mod scope;

pub use create_disks::{CreateDisk, CreateDisks};
pub use create_images::{CreateImage, CreateImages};
pub use create_instances::{CreateInstance, CreateInstances};
pub use delete_resources::DeleteResources;
pub use fanout::{fan_out, FanOutOutcome, SubOperation};
pub use scope::ValidationScope;

use crate::error::{StepError, ValidationError};
use crate::workflow::context::WorkflowContext;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// The work a step performs
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Name of the step kind, for logs
    fn kind(&self) -> &'static str;

    /// Check the declared input against the registries and reserve names.
    ///
    /// Makes no backend calls. Stops at the first invalid sub-operation.
    fn validate(&self, scope: &ValidationScope<'_>) -> Result<(), ValidationError>;

    /// Execute every sub-operation concurrently
    async fn run(&self, step: &str, ctx: &Arc<WorkflowContext>)
        -> Result<FanOutOutcome, StepError>;
}

/// Lifecycle of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Created,
    Validating,
    Validated,
    ValidationFailed,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepState::Created => "created",
            StepState::Validating => "validating",
            StepState::Validated => "validated",
            StepState::ValidationFailed => "validation-failed",
            StepState::Running => "running",
            StepState::Succeeded => "succeeded",
            StepState::Failed => "failed",
            StepState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A named step with its dependencies and lifecycle state
pub struct Step {
    name: String,
    depends_on: Vec<String>,
    action: Box<dyn StepAction>,
    state: Mutex<StepState>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: Box<dyn StepAction>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            action,
            state: Mutex::new(StepState::Created),
        }
    }

    pub fn with_dependencies(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn kind(&self) -> &'static str {
        self.action.kind()
    }

    pub fn state(&self) -> StepState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to` if the current state is one of `from`.
    ///
    /// Returns the state found when the move is refused.
    fn advance(&self, from: &[StepState], to: StepState) -> Result<(), StepState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *state;
        if !from.contains(&current) {
            return Err(current);
        }
        debug!(step = %self.name, from = %current, %to, "step state change");
        *state = to;
        Ok(())
    }

    /// Validate as a step with no upstream steps
    pub fn validate(&self, ctx: &WorkflowContext) -> Result<(), ValidationError> {
        self.validate_after(ctx, &HashSet::new())
    }

    /// Validate once, seeing only names created by the steps in `upstream`.
    ///
    /// A step that already validated is left untouched.
    pub fn validate_after(
        &self,
        ctx: &WorkflowContext,
        upstream: &HashSet<String>,
    ) -> Result<(), ValidationError> {
        match self.advance(&[StepState::Created], StepState::Validating) {
            Ok(()) => {}
            Err(StepState::Validated) => return Ok(()),
            Err(state) => {
                return Err(ValidationError::InvalidState {
                    step: self.name.clone(),
                    state: state.to_string(),
                })
            }
        }

        let scope = ValidationScope::for_step(ctx, &self.name, upstream);
        let result = self.action.validate(&scope);
        let to = if result.is_ok() {
            StepState::Validated
        } else {
            StepState::ValidationFailed
        };
        // Only this call moves the step out of Validating.
        let _ = self.advance(&[StepState::Validating], to);
        result
    }

    /// Run a validated step
    pub async fn run(&self, ctx: &Arc<WorkflowContext>) -> Result<FanOutOutcome, StepError> {
        self.advance(&[StepState::Validated], StepState::Running)
            .map_err(|state| StepError::NotValidated {
                step: self.name.clone(),
                state: state.to_string(),
            })?;
        info!(step = %self.name, kind = self.kind(), "running step");

        let result = self.action.run(&self.name, ctx).await;
        let to = match &result {
            Ok(FanOutOutcome::Completed) => StepState::Succeeded,
            Ok(FanOutOutcome::Cancelled) => StepState::Cancelled,
            Err(_) => StepState::Failed,
        };
        let _ = self.advance(&[StepState::Running], to);
        result
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("depends_on", &self.depends_on)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::DryRunClient;

    fn context() -> Arc<WorkflowContext> {
        Arc::new(
            WorkflowContext::new("wf", "proj", "zone-a", Arc::new(DryRunClient::new()))
                .with_run_id("abcde"),
        )
    }

    fn data_disk(name: &str) -> CreateDisk {
        CreateDisk {
            name: name.to_string(),
            size_gb: Some("10".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_step_lifecycle() {
        let ctx = context();
        let step = Step::new("disks", Box::new(CreateDisks(vec![data_disk("data")])));
        assert_eq!(step.state(), StepState::Created);

        step.validate(&ctx).unwrap();
        assert_eq!(step.state(), StepState::Validated);

        // Revalidating must not re-reserve names.
        step.validate(&ctx).unwrap();

        let outcome = step.run(&ctx).await.unwrap();
        assert_eq!(outcome, FanOutOutcome::Completed);
        assert_eq!(step.state(), StepState::Succeeded);
    }

    #[tokio::test]
    async fn test_run_requires_validation() {
        let ctx = context();
        let step = Step::new("disks", Box::new(CreateDisks(vec![data_disk("data")])));

        let err = step.run(&ctx).await.unwrap_err();
        assert!(matches!(err, StepError::NotValidated { ref state, .. } if state == "created"));
        assert!(ctx.registry(crate::workflow::ResourceKind::Disk).is_empty());
    }

    #[tokio::test]
    async fn test_failed_validation_state() {
        let ctx = context();
        let step = Step::new(
            "disks",
            Box::new(CreateDisks(vec![data_disk("data"), data_disk("data")])),
        );

        assert!(step.validate(&ctx).is_err());
        assert_eq!(step.state(), StepState::ValidationFailed);
    }

    #[tokio::test]
    async fn test_finished_step_cannot_validate_again() {
        let ctx = context();
        let step = Step::new("disks", Box::new(CreateDisks(vec![data_disk("data")])));
        step.validate(&ctx).unwrap();
        step.run(&ctx).await.unwrap();

        let err = step.validate(&ctx).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidState { ref state, .. } if state == "succeeded"
        ));
        assert_eq!(step.state(), StepState::Succeeded);
        assert!(matches!(
            step.run(&ctx).await,
            Err(StepError::NotValidated { ref state, .. }) if state == "succeeded"
        ));
    }

    #[test]
    fn test_failed_validation_is_final() {
        let ctx = context();
        let step = Step::new(
            "disks",
            Box::new(CreateDisks(vec![data_disk("data"), data_disk("data")])),
        );
        assert!(step.validate(&ctx).is_err());

        assert!(matches!(
            step.validate(&ctx),
            Err(ValidationError::InvalidState { ref state, .. }) if state == "validation-failed"
        ));
        assert_eq!(step.state(), StepState::ValidationFailed);
    }

    #[tokio::test]
    async fn test_cancelled_step_state() {
        let ctx = context();
        let step = Step::new("disks", Box::new(CreateDisks(vec![data_disk("data")])));
        step.validate(&ctx).unwrap();
        ctx.cancel();

        let outcome = step.run(&ctx).await.unwrap();
        assert_eq!(outcome, FanOutOutcome::Cancelled);
        assert_eq!(step.state(), StepState::Cancelled);
        assert!(ctx.registry(crate::workflow::ResourceKind::Disk).is_empty());
    }
}
