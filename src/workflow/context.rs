//! Shared state of one workflow run
//!
//! The context is created once per run, wrapped in an `Arc` and handed to
//! every step and every sub-operation task.

use crate::compute::ComputeClient;
use crate::workflow::naming::{generate_run_id, NameGenerator};
use crate::workflow::registry::{Registries, ResourceKind, ResourceRegistry};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

pub struct WorkflowContext {
    name: String,
    project: String,
    zone: String,
    username: String,
    naming: NameGenerator,
    registries: Registries,
    compute: Arc<dyn ComputeClient>,
    cancel: CancellationToken,
    operation_slots: Option<Arc<Semaphore>>,
}

impl WorkflowContext {
    pub fn new(
        name: impl Into<String>,
        project: impl Into<String>,
        zone: impl Into<String>,
        compute: Arc<dyn ComputeClient>,
    ) -> Self {
        let name = name.into();
        Self {
            naming: NameGenerator::new(name.clone(), generate_run_id()),
            name,
            project: project.into(),
            zone: zone.into(),
            username: whoami::username(),
            registries: Registries::new(),
            compute,
            cancel: CancellationToken::new(),
            operation_slots: None,
        }
    }

    /// Use a fixed run id instead of a random one
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.naming = NameGenerator::new(self.name.clone(), run_id);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Share an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Bound the number of sub-operations in flight across all steps; 0 lifts the bound
    pub fn with_max_concurrent_operations(mut self, limit: usize) -> Self {
        self.operation_slots = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_id(&self) -> &str {
        self.naming.run_id()
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn naming(&self) -> &NameGenerator {
        &self.naming
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn registry(&self, kind: ResourceKind) -> &ResourceRegistry {
        self.registries.get(kind)
    }

    pub fn compute(&self) -> &dyn ComputeClient {
        self.compute.as_ref()
    }

    /// Per-operation project override, falling back to the workflow default
    pub fn resolve_project<'a>(&'a self, project: Option<&'a str>) -> &'a str {
        project.filter(|p| !p.is_empty()).unwrap_or(&self.project)
    }

    /// Per-operation zone override, falling back to the workflow default
    pub fn resolve_zone<'a>(&'a self, zone: Option<&'a str>) -> &'a str {
        zone.filter(|z| !z.is_empty()).unwrap_or(&self.zone)
    }

    /// Description used when a sub-operation does not provide one
    pub fn default_description(&self, kind: ResourceKind) -> String {
        let kind = kind.as_str();
        let mut label = kind[..1].to_uppercase();
        label.push_str(&kind[1..]);
        format!(
            "{} created by cloudflow in workflow {:?} on behalf of {}.",
            label, self.name, self.username
        )
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal every step of this run to stop starting new work
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for a concurrency slot; `None` when the run is unbounded
    pub async fn acquire_operation_slot(&self) -> Option<OwnedSemaphorePermit> {
        match &self.operation_slots {
            Some(slots) => Arc::clone(slots).acquire_owned().await.ok(),
            None => None,
        }
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("name", &self.name)
            .field("run_id", &self.run_id())
            .field("project", &self.project)
            .field("zone", &self.zone)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::DryRunClient;

    fn context() -> WorkflowContext {
        WorkflowContext::new("build", "proj", "zone-a", Arc::new(DryRunClient::new()))
            .with_username("alice")
            .with_run_id("abcde")
    }

    #[test]
    fn test_overrides_fall_back_to_defaults() {
        let ctx = context();
        assert_eq!(ctx.resolve_project(None), "proj");
        assert_eq!(ctx.resolve_project(Some("")), "proj");
        assert_eq!(ctx.resolve_project(Some("other")), "other");
        assert_eq!(ctx.resolve_zone(Some("zone-b")), "zone-b");
    }

    #[test]
    fn test_default_description() {
        let ctx = context();
        assert_eq!(
            ctx.default_description(ResourceKind::Disk),
            "Disk created by cloudflow in workflow \"build\" on behalf of alice."
        );
    }

    #[test]
    fn test_cancellation_is_level_triggered() {
        let ctx = context();
        let token = ctx.cancellation_token();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_operation_slots_are_bounded() {
        let ctx = context().with_max_concurrent_operations(1);
        let first = ctx.acquire_operation_slot().await;
        assert!(first.is_some());

        let second = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            ctx.acquire_operation_slot(),
        )
        .await;
        assert!(second.is_err());

        drop(first);
        assert!(ctx.acquire_operation_slot().await.is_some());
    }
}
