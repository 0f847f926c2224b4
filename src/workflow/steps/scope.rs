//! What a step may see while it validates
//!
//! A logical reference resolves only to a name created by a step that runs
//! strictly before the referencing step. Steps in the same level run
//! concurrently, so their names are invisible to each other.

use crate::error::ValidationError;
use crate::workflow::context::WorkflowContext;
use crate::workflow::registry::ResourceKind;
use std::collections::HashSet;

/// Registry access for one step's validation
#[derive(Debug, Clone, Copy)]
pub struct ValidationScope<'a> {
    ctx: &'a WorkflowContext,
    step: Option<&'a str>,
    upstream: Option<&'a HashSet<String>>,
}

impl<'a> ValidationScope<'a> {
    /// Validate outside any workflow graph; every reserved name is visible
    pub fn detached(ctx: &'a WorkflowContext) -> Self {
        Self {
            ctx,
            step: None,
            upstream: None,
        }
    }

    /// Validate as `step`, which runs after every step in `upstream`
    pub fn for_step(
        ctx: &'a WorkflowContext,
        step: &'a str,
        upstream: &'a HashSet<String>,
    ) -> Self {
        Self {
            ctx,
            step: Some(step),
            upstream: Some(upstream),
        }
    }

    pub fn context(&self) -> &'a WorkflowContext {
        self.ctx
    }

    pub fn step(&self) -> Option<&'a str> {
        self.step
    }

    /// Whether step `other` finishes before this one starts
    pub fn runs_before(&self, other: &str) -> bool {
        match (self.step, self.upstream) {
            (Some(step), _) if step == other => false,
            (_, Some(upstream)) => upstream.contains(other),
            (_, None) => true,
        }
    }

    /// Reserve `name` as created by this step
    pub fn reserve(&self, kind: ResourceKind, name: &str) -> Result<(), ValidationError> {
        self.ctx.registry(kind).reserve_for(name, self.step)
    }

    /// Resolve a logical reference made by sub-operation `referenced_by`
    pub fn require(
        &self,
        kind: ResourceKind,
        referenced_by: &str,
        reference: &str,
    ) -> Result<(), ValidationError> {
        self.ctx
            .registry(kind)
            .use_reference(reference, referenced_by, self.step, |owner| {
                self.runs_before(owner)
            })
    }

    /// Claim `name` for deletion by this step
    pub fn claim_deletion(&self, kind: ResourceKind, name: &str) -> Result<(), ValidationError> {
        self.ctx
            .registry(kind)
            .claim_deletion(name, self.step, |other| self.runs_before(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::DryRunClient;
    use std::sync::Arc;

    fn context() -> WorkflowContext {
        WorkflowContext::new("wf", "proj", "zone-a", Arc::new(DryRunClient::new()))
    }

    fn reserve_as(ctx: &WorkflowContext, step: &str, name: &str) {
        ctx.registry(ResourceKind::Disk)
            .reserve_for(name, Some(step))
            .unwrap();
    }

    #[test]
    fn test_only_upstream_names_are_visible() {
        let ctx = context();
        let none = HashSet::new();
        let upstream: HashSet<String> = ["disks".to_string()].into();

        reserve_as(&ctx, "disks", "boot");
        reserve_as(&ctx, "sibling", "data");

        let vm = ValidationScope::for_step(&ctx, "vm", &upstream);
        vm.require(ResourceKind::Disk, "vm", "boot").unwrap();
        assert!(matches!(
            vm.require(ResourceKind::Disk, "vm", "data"),
            Err(ValidationError::UnresolvedReference { ref reference, .. }) if reference == "data"
        ));

        let root = ValidationScope::for_step(&ctx, "root", &none);
        assert!(root.require(ResourceKind::Disk, "root", "boot").is_err());
    }

    #[test]
    fn test_own_names_are_not_visible() {
        let ctx = context();
        let upstream = HashSet::new();
        let scope = ValidationScope::for_step(&ctx, "disks", &upstream);

        scope.reserve(ResourceKind::Disk, "boot").unwrap();
        assert!(!scope.runs_before("disks"));
        assert!(scope.require(ResourceKind::Disk, "copy", "boot").is_err());
    }

    #[test]
    fn test_detached_scope_sees_everything() {
        let ctx = context();
        reserve_as(&ctx, "disks", "boot");

        let scope = ValidationScope::detached(&ctx);
        assert!(scope.runs_before("anything"));
        scope.require(ResourceKind::Disk, "vm", "boot").unwrap();
    }
}
