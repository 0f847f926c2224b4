//! The `delete_resources` step
//!
//! Instances go first since they hold their disks; disks and images are then
//! deleted together. Resources deleted here are flagged in their registry so
//! the end-of-workflow cleanup leaves them alone.

use super::fanout::{fan_out, FanOutOutcome, SubOperation};
use super::{StepAction, ValidationScope};
use crate::compute::ResourceHandle;
use crate::error::{StepError, ValidationError};
use crate::workflow::context::WorkflowContext;
use crate::workflow::reference::{disk_refs, image_refs, instance_refs, ResourceRef};
use crate::workflow::registry::ResourceKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteResources {
    #[serde(default, deserialize_with = "instance_refs")]
    pub instances: Vec<ResourceRef>,
    #[serde(default, deserialize_with = "image_refs")]
    pub images: Vec<ResourceRef>,
    #[serde(default, deserialize_with = "disk_refs")]
    pub disks: Vec<ResourceRef>,
}

#[derive(Debug, Clone)]
struct Deletion {
    kind: ResourceKind,
    target: ResourceRef,
}

impl DeleteResources {
    fn targets(&self) -> impl Iterator<Item = (ResourceKind, &ResourceRef)> {
        let instances = self.instances.iter().map(|r| (ResourceKind::Instance, r));
        let images = self.images.iter().map(|r| (ResourceKind::Image, r));
        let disks = self.disks.iter().map(|r| (ResourceKind::Disk, r));
        instances.chain(images).chain(disks)
    }

    fn deletions(refs: &[ResourceRef], kind: ResourceKind) -> Vec<Deletion> {
        refs.iter()
            .map(|target| Deletion {
                kind,
                target: target.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl SubOperation for Deletion {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn logical_name(&self) -> &str {
        self.target.as_str()
    }

    async fn execute(&self, ctx: &WorkflowContext) -> Result<(), StepError> {
        let registry = ctx.registry(self.kind);
        let handle = match &self.target {
            ResourceRef::Url(link) => ResourceHandle::from_link(self.kind, link),
            ResourceRef::Logical(name) => registry
                .lookup(name)
                .map(|resource| resource.handle)
                .ok_or_else(|| StepError::UnresolvedReference {
                    kind: self.kind,
                    name: name.clone(),
                    reference_kind: self.kind,
                    reference: name.clone(),
                })?,
        };

        info!(link = %handle.self_link, "deleting {}", self.kind);
        match ctx.compute().delete_resource(&handle).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                warn!(link = %handle.self_link, "{} already gone", self.kind);
            }
            Err(source) => {
                return Err(StepError::Backend {
                    kind: self.kind,
                    name: self.target.as_str().to_string(),
                    source,
                })
            }
        }

        if let ResourceRef::Logical(name) = &self.target {
            registry.mark_deleted(name);
        }
        Ok(())
    }
}

#[async_trait]
impl StepAction for DeleteResources {
    fn kind(&self) -> &'static str {
        "delete_resources"
    }

    fn validate(&self, scope: &ValidationScope<'_>) -> Result<(), ValidationError> {
        if self.targets().next().is_none() {
            return Err(ValidationError::MissingField {
                name: self.kind().to_string(),
                fields: vec!["instances", "images", "disks"],
            });
        }

        for (kind, target) in self.targets() {
            if let ResourceRef::Logical(name) = target {
                scope.claim_deletion(kind, name)?;
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        step: &str,
        ctx: &Arc<WorkflowContext>,
    ) -> Result<FanOutOutcome, StepError> {
        let instances = Self::deletions(&self.instances, ResourceKind::Instance);
        if fan_out(step, ctx, instances).await? == FanOutOutcome::Cancelled {
            return Ok(FanOutOutcome::Cancelled);
        }

        let mut rest = Self::deletions(&self.images, ResourceKind::Image);
        rest.extend(Self::deletions(&self.disks, ResourceKind::Disk));
        fan_out(step, ctx, rest).await
    }
}
