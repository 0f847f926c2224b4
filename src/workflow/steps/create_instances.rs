//! The `create_instances` step

use super::fanout::{fan_out, FanOutOutcome, SubOperation};
use super::{StepAction, ValidationScope};
use crate::compute::InstanceRequest;
use crate::error::{StepError, ValidationError};
use crate::workflow::context::WorkflowContext;
use crate::workflow::reference::{disk_refs, ResourceRef};
use crate::workflow::registry::{ResourceKind, TrackedResource};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct CreateInstances(pub Vec<CreateInstance>);

/// One instance to create from existing disks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateInstance {
    pub name: String,
    /// Disks to attach; the first one boots the instance
    #[serde(default, deserialize_with = "disk_refs")]
    pub disks: Vec<ResourceRef>,
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub no_cleanup: bool,
    #[serde(default)]
    pub exact_name: bool,
}

impl CreateInstance {
    fn validate(&self, scope: &ValidationScope<'_>) -> Result<(), ValidationError> {
        if self.disks.is_empty() {
            return Err(ValidationError::MissingField {
                name: self.name.clone(),
                fields: vec!["disks"],
            });
        }

        for disk in &self.disks {
            if let ResourceRef::Logical(disk) = disk {
                scope.require(ResourceKind::Disk, &self.name, disk)?;
            }
        }

        scope.reserve(ResourceKind::Instance, &self.name)
    }

    fn resolve_disks(&self, ctx: &WorkflowContext) -> Result<Vec<String>, StepError> {
        let registry = ctx.registry(ResourceKind::Disk);
        self.disks
            .iter()
            .map(|disk| match disk {
                ResourceRef::Url(url) => Ok(url.clone()),
                ResourceRef::Logical(name) => registry
                    .lookup(name)
                    .map(|resource| resource.link().to_string())
                    .ok_or_else(|| StepError::UnresolvedReference {
                        kind: ResourceKind::Instance,
                        name: self.name.clone(),
                        reference_kind: ResourceKind::Disk,
                        reference: name.clone(),
                    }),
            })
            .collect()
    }
}

#[async_trait]
impl SubOperation for CreateInstance {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Instance
    }

    fn logical_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &WorkflowContext) -> Result<(), StepError> {
        let request = InstanceRequest {
            name: ctx.naming().physical_name(&self.name, self.exact_name),
            project: ctx.resolve_project(self.project.as_deref()).to_string(),
            zone: ctx.resolve_zone(self.zone.as_deref()).to_string(),
            machine_type: self
                .machine_type
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MACHINE_TYPE.to_string()),
            disks: self.resolve_disks(ctx)?,
            metadata: self.metadata.clone(),
            description: self
                .description
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| ctx.default_description(ResourceKind::Instance)),
        };

        info!(
            name = %request.name,
            zone = %request.zone,
            machine_type = %request.machine_type,
            "creating instance"
        );
        let handle = ctx
            .compute()
            .create_instance(&request)
            .await
            .map_err(|source| StepError::Backend {
                kind: ResourceKind::Instance,
                name: self.name.clone(),
                source,
            })?;

        ctx.registry(ResourceKind::Instance)
            .insert(TrackedResource::new(&self.name, handle, self.no_cleanup));
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateInstances {
    fn kind(&self) -> &'static str {
        "create_instances"
    }

    fn validate(&self, scope: &ValidationScope<'_>) -> Result<(), ValidationError> {
        self.0.iter().try_for_each(|instance| instance.validate(scope))
    }

    async fn run(
        &self,
        step: &str,
        ctx: &Arc<WorkflowContext>,
    ) -> Result<FanOutOutcome, StepError> {
        fan_out(step, ctx, self.0.clone()).await
    }
}
