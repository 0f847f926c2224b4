//! The `create_disks` step

use super::fanout::{fan_out, FanOutOutcome, SubOperation};
use super::{StepAction, ValidationScope};
use crate::compute::DiskRequest;
use crate::error::{StepError, ValidationError};
use crate::workflow::context::WorkflowContext;
use crate::workflow::document::optional_string_or_number;
use crate::workflow::reference::{optional_image_ref, ResourceRef};
use crate::workflow::registry::{ResourceKind, TrackedResource};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Creates a list of disks concurrently
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct CreateDisks(pub Vec<CreateDisk>);

/// One disk to create
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateDisk {
    /// Logical name of the disk
    pub name: String,
    /// Image to initialise the disk from; a blank disk when absent
    #[serde(
        default,
        alias = "source_reference",
        deserialize_with = "optional_image_ref"
    )]
    pub source_image: Option<ResourceRef>,
    /// Size in GB, as a decimal string
    #[serde(default, alias = "size", deserialize_with = "optional_string_or_number")]
    pub size_gb: Option<String>,
    /// Disk type such as `pd-ssd`; backend default when absent
    #[serde(default, alias = "type", alias = "kind_variant")]
    pub disk_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Overrides the workflow zone
    #[serde(default)]
    pub zone: Option<String>,
    /// Overrides the workflow project
    #[serde(default)]
    pub project: Option<String>,
    /// Keep the disk when the workflow cleans up
    #[serde(default)]
    pub no_cleanup: bool,
    /// Use `name` as the physical name
    #[serde(default)]
    pub exact_name: bool,
}

/// Parse an optional size field; empty counts as absent
pub(crate) fn parse_size(name: &str, raw: Option<&str>) -> Result<Option<u64>, ValidationError> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    let malformed = |reason: String| ValidationError::MalformedField {
        name: name.to_string(),
        field: "size_gb",
        value: raw.to_string(),
        reason,
    };

    match raw.parse::<u64>() {
        Ok(0) => Err(malformed("size must be positive".to_string())),
        Ok(size) => Ok(Some(size)),
        Err(err) => Err(malformed(err.to_string())),
    }
}

impl CreateDisk {
    fn validate(&self, scope: &ValidationScope<'_>) -> Result<(), ValidationError> {
        if let Some(ResourceRef::Logical(image)) = &self.source_image {
            scope.require(ResourceKind::Image, &self.name, image)?;
        }

        let size = parse_size(&self.name, self.size_gb.as_deref())?;

        if size.is_none() && self.source_image.is_none() {
            return Err(ValidationError::MissingField {
                name: self.name.clone(),
                fields: vec!["size_gb", "source_image"],
            });
        }

        scope.reserve(ResourceKind::Disk, &self.name)
    }

    fn resolve_source_image(&self, ctx: &WorkflowContext) -> Result<Option<String>, StepError> {
        match &self.source_image {
            None => Ok(None),
            Some(ResourceRef::Url(url)) => Ok(Some(url.clone())),
            Some(ResourceRef::Logical(image)) => ctx
                .registry(ResourceKind::Image)
                .lookup(image)
                .map(|resource| Some(resource.link().to_string()))
                .ok_or_else(|| StepError::UnresolvedReference {
                    kind: ResourceKind::Disk,
                    name: self.name.clone(),
                    reference_kind: ResourceKind::Image,
                    reference: image.clone(),
                }),
        }
    }
}

#[async_trait]
impl SubOperation for CreateDisk {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Disk
    }

    fn logical_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &WorkflowContext) -> Result<(), StepError> {
        let physical_name = ctx.naming().physical_name(&self.name, self.exact_name);
        let source_image = self.resolve_source_image(ctx)?;
        let size_gb = parse_size(&self.name, self.size_gb.as_deref()).map_err(|source| {
            StepError::InvalidInput {
                kind: ResourceKind::Disk,
                name: self.name.clone(),
                source,
            }
        })?;

        let request = DiskRequest {
            name: physical_name,
            project: ctx.resolve_project(self.project.as_deref()).to_string(),
            zone: ctx.resolve_zone(self.zone.as_deref()).to_string(),
            source_image,
            size_gb,
            disk_type: self.disk_type.clone().filter(|t| !t.is_empty()),
            description: self
                .description
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| ctx.default_description(ResourceKind::Disk)),
        };

        info!(name = %request.name, zone = %request.zone, "creating disk");
        let handle = ctx
            .compute()
            .create_disk(&request)
            .await
            .map_err(|source| StepError::Backend {
                kind: ResourceKind::Disk,
                name: self.name.clone(),
                source,
            })?;

        ctx.registry(ResourceKind::Disk)
            .insert(TrackedResource::new(&self.name, handle, self.no_cleanup));
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateDisks {
    fn kind(&self) -> &'static str {
        "create_disks"
    }

    fn validate(&self, scope: &ValidationScope<'_>) -> Result<(), ValidationError> {
        self.0.iter().try_for_each(|disk| disk.validate(scope))
    }

    async fn run(
        &self,
        step: &str,
        ctx: &Arc<WorkflowContext>,
    ) -> Result<FanOutOutcome, StepError> {
        fan_out(step, ctx, self.0.clone()).await
    }
}
