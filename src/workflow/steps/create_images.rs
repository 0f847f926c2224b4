//! The `create_images` step

use super::fanout::{fan_out, FanOutOutcome, SubOperation};
use super::{StepAction, ValidationScope};
use crate::compute::ImageRequest;
use crate::error::{StepError, ValidationError};
use crate::workflow::context::WorkflowContext;
use crate::workflow::reference::{optional_disk_ref, ResourceRef};
use crate::workflow::registry::{ResourceKind, TrackedResource};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct CreateImages(pub Vec<CreateImage>);

/// One image to create, from a disk or from an archive in storage
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateImage {
    pub name: String,
    #[serde(default, deserialize_with = "optional_disk_ref")]
    pub source_disk: Option<ResourceRef>,
    /// Location of a raw disk archive, e.g. `gs://bucket/disk.tar.gz`
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub licenses: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub no_cleanup: bool,
    #[serde(default)]
    pub exact_name: bool,
}

impl CreateImage {
    fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref().filter(|f| !f.is_empty())
    }

    fn validate(&self, scope: &ValidationScope<'_>) -> Result<(), ValidationError> {
        if let Some(ResourceRef::Logical(disk)) = &self.source_disk {
            scope.require(ResourceKind::Disk, &self.name, disk)?;
        }

        match (&self.source_disk, self.source_file()) {
            (None, None) => {
                return Err(ValidationError::MissingField {
                    name: self.name.clone(),
                    fields: vec!["source_disk", "source_file"],
                })
            }
            (Some(_), Some(_)) => {
                return Err(ValidationError::ConflictingFields {
                    name: self.name.clone(),
                    fields: vec!["source_disk", "source_file"],
                })
            }
            _ => {}
        }

        scope.reserve(ResourceKind::Image, &self.name)
    }

    fn resolve_source_disk(&self, ctx: &WorkflowContext) -> Result<Option<String>, StepError> {
        match &self.source_disk {
            None => Ok(None),
            Some(ResourceRef::Url(url)) => Ok(Some(url.clone())),
            Some(ResourceRef::Logical(disk)) => ctx
                .registry(ResourceKind::Disk)
                .lookup(disk)
                .map(|resource| Some(resource.link().to_string()))
                .ok_or_else(|| StepError::UnresolvedReference {
                    kind: ResourceKind::Image,
                    name: self.name.clone(),
                    reference_kind: ResourceKind::Disk,
                    reference: disk.clone(),
                }),
        }
    }
}

#[async_trait]
impl SubOperation for CreateImage {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }

    fn logical_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &WorkflowContext) -> Result<(), StepError> {
        let request = ImageRequest {
            name: ctx.naming().physical_name(&self.name, self.exact_name),
            project: ctx.resolve_project(self.project.as_deref()).to_string(),
            source_disk: self.resolve_source_disk(ctx)?,
            source_file: self.source_file().map(str::to_string),
            family: self.family.clone().filter(|f| !f.is_empty()),
            licenses: self.licenses.clone(),
            description: self
                .description
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| ctx.default_description(ResourceKind::Image)),
        };

        info!(name = %request.name, "creating image");
        let handle = ctx
            .compute()
            .create_image(&request)
            .await
            .map_err(|source| StepError::Backend {
                kind: ResourceKind::Image,
                name: self.name.clone(),
                source,
            })?;

        ctx.registry(ResourceKind::Image)
            .insert(TrackedResource::new(&self.name, handle, self.no_cleanup));
        Ok(())
    }
}

#[async_trait]
impl StepAction for CreateImages {
    fn kind(&self) -> &'static str {
        "create_images"
    }

    fn validate(&self, scope: &ValidationScope<'_>) -> Result<(), ValidationError> {
        self.0.iter().try_for_each(|image| image.validate(scope))
    }

    async fn run(
        &self,
        step: &str,
        ctx: &Arc<WorkflowContext>,
    ) -> Result<FanOutOutcome, StepError> {
        fan_out(step, ctx, self.0.clone()).await
    }
}
