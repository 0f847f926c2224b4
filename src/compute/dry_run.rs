//! Backend that performs no remote calls
//!
//! Used by `cloudflow dry-run` to exercise a workflow end to end: every call
//! is logged, optionally delayed, and answered with a synthetic handle.

use super::{ComputeClient, DiskRequest, ImageRequest, InstanceRequest, ResourceHandle};
use crate::error::BackendError;
use crate::workflow::registry::ResourceKind;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct DryRunClient {
    latency: Option<Duration>,
}

impl DryRunClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate API latency on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency).filter(|d| !d.is_zero());
        self
    }

    async fn simulate(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ComputeClient for DryRunClient {
    async fn create_disk(&self, request: &DiskRequest) -> Result<ResourceHandle, BackendError> {
        info!(
            name = %request.name,
            project = %request.project,
            zone = %request.zone,
            source_image = request.source_image.as_deref().unwrap_or(""),
            size_gb = request.size_gb,
            "[dry-run] create disk"
        );
        self.simulate().await;
        ResourceHandle::new(
            ResourceKind::Disk,
            &request.name,
            &request.project,
            Some(&request.zone),
        )
    }

    async fn create_image(
        &self,
        request: &ImageRequest,
    ) -> Result<ResourceHandle, BackendError> {
        info!(
            name = %request.name,
            project = %request.project,
            source_disk = request.source_disk.as_deref().unwrap_or(""),
            source_file = request.source_file.as_deref().unwrap_or(""),
            "[dry-run] create image"
        );
        self.simulate().await;
        ResourceHandle::new(ResourceKind::Image, &request.name, &request.project, None)
    }

    async fn create_instance(
        &self,
        request: &InstanceRequest,
    ) -> Result<ResourceHandle, BackendError> {
        info!(
            name = %request.name,
            project = %request.project,
            zone = %request.zone,
            machine_type = %request.machine_type,
            disks = request.disks.len(),
            "[dry-run] create instance"
        );
        self.simulate().await;
        ResourceHandle::new(
            ResourceKind::Instance,
            &request.name,
            &request.project,
            Some(&request.zone),
        )
    }

    async fn delete_resource(&self, handle: &ResourceHandle) -> Result<(), BackendError> {
        info!(kind = %handle.kind, link = %handle.self_link, "[dry-run] delete");
        self.simulate().await;
        Ok(())
    }
}
