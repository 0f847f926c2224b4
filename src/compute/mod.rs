//! Abstraction over the remote compute API
//!
//! Steps only talk to the backend through [`ComputeClient`], which keeps the
//! engine testable without cloud credentials. Retries and backoff belong to
//! implementations of this trait, never to the engine.

pub mod dry_run;

pub use dry_run::DryRunClient;

use crate::error::BackendError;
use crate::workflow::registry::ResourceKind;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

/// Prefix accepted in front of fully qualified resource links
pub const API_PREFIX: &str = "https://www.googleapis.com/compute/v1/";

/// Identifies a backend resource for later deletion or reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    /// Physical name on the backend
    pub name: String,
    pub project: String,
    /// Zone for zonal resources, `None` for global ones such as images
    pub zone: Option<String>,
    pub self_link: String,
}

impl ResourceHandle {
    /// Build a handle for a resource the backend just created.
    ///
    /// Images are global and ignore `zone`; disks and instances require one.
    pub fn new(
        kind: ResourceKind,
        name: &str,
        project: &str,
        zone: Option<&str>,
    ) -> Result<Self, BackendError> {
        let (path, zone) = match (kind, zone) {
            (ResourceKind::Image, _) => (format!("projects/{project}/global/images/{name}"), None),
            (ResourceKind::Disk, Some(zone)) => (
                format!("projects/{project}/zones/{zone}/disks/{name}"),
                Some(zone),
            ),
            (ResourceKind::Instance, Some(zone)) => (
                format!("projects/{project}/zones/{zone}/instances/{name}"),
                Some(zone),
            ),
            (ResourceKind::Disk | ResourceKind::Instance, None) => {
                return Err(BackendError::InvalidRequest(format!(
                    "{kind} {name:?} needs a zone"
                )))
            }
        };
        Ok(Self {
            kind,
            name: name.to_string(),
            project: project.to_string(),
            zone: zone.map(str::to_string),
            self_link: format!("{API_PREFIX}{path}"),
        })
    }

    /// Build a handle from a link to a resource this workflow did not create
    pub fn from_link(kind: ResourceKind, link: &str) -> Self {
        let path = link.strip_prefix(API_PREFIX).unwrap_or(link);
        let segments: Vec<&str> = path.split('/').collect();
        let segment_after = |key: &str| {
            segments
                .iter()
                .position(|s| *s == key)
                .and_then(|i| segments.get(i + 1))
                .map(|s| s.to_string())
        };

        Self {
            kind,
            name: segments.last().map(|s| s.to_string()).unwrap_or_default(),
            project: segment_after("projects").unwrap_or_default(),
            zone: segment_after("zones"),
            self_link: link.to_string(),
        }
    }
}

/// Parameters for a disk creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskRequest {
    pub name: String,
    pub project: String,
    pub zone: String,
    /// Image link to initialise the disk from; `None` creates a blank disk
    pub source_image: Option<String>,
    pub size_gb: Option<u64>,
    /// Backend default when `None`
    pub disk_type: Option<String>,
    pub description: String,
}

/// Parameters for an image creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRequest {
    pub name: String,
    pub project: String,
    pub source_disk: Option<String>,
    pub source_file: Option<String>,
    pub family: Option<String>,
    pub licenses: Vec<String>,
    pub description: String,
}

/// Parameters for an instance creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRequest {
    pub name: String,
    pub project: String,
    pub zone: String,
    pub machine_type: String,
    /// Disk links; the first one is the boot disk
    pub disks: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub description: String,
}

/// Narrow contract the engine needs from the compute API
#[async_trait]
pub trait ComputeClient: Send + Sync {
    async fn create_disk(&self, request: &DiskRequest) -> Result<ResourceHandle, BackendError>;

    async fn create_image(&self, request: &ImageRequest)
        -> Result<ResourceHandle, BackendError>;

    async fn create_instance(
        &self,
        request: &InstanceRequest,
    ) -> Result<ResourceHandle, BackendError>;

    /// Delete any resource previously returned by a create call
    async fn delete_resource(&self, handle: &ResourceHandle) -> Result<(), BackendError>;
}
