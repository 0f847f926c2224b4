//! Per-workflow registries of reserved names and created resources
//!
//! Each resource kind gets its own [`ResourceRegistry`]. Names are reserved
//! during validation, before any backend call, so collisions surface early.
//! Resources are inserted by the run phase on the same task that created
//! them, keyed by logical name.

use crate::compute::ResourceHandle;
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error};

/// Kinds of compute resources a workflow tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Disk,
    Image,
    Instance,
}

impl ResourceKind {
    /// Kinds in the order cleanup deletes them
    pub const CLEANUP_ORDER: [ResourceKind; 3] =
        [ResourceKind::Instance, ResourceKind::Image, ResourceKind::Disk];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Disk => "disk",
            ResourceKind::Image => "image",
            ResourceKind::Instance => "instance",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource created by this workflow run
#[derive(Debug, Clone, Serialize)]
pub struct TrackedResource {
    /// Name the workflow refers to the resource by
    pub logical_name: String,
    /// Name the backend knows the resource by
    pub physical_name: String,
    /// Backend handle, including the self-link
    pub handle: ResourceHandle,
    /// Survives end-of-workflow cleanup
    pub no_cleanup: bool,
    /// Set once the backend resource has been deleted
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl TrackedResource {
    pub fn new(
        logical_name: impl Into<String>,
        handle: ResourceHandle,
        no_cleanup: bool,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            physical_name: handle.name.clone(),
            handle,
            no_cleanup,
            deleted: false,
            created_at: Utc::now(),
        }
    }

    /// Backend-addressable link for references from other resources
    pub fn link(&self) -> &str {
        &self.handle.self_link
    }
}

/// Who declared a name and which steps depend on it
#[derive(Debug, Default)]
struct Reservation {
    /// Step that creates the resource; `None` when reserved outside a workflow graph
    owner: Option<String>,
    /// Steps whose sub-operations reference the resource
    users: Vec<String>,
    /// Step that deletes the resource, once claimed
    deleted_by: Option<Option<String>>,
}

/// Logical-name registry for one resource kind within one workflow
#[derive(Debug)]
pub struct ResourceRegistry {
    kind: ResourceKind,
    reservations: Mutex<HashMap<String, Reservation>>,
    resources: RwLock<HashMap<String, TrackedResource>>,
}

impl ResourceRegistry {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            reservations: Mutex::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn reservations(&self) -> MutexGuard<'_, HashMap<String, Reservation>> {
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a name that no step owns, visible to every step
    pub fn reserve(&self, name: &str) -> Result<(), ValidationError> {
        self.reserve_for(name, None)
    }

    /// Reserve a logical name ahead of creation by step `owner`.
    ///
    /// Duplicate detection and insertion happen under one lock, so two
    /// callers racing on the same name see exactly one success.
    pub fn reserve_for(&self, name: &str, owner: Option<&str>) -> Result<(), ValidationError> {
        let mut reservations = self.reservations();
        if reservations.contains_key(name) {
            return Err(ValidationError::DuplicateName {
                kind: self.kind,
                name: name.to_string(),
            });
        }
        reservations.insert(
            name.to_string(),
            Reservation {
                owner: owner.map(str::to_string),
                ..Default::default()
            },
        );
        debug!(kind = %self.kind, name, owner, "reserved name");
        Ok(())
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reservations().contains_key(name)
    }

    /// Record that `user` references `name` from sub-operation `referenced_by`.
    ///
    /// The name must be owned by no step or by a step for which `runs_before`
    /// holds, and must not be claimed for deletion.
    pub fn use_reference<F>(
        &self,
        name: &str,
        referenced_by: &str,
        user: Option<&str>,
        runs_before: F,
    ) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> bool,
    {
        let mut reservations = self.reservations();
        let reservation = reservations
            .get_mut(name)
            .filter(|r| r.owner.as_deref().map_or(true, &runs_before))
            .ok_or_else(|| ValidationError::UnresolvedReference {
                kind: self.kind,
                name: referenced_by.to_string(),
                reference: name.to_string(),
            })?;

        if reservation.deleted_by.is_some() {
            return Err(ValidationError::AlreadyDeleted {
                kind: self.kind,
                name: name.to_string(),
            });
        }
        if let Some(user) = user {
            reservation.users.push(user.to_string());
        }
        Ok(())
    }

    /// Claim a reserved name for deletion by step `by`.
    ///
    /// The creating step and every step using the name must run before `by`.
    pub fn claim_deletion<F>(
        &self,
        name: &str,
        by: Option<&str>,
        runs_before: F,
    ) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> bool,
    {
        let mut reservations = self.reservations();
        let reservation = reservations
            .get_mut(name)
            .filter(|r| r.owner.as_deref().map_or(true, &runs_before))
            .ok_or_else(|| ValidationError::UnresolvedReference {
                kind: self.kind,
                name: name.to_string(),
                reference: name.to_string(),
            })?;

        if reservation.deleted_by.is_some() {
            return Err(ValidationError::AlreadyDeleted {
                kind: self.kind,
                name: name.to_string(),
            });
        }
        if let Some(user) = reservation
            .users
            .iter()
            .find(|user| !runs_before(user.as_str()))
        {
            return Err(ValidationError::InUse {
                kind: self.kind,
                name: name.to_string(),
                step: user.clone(),
            });
        }
        reservation.deleted_by = Some(by.map(str::to_string));
        Ok(())
    }

    /// Record a created resource under its logical name.
    ///
    /// The name must have been reserved, and each name is registered at
    /// most once; violating either is a bug in the calling step.
    pub fn insert(&self, resource: TrackedResource) {
        debug_assert!(
            self.is_reserved(&resource.logical_name),
            "{} {:?} inserted without reservation",
            self.kind,
            resource.logical_name
        );

        let mut resources = self
            .resources
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if resources.contains_key(&resource.logical_name) {
            error!(
                kind = %self.kind,
                name = %resource.logical_name,
                "resource registered twice, keeping the first record"
            );
            debug_assert!(false, "duplicate registration");
            return;
        }
        debug!(
            kind = %self.kind,
            name = %resource.logical_name,
            physical = %resource.physical_name,
            "registered resource"
        );
        resources.insert(resource.logical_name.clone(), resource);
    }

    /// Look up a live resource by logical name; deleted records are skipped
    pub fn lookup(&self, name: &str) -> Option<TrackedResource> {
        self.get(name).filter(|resource| !resource.deleted)
    }

    /// The record for `name`, including one already deleted
    pub fn get(&self, name: &str) -> Option<TrackedResource> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Flag a resource as deleted; returns false when it is unknown
    pub fn mark_deleted(&self, name: &str) -> bool {
        let mut resources = self
            .resources
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match resources.get_mut(name) {
            Some(resource) => {
                resource.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Resources that end-of-workflow cleanup still has to delete
    pub fn pending_cleanup(&self) -> Vec<TrackedResource> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| !r.no_cleanup && !r.deleted)
            .cloned()
            .collect()
    }

    /// All tracked resources, sorted by logical name
    pub fn snapshot(&self) -> Vec<TrackedResource> {
        let mut resources: Vec<_> = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        resources.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        resources
    }

    pub fn len(&self) -> usize {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The registries of one workflow, one per resource kind
#[derive(Debug)]
pub struct Registries {
    disks: ResourceRegistry,
    images: ResourceRegistry,
    instances: ResourceRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self {
            disks: ResourceRegistry::new(ResourceKind::Disk),
            images: ResourceRegistry::new(ResourceKind::Image),
            instances: ResourceRegistry::new(ResourceKind::Instance),
        }
    }

    pub fn get(&self, kind: ResourceKind) -> &ResourceRegistry {
        match kind {
            ResourceKind::Disk => &self.disks,
            ResourceKind::Image => &self.images,
            ResourceKind::Instance => &self.instances,
        }
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}
