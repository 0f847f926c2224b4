//! End-of-workflow deletion of tracked resources
//!
//! Runs after every workflow execution, whether it succeeded, failed or was
//! cancelled. Cleanup itself ignores cancellation: it is what a cancelled
//! run relies on to leave nothing behind.

use crate::error::BackendError;
use crate::workflow::context::WorkflowContext;
use crate::workflow::registry::{ResourceKind, TrackedResource};
use futures::future::join_all;
use tracing::{debug, error, info};

/// A resource cleanup could not delete
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    pub kind: ResourceKind,
    pub logical_name: String,
    pub link: String,
    pub error: BackendError,
}

/// Outcome of a cleanup pass
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// `(kind, logical name)` of every resource deleted
    pub deleted: Vec<(ResourceKind, String)>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

async fn delete_tracked(
    ctx: &WorkflowContext,
    resource: &TrackedResource,
) -> Result<(), BackendError> {
    match ctx.compute().delete_resource(&resource.handle).await {
        Err(err) if err.is_not_found() => {
            debug!(link = %resource.link(), "already deleted");
            Ok(())
        }
        other => other,
    }
}

/// Delete every tracked resource that is neither kept nor already deleted.
///
/// Instances go first, then images, then disks. Resources of one kind are
/// deleted concurrently. Failures are collected, never fatal.
pub async fn cleanup_resources(ctx: &WorkflowContext) -> CleanupReport {
    let mut report = CleanupReport::default();

    for kind in ResourceKind::CLEANUP_ORDER {
        let registry = ctx.registry(kind);
        let pending = registry.pending_cleanup();
        if pending.is_empty() {
            continue;
        }

        info!(kind = %kind, count = pending.len(), "cleaning up");
        let results = join_all(
            pending
                .iter()
                .map(|resource| delete_tracked(ctx, resource)),
        )
        .await;

        for (resource, result) in pending.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    registry.mark_deleted(&resource.logical_name);
                    report.deleted.push((kind, resource.logical_name));
                }
                Err(err) => {
                    error!(
                        kind = %kind,
                        name = %resource.logical_name,
                        "cleanup failed: {}",
                        err
                    );
                    report.failures.push(CleanupFailure {
                        kind,
                        link: resource.link().to_string(),
                        logical_name: resource.logical_name,
                        error: err,
                    });
                }
            }
        }
    }

    report
}
