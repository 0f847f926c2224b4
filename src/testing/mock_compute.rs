//! Recording compute backend for tests

use crate::compute::{ComputeClient, DiskRequest, ImageRequest, InstanceRequest, ResourceHandle};
use crate::error::BackendError;
use crate::workflow::registry::ResourceKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A backend call as the mock received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateDisk(DiskRequest),
    CreateImage(ImageRequest),
    CreateInstance(InstanceRequest),
    Delete(ResourceHandle),
}

impl BackendCall {
    /// Physical name the call targets
    pub fn name(&self) -> &str {
        match self {
            BackendCall::CreateDisk(request) => &request.name,
            BackendCall::CreateImage(request) => &request.name,
            BackendCall::CreateInstance(request) => &request.name,
            BackendCall::Delete(handle) => &handle.name,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, BackendCall::Delete(_))
    }
}

/// Mock implementation of [`ComputeClient`]
///
/// Clones share state, so a test can keep one clone and hand another to the
/// workflow.
#[derive(Clone, Default)]
pub struct MockComputeClient {
    calls: Arc<Mutex<Vec<BackendCall>>>,
    failures: Arc<Mutex<HashMap<String, BackendError>>>,
    delete_failures: Arc<Mutex<HashMap<String, BackendError>>>,
    gate: Option<Arc<Semaphore>>,
}

fn matching_failure(
    failures: &Mutex<HashMap<String, BackendError>>,
    name: &str,
) -> Option<BackendError> {
    lock(failures).get(name).cloned()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockComputeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every create call open until [`release`](Self::release) is called
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Fail calls whose physical name is exactly `name`
    pub fn with_failure(self, name: &str, error: BackendError) -> Self {
        self.fail_on(name, error);
        self
    }

    pub fn fail_on(&self, name: &str, error: BackendError) {
        lock(&self.failures).insert(name.to_string(), error);
    }

    /// Fail only deletions of `name`, matched like [`fail_on`](Self::fail_on)
    pub fn with_delete_failure(self, name: &str, error: BackendError) -> Self {
        lock(&self.delete_failures).insert(name.to_string(), error);
        self
    }

    /// Let `count` gated create calls proceed
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn disk_requests(&self) -> Vec<DiskRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::CreateDisk(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<ResourceHandle> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Delete(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// Poll until at least `count` calls have been received
    pub async fn wait_for_calls(&self, count: usize) {
        while self.call_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn failure_for(&self, name: &str) -> Option<BackendError> {
        matching_failure(&self.failures, name)
    }

    async fn create(
        &self,
        call: BackendCall,
        handle: ResourceHandle,
    ) -> Result<ResourceHandle, BackendError> {
        let name = call.name().to_string();
        lock(&self.calls).push(call);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        match self.failure_for(&name) {
            Some(error) => Err(error),
            None => Ok(handle),
        }
    }
}

#[async_trait]
impl ComputeClient for MockComputeClient {
    async fn create_disk(&self, request: &DiskRequest) -> Result<ResourceHandle, BackendError> {
        let handle = ResourceHandle::new(
            ResourceKind::Disk,
            &request.name,
            &request.project,
            Some(&request.zone),
        )?;
        self.create(BackendCall::CreateDisk(request.clone()), handle)
            .await
    }

    async fn create_image(
        &self,
        request: &ImageRequest,
    ) -> Result<ResourceHandle, BackendError> {
        let handle =
            ResourceHandle::new(ResourceKind::Image, &request.name, &request.project, None)?;
        self.create(BackendCall::CreateImage(request.clone()), handle)
            .await
    }

    async fn create_instance(
        &self,
        request: &InstanceRequest,
    ) -> Result<ResourceHandle, BackendError> {
        let handle = ResourceHandle::new(
            ResourceKind::Instance,
            &request.name,
            &request.project,
            Some(&request.zone),
        )?;
        self.create(BackendCall::CreateInstance(request.clone()), handle)
            .await
    }

    async fn delete_resource(&self, handle: &ResourceHandle) -> Result<(), BackendError> {
        lock(&self.calls).push(BackendCall::Delete(handle.clone()));
        let failure = matching_failure(&self.delete_failures, &handle.name)
            .or_else(|| self.failure_for(&handle.name));
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(name: &str) -> DiskRequest {
        DiskRequest {
            name: name.to_string(),
            project: "p".to_string(),
            zone: "z".to_string(),
            source_image: None,
            size_gb: Some(1),
            disk_type: None,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_failure_matches_exact_physical_name() {
        let mock = MockComputeClient::new().with_failure(
            "boot-wf-abcde",
            BackendError::Api {
                code: 500,
                message: "boom".to_string(),
            },
        );

        assert!(mock.create_disk(&disk("boot-wf-abcde")).await.is_err());
        assert!(mock.create_disk(&disk("boot-disk-wf-abcde")).await.is_ok());
        assert!(mock.create_disk(&disk("boot")).await.is_ok());
        assert_eq!(mock.disk_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_gate_holds_calls() {
        let mock = MockComputeClient::gated();
        let pending = tokio::spawn({
            let mock = mock.clone();
            async move { mock.create_disk(&disk("data")).await }
        });

        mock.wait_for_calls(1).await;
        assert!(!pending.is_finished());

        mock.release(1);
        assert!(pending.await.unwrap().is_ok());
    }
}
