//! End-to-end workflow runs against a recording backend

use cloudflow::config::EngineConfig;
use cloudflow::error::{BackendError, StepError, ValidationError, WorkflowError};
use cloudflow::testing::{BackendCall, MockComputeClient};
use cloudflow::workflow::{
    ResourceKind, RunStatus, StepState, Workflow, WorkflowContext, WorkflowDocument,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const IMAGE_PIPELINE: &str = r#"
name: build
steps:
  disks:
    create_disks:
      - name: boot
        source_image: projects/debian-cloud/global/images/family/debian-12
      - name: data
        size_gb: 50
        no_cleanup: true
  image:
    create_images:
      - name: golden
        source_disk: boot
        family: golden
  vm:
    create_instances:
      - name: vm
        disks: [boot, data]
        machine_type: e2-small
dependencies:
  image: [disks]
  vm: [image]
"#;

fn workflow(mock: &MockComputeClient, yaml: &str) -> Workflow {
    let document = WorkflowDocument::from_yaml(yaml).unwrap();
    let context = WorkflowContext::new(
        document.name.clone(),
        "proj",
        "zone-a",
        Arc::new(mock.clone()),
    )
    .with_run_id("abcde")
    .with_username("alice");
    Workflow::new(context, document).unwrap()
}

fn kind_of(call: &BackendCall) -> (&'static str, ResourceKind) {
    match call {
        BackendCall::CreateDisk(_) => ("create", ResourceKind::Disk),
        BackendCall::CreateImage(_) => ("create", ResourceKind::Image),
        BackendCall::CreateInstance(_) => ("create", ResourceKind::Instance),
        BackendCall::Delete(handle) => ("delete", handle.kind),
    }
}

#[tokio::test]
async fn test_pipeline_creates_in_order_and_cleans_up() {
    let mock = MockComputeClient::new();
    let workflow = workflow(&mock, IMAGE_PIPELINE);

    assert_eq!(workflow.run().await.unwrap(), RunStatus::Succeeded);

    let calls: Vec<_> = mock.calls().iter().map(kind_of).collect();
    assert_eq!(
        calls,
        vec![
            ("create", ResourceKind::Disk),
            ("create", ResourceKind::Disk),
            ("create", ResourceKind::Image),
            ("create", ResourceKind::Instance),
            ("delete", ResourceKind::Instance),
            ("delete", ResourceKind::Image),
            ("delete", ResourceKind::Disk),
        ]
    );

    // The kept disk is never deleted.
    let deleted: Vec<_> = mock.deleted().into_iter().map(|h| h.name).collect();
    assert!(deleted.contains(&"boot-build-abcde".to_string()));
    assert!(!deleted.contains(&"data-build-abcde".to_string()));

    let calls = mock.calls();
    let BackendCall::CreateImage(image) = &calls[2] else {
        panic!("expected image creation, got {:?}", calls[2]);
    };
    assert_eq!(
        image.source_disk.as_deref(),
        Some("https://www.googleapis.com/compute/v1/projects/proj/zones/zone-a/disks/boot-build-abcde")
    );
    let BackendCall::CreateInstance(instance) = &calls[3] else {
        panic!("expected instance creation, got {:?}", calls[3]);
    };
    assert_eq!(instance.machine_type, "e2-small");
    assert_eq!(instance.disks.len(), 2);
    assert!(instance.disks[1].ends_with("/disks/data-build-abcde"));
}

#[tokio::test]
async fn test_validation_failure_makes_no_calls() {
    let mock = MockComputeClient::new();
    let workflow = workflow(
        &mock,
        r#"
name: build
steps:
  first:
    create_disks: [{name: boot, size_gb: 10}]
  second:
    create_disks: [{name: boot, size_gb: 20}]
dependencies:
  second: [first]
"#,
    );

    let err = workflow.run().await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Validation { ref step, source: ValidationError::DuplicateName { .. } }
            if step == "second"
    ));
    assert_eq!(mock.call_count(), 0);
    assert_eq!(workflow.step("second").unwrap().state(), StepState::ValidationFailed);
}

#[tokio::test]
async fn test_step_failure_stops_run_and_cleans_up() {
    let mock = MockComputeClient::new().with_failure(
        "golden-build-abcde",
        BackendError::Api {
            code: 409,
            message: "image family is locked".to_string(),
        },
    );
    let workflow = workflow(&mock, IMAGE_PIPELINE);

    let err = workflow.run().await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Step { ref step, source: StepError::Backend { ref name, .. } }
            if step == "image" && name == "golden"
    ));

    assert_eq!(workflow.step("vm").unwrap().state(), StepState::Validated);
    assert!(!mock
        .calls()
        .iter()
        .any(|call| matches!(call, BackendCall::CreateInstance(_))));

    let deleted: Vec<_> = mock.deleted().into_iter().map(|h| h.name).collect();
    assert_eq!(deleted, vec!["boot-build-abcde".to_string()]);
}

#[tokio::test]
async fn test_cancel_stops_later_levels() {
    let mock = MockComputeClient::gated();
    let workflow = Arc::new(workflow(&mock, IMAGE_PIPELINE));

    let running = tokio::spawn({
        let workflow = Arc::clone(&workflow);
        async move { workflow.run().await }
    });

    timeout(Duration::from_secs(5), mock.wait_for_calls(2))
        .await
        .expect("disk calls in flight");
    workflow.cancel();
    mock.release(2);

    let status = timeout(Duration::from_secs(5), running)
        .await
        .expect("workflow finished")
        .unwrap()
        .unwrap();
    assert_eq!(status, RunStatus::Cancelled);
    assert_eq!(workflow.step("disks").unwrap().state(), StepState::Cancelled);
    assert_eq!(workflow.step("image").unwrap().state(), StepState::Validated);

    // Both disks finished creating; only the one without no_cleanup is removed.
    let disks = workflow.context().registry(ResourceKind::Disk);
    assert_eq!(disks.len(), 2);
    assert!(disks.get("boot").unwrap().deleted);
    assert!(disks.lookup("boot").is_none());
    assert!(!disks.lookup("data").unwrap().deleted);
}

#[tokio::test]
async fn test_delete_step_and_cleanup_do_not_overlap() {
    let mock = MockComputeClient::new();
    let workflow = workflow(
        &mock,
        r#"
name: build
steps:
  disks:
    create_disks:
      - {name: scratch, size_gb: 1}
      - {name: keep, size_gb: 1}
  drop-scratch:
    delete_resources:
      disks: [scratch, projects/other/zones/zone-b/disks/legacy]
dependencies:
  drop-scratch: [disks]
"#,
    );

    assert_eq!(workflow.run().await.unwrap(), RunStatus::Succeeded);

    let deleted: Vec<_> = mock.deleted().into_iter().map(|h| h.name).collect();
    assert_eq!(
        deleted
            .iter()
            .filter(|name| name.as_str() == "scratch-build-abcde")
            .count(),
        1
    );
    assert!(deleted.contains(&"legacy".to_string()));
    assert!(deleted.contains(&"keep-build-abcde".to_string()));
}

#[tokio::test]
async fn test_cleanup_tolerates_missing_resources() {
    let mock = MockComputeClient::new()
        .with_delete_failure(
            "gone-build-abcde",
            BackendError::NotFound {
                name: "gone".to_string(),
            },
        )
        .with_delete_failure(
            "stuck-build-abcde",
            BackendError::Api {
                code: 400,
                message: "disk is in use".to_string(),
            },
        );
    let workflow = workflow(
        &mock,
        "name: build\nsteps:\n  disks:\n    create_disks: [{name: gone, size_gb: 1}, {name: stuck, size_gb: 1}]\n",
    )
    .with_cleanup(false);

    assert_eq!(workflow.run().await.unwrap(), RunStatus::Succeeded);
    assert!(mock.deleted().is_empty());

    let report = workflow.cleanup().await;
    assert!(!report.is_clean());
    assert_eq!(report.deleted, vec![(ResourceKind::Disk, "gone".to_string())]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].logical_name, "stuck");

    let disks = workflow.context().registry(ResourceKind::Disk);
    assert!(disks.get("gone").unwrap().deleted);
    assert!(!disks.lookup("stuck").unwrap().deleted);
}

#[tokio::test]
async fn test_from_document_applies_config_defaults() {
    let mock = MockComputeClient::new();
    let document = WorkflowDocument::from_yaml(
        "name: build\nzone: zone-doc\nsteps:\n  disks:\n    create_disks: [{name: data, size_gb: 5}]\n",
    )
    .unwrap();
    let config = EngineConfig {
        project: "proj-config".to_string(),
        zone: "zone-config".to_string(),
        max_concurrent_operations: 1,
        cleanup: false,
    };

    let workflow = Workflow::from_document(document, &config, Arc::new(mock.clone())).unwrap();
    assert_eq!(workflow.context().project(), "proj-config");
    assert_eq!(workflow.context().zone(), "zone-doc");

    assert_eq!(workflow.run().await.unwrap(), RunStatus::Succeeded);
    let requests = mock.disk_requests();
    assert_eq!(requests[0].project, "proj-config");
    assert_eq!(requests[0].zone, "zone-doc");
    assert!(mock.deleted().is_empty());
}
