//! Concurrent execution of a step's sub-operations
//!
//! Every sub-operation runs on its own tokio task. The step waits for all of
//! them, even after a failure or a cancellation, so that anything the backend
//! created ends up in a registry where cleanup can find it. Cancellation is
//! checked once per task, right before the backend is called; in-flight
//! calls are never interrupted.

use crate::error::StepError;
use crate::workflow::context::WorkflowContext;
use crate::workflow::registry::ResourceKind;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, debug_span, info, warn, Instrument};

/// One element of a step's declared work
#[async_trait]
pub trait SubOperation: Send + Sync + 'static {
    /// Kind of resource this operation acts on
    fn kind(&self) -> ResourceKind;

    /// Logical name used in logs and errors
    fn logical_name(&self) -> &str;

    /// Perform the backend call and record the result in the registries
    async fn execute(&self, ctx: &WorkflowContext) -> Result<(), StepError>;
}

/// How a fan-out finished when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutOutcome {
    /// Every sub-operation ran and succeeded
    Completed,
    /// Cancellation was observed; in-flight work was allowed to finish
    Cancelled,
}

enum TaskOutcome {
    Finished,
    Skipped,
}

/// Run `operations` concurrently and wait for all of them.
///
/// Returns the first error received unless cancellation was observed, in
/// which case the step reports [`FanOutOutcome::Cancelled`].
pub async fn fan_out<Op>(
    step: &str,
    ctx: &Arc<WorkflowContext>,
    operations: Vec<Op>,
) -> Result<FanOutOutcome, StepError>
where
    Op: SubOperation,
{
    let total = operations.len();
    let mut tasks = FuturesUnordered::new();

    for operation in operations {
        let ctx = Arc::clone(ctx);
        let span = debug_span!(
            "sub_operation",
            step,
            kind = %operation.kind(),
            name = %operation.logical_name()
        );

        tasks.push(tokio::spawn(
            async move {
                let _slot = ctx.acquire_operation_slot().await;
                if ctx.is_cancelled() {
                    debug!("workflow cancelled, not starting");
                    return Ok(TaskOutcome::Skipped);
                }
                operation.execute(&ctx).await.map(|()| TaskOutcome::Finished)
            }
            .instrument(span),
        ));
    }

    let cancel = ctx.cancellation_token();
    let mut cancelled = false;
    let mut skipped = 0usize;
    let mut first_error: Option<StepError> = None;

    loop {
        tokio::select! {
            joined = tasks.next() => {
                let result = match joined {
                    None => break,
                    Some(Ok(result)) => result,
                    Some(Err(join_error)) => Err(StepError::TaskPanicked(join_error)),
                };
                match result {
                    Ok(TaskOutcome::Finished) => {}
                    Ok(TaskOutcome::Skipped) => skipped += 1,
                    Err(err) if first_error.is_none() => {
                        warn!(step, "{}", err);
                        first_error = Some(err);
                    }
                    Err(err) => debug!(step, "additional failure: {}", err),
                }
            }
            _ = cancel.cancelled(), if !cancelled => {
                cancelled = true;
                info!(
                    step,
                    in_flight = tasks.len(),
                    "cancellation observed, waiting for running sub-operations"
                );
            }
        }
    }

    // The loop can drain before the cancellation branch is ever polled.
    if cancelled || cancel.is_cancelled() {
        info!(step, total, skipped, "step acknowledged cancellation");
        return Ok(FanOutOutcome::Cancelled);
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(FanOutOutcome::Completed),
    }
}
