//! Workflow execution
//!
//! Steps form a dependency graph. The graph is split into levels: every step
//! of a level depends only on steps of earlier levels. Validation walks the
//! levels in order, and a step may only refer to names created by steps it
//! transitively depends on. Each level then runs its steps concurrently.
//! The first failing step cancels the run. Cleanup runs afterwards, whatever
//! the outcome.

use crate::compute::ComputeClient;
use crate::config::EngineConfig;
use crate::error::{ValidationError, WorkflowError};
use crate::workflow::cleanup::{cleanup_resources, CleanupReport};
use crate::workflow::context::WorkflowContext;
use crate::workflow::document::WorkflowDocument;
use crate::workflow::steps::{FanOutOutcome, Step};
use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How a run ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Cancelled,
}

pub struct Workflow {
    context: Arc<WorkflowContext>,
    steps: Vec<Step>,
    levels: Vec<Vec<usize>>,
    /// Names of the steps each step transitively depends on
    upstream: Vec<HashSet<String>>,
    cleanup_enabled: bool,
}

impl Workflow {
    /// Build a workflow from a document, taking defaults from `config`
    pub fn from_document(
        document: WorkflowDocument,
        config: &EngineConfig,
        compute: Arc<dyn ComputeClient>,
    ) -> Result<Self, WorkflowError> {
        let project = document
            .project
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| config.project.clone());
        let zone = document
            .zone
            .clone()
            .filter(|z| !z.is_empty())
            .unwrap_or_else(|| config.zone.clone());

        let context = WorkflowContext::new(document.name.clone(), project, zone, compute)
            .with_max_concurrent_operations(config.max_concurrent_operations);

        Ok(Self::new(context, document)?.with_cleanup(config.cleanup))
    }

    /// Build a workflow around an already configured context
    pub fn new(context: WorkflowContext, document: WorkflowDocument) -> Result<Self, WorkflowError> {
        let WorkflowDocument {
            steps: step_documents,
            mut dependencies,
            ..
        } = document;

        if let Some(step) = dependencies
            .keys()
            .find(|step| !step_documents.contains_key(*step))
        {
            return Err(WorkflowError::Validation {
                step: step.clone(),
                source: ValidationError::InvalidStep {
                    step: step.clone(),
                    found: 0,
                },
            });
        }

        let mut steps = Vec::with_capacity(step_documents.len());
        for (name, step_document) in step_documents {
            let action = step_document
                .into_action(&name)
                .map_err(|source| WorkflowError::Validation {
                    step: name.clone(),
                    source,
                })?;
            let depends_on = dependencies.remove(&name).unwrap_or_default();
            steps.push(Step::new(name, action).with_dependencies(depends_on));
        }

        let Plan { levels, upstream } = plan_levels(&steps)?;
        Ok(Self {
            context: Arc::new(context),
            steps,
            levels,
            upstream,
            cleanup_enabled: true,
        })
    }

    /// Enable or disable end-of-run cleanup
    pub fn with_cleanup(mut self, enabled: bool) -> Self {
        self.cleanup_enabled = enabled;
        self
    }

    pub fn context(&self) -> &Arc<WorkflowContext> {
        &self.context
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name() == name)
    }

    /// Step names grouped by execution level
    pub fn levels(&self) -> Vec<Vec<&str>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|&i| self.steps[i].name()).collect())
            .collect()
    }

    /// Signal the run to stop starting new work
    pub fn cancel(&self) {
        self.context.cancel();
    }

    /// Validate every step in dependency order, stopping at the first failure
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for &index in self.levels.iter().flatten() {
            let step = &self.steps[index];
            step.validate_after(&self.context, &self.upstream[index])
                .map_err(|source| WorkflowError::Validation {
                    step: step.name().to_string(),
                    source,
                })?;
        }
        debug!(workflow = %self.context.name(), steps = self.steps.len(), "workflow validated");
        Ok(())
    }

    /// Validate, execute and clean up.
    ///
    /// A validation failure returns before any backend call. Otherwise
    /// cleanup runs when enabled and the execution outcome is returned.
    pub async fn run(&self) -> Result<RunStatus, WorkflowError> {
        let span = info_span!(
            "workflow",
            name = %self.context.name(),
            run_id = %self.context.run_id()
        );
        async {
            self.validate()?;

            info!(levels = self.levels.len(), "running workflow");
            let result = self.execute().await;
            match &result {
                Ok(status) => info!(?status, "workflow finished"),
                Err(err) => error!("workflow failed: {}", err),
            }

            if self.cleanup_enabled {
                self.cleanup().await;
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Delete every tracked resource not marked `no_cleanup`
    pub async fn cleanup(&self) -> CleanupReport {
        let report = cleanup_resources(&self.context).await;
        if report.is_clean() {
            info!(deleted = report.deleted.len(), "cleanup complete");
        } else {
            for failure in &report.failures {
                warn!(
                    kind = %failure.kind,
                    name = %failure.logical_name,
                    link = %failure.link,
                    "resource left behind: {}",
                    failure.error
                );
            }
        }
        report
    }

    async fn execute(&self) -> Result<RunStatus, WorkflowError> {
        for (depth, level) in self.levels.iter().enumerate() {
            if self.context.is_cancelled() {
                info!(level = depth, "workflow cancelled before level started");
                return Ok(RunStatus::Cancelled);
            }

            debug!(level = depth, steps = level.len(), "starting level");
            let mut running: FuturesUnordered<_> = level
                .iter()
                .map(|&index| {
                    let step = &self.steps[index];
                    async move { (step.name(), step.run(&self.context).await) }
                })
                .collect();

            let mut failure: Option<WorkflowError> = None;
            let mut cancelled = false;
            while let Some((name, result)) = running.next().await {
                match result {
                    Ok(FanOutOutcome::Completed) => debug!(step = name, "step succeeded"),
                    Ok(FanOutOutcome::Cancelled) => cancelled = true,
                    Err(source) if failure.is_none() => {
                        error!(step = name, "step failed: {}", source);
                        self.context.cancel();
                        failure = Some(WorkflowError::Step {
                            step: name.to_string(),
                            source,
                        });
                    }
                    Err(source) => debug!(step = name, "additional step failure: {}", source),
                }
            }

            if let Some(err) = failure {
                return Err(err);
            }
            if cancelled {
                return Ok(RunStatus::Cancelled);
            }
        }
        Ok(RunStatus::Succeeded)
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("context", &self.context)
            .field("steps", &self.steps)
            .field("levels", &self.levels())
            .field("cleanup_enabled", &self.cleanup_enabled)
            .finish()
    }
}

/// Execution order derived from the dependency graph
struct Plan {
    levels: Vec<Vec<usize>>,
    upstream: Vec<HashSet<String>>,
}

/// Group step indices into dependency levels and collect each step's ancestors
fn plan_levels(steps: &[Step]) -> Result<Plan, WorkflowError> {
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<NodeIndex> = (0..steps.len()).map(|i| graph.add_node(i)).collect();
    let by_name: HashMap<&str, NodeIndex> = steps
        .iter()
        .zip(&nodes)
        .map(|(step, &node)| (step.name(), node))
        .collect();

    for (step, &node) in steps.iter().zip(&nodes) {
        for dependency in step.depends_on() {
            let &upstream = by_name.get(dependency.as_str()).ok_or_else(|| {
                WorkflowError::Validation {
                    step: step.name().to_string(),
                    source: ValidationError::UnknownDependency {
                        step: step.name().to_string(),
                        dependency: dependency.clone(),
                    },
                }
            })?;
            graph.update_edge(upstream, node, ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        let step = steps[graph[cycle.node_id()]].name().to_string();
        WorkflowError::Validation {
            step: step.clone(),
            source: ValidationError::DependencyCycle { step },
        }
    })?;

    let mut depth = vec![0usize; steps.len()];
    let mut ancestors = vec![HashSet::new(); steps.len()];
    for &node in &order {
        let mut level = 0;
        let mut seen = HashSet::new();
        for parent in graph.neighbors_directed(node, Direction::Incoming) {
            let parent = graph[parent];
            level = level.max(depth[parent] + 1);
            seen.insert(steps[parent].name().to_string());
            seen.extend(ancestors[parent].iter().cloned());
        }
        depth[graph[node]] = level;
        ancestors[graph[node]] = seen;
    }

    let mut levels = vec![Vec::new(); depth.iter().max().map_or(0, |d| d + 1)];
    for (index, &d) in depth.iter().enumerate() {
        levels[d].push(index);
    }
    Ok(Plan {
        levels,
        upstream: ancestors,
    })
}
