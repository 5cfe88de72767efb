use super::dag::{ready_stages, WorkflowDag};
use super::dispatcher::StageDispatcher;
use super::record;
use super::report::ResultAggregator;
use crate::directory::FunctionDirectory;
use crate::error::EngineError;
use crate::events::{Event, EventLog, EventType};
use crate::storage::ReportStore;
use crate::tier::WorkerTierExecutor;
use crate::types::{
    RunError, RunErrorKind, RunStatus, StageId, StageResult, StageSpec, WorkflowExecution,
    WorkflowExecutionReport, WorkflowId, WorkflowSpec,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Run-level error raised when no stage can become ready
pub const UNRESOLVABLE_GRAPH: &str = "circular dependency or unresolved reference";
/// Reason recorded for stages stranded by an unresolvable graph
pub const NOT_EXECUTED: &str = "not executed due to workflow failure";
/// Reason recorded for stages cut off by a failed stage
pub const DEPENDENCY_FAILED: &str = "dependency stage failed";

/// What happens to the rest of the graph once a stage fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Stop after the failing round and fail every unresolved stage
    #[default]
    HaltAll,
    /// Keep scheduling independent branches; fail only transitive dependents
    DependentsOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cascade: CascadePolicy,
}

/// Round-based workflow driver.
///
/// Each round computes the ready set, dispatches all of it concurrently and
/// waits for every stage before looking at the outcome. Runs share no
/// mutable state, so one engine can drive many runs in parallel.
pub struct WorkflowEngine {
    config: EngineConfig,
    dispatcher: StageDispatcher,
    event_log: Arc<dyn EventLog>,
    report_store: Option<Arc<dyn ReportStore>>,
}

impl WorkflowEngine {
    pub fn new(
        directory: Arc<dyn FunctionDirectory>,
        executor: Arc<dyn WorkerTierExecutor>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        let dispatcher = StageDispatcher::new(directory, executor, event_log.clone());

        Self {
            config: EngineConfig::default(),
            dispatcher,
            event_log,
            report_store: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Save every finished report to `store`
    pub fn with_report_store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.report_store = Some(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a workflow to a terminal state and return its report.
    ///
    /// Only a spec with duplicate stage ids is rejected; every other outcome,
    /// including cycles and failed stages, is a report covering every stage.
    pub async fn execute(
        &self,
        workflow_id: WorkflowId,
        workflow: &WorkflowSpec,
    ) -> Result<WorkflowExecutionReport, EngineError> {
        let duplicates = workflow.duplicate_stage_ids();
        if !duplicates.is_empty() {
            return Err(EngineError::DuplicateStage {
                workflow: workflow.name.clone(),
                stages: duplicates,
            });
        }

        let mut execution = WorkflowExecution::new(workflow_id, workflow);

        tracing::info!(
            "Starting workflow execution: workflow_id={}, name={}, stages={}",
            execution.workflow_id,
            workflow.name,
            workflow.stages.len()
        );

        record(
            self.event_log.as_ref(),
            Event::new(
                execution.workflow_id.clone(),
                EventType::RunStarted {
                    workflow_name: workflow.name.clone(),
                    stage_count: workflow.stages.len(),
                },
            ),
        )
        .await;

        self.run_rounds(&mut execution, workflow).await;

        execution.ended_at = Some(Utc::now());
        let report = ResultAggregator::report(&execution, workflow);
        execution.status = report.status;

        match report.status {
            RunStatus::Completed => {
                tracing::info!(
                    "Workflow execution completed: workflow_id={}, rounds={}",
                    report.workflow_id,
                    report.rounds
                );

                record(
                    self.event_log.as_ref(),
                    Event::new(
                        report.workflow_id.clone(),
                        EventType::RunCompleted {
                            duration_ms: report.duration_ms,
                            rounds: report.rounds,
                        },
                    ),
                )
                .await;
            }
            _ => {
                let error = report
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "workflow failed".to_string());

                tracing::error!(
                    "Workflow execution failed: workflow_id={}, error={}",
                    report.workflow_id,
                    error
                );

                record(
                    self.event_log.as_ref(),
                    Event::new(
                        report.workflow_id.clone(),
                        EventType::RunFailed {
                            error,
                            duration_ms: report.duration_ms,
                            rounds: report.rounds,
                        },
                    ),
                )
                .await;
            }
        }

        if let Some(store) = &self.report_store {
            if let Err(e) = store.save(&report).await {
                tracing::warn!(
                    "Failed to store report: workflow_id={}, error={:#}",
                    report.workflow_id,
                    e
                );
            }
        }

        Ok(report)
    }

    /// Drive rounds until every stage is resolved or the run must stop
    async fn run_rounds(&self, execution: &mut WorkflowExecution, workflow: &WorkflowSpec) {
        let dag = WorkflowDag::from_workflow(workflow);
        let workflow_id = execution.workflow_id.clone();
        let mut completed: HashSet<StageId> = HashSet::new();
        let mut failed: HashSet<StageId> = HashSet::new();

        loop {
            if workflow.stages.iter().all(|s| completed.contains(&s.id)) {
                return;
            }

            // Failed stages never enter `completed`, so keep them out explicitly
            let ready: Vec<&StageSpec> = ready_stages(workflow, &completed)
                .into_iter()
                .filter(|stage| !failed.contains(&stage.id))
                .collect();

            if ready.is_empty() {
                self.settle_outstanding(execution, workflow, &dag, &completed, &failed)
                    .await;
                return;
            }

            execution.status = RunStatus::Running;
            execution.rounds += 1;
            let round = execution.rounds;
            let stage_ids: Vec<StageId> = ready.iter().map(|s| s.id.clone()).collect();

            tracing::info!(
                "Starting round {} with {} stage(s): workflow_id={}",
                round,
                stage_ids.len(),
                workflow_id
            );

            record(
                self.event_log.as_ref(),
                Event::new(
                    workflow_id.clone(),
                    EventType::RoundStarted {
                        round,
                        stages: stage_ids,
                    },
                ),
            )
            .await;

            // Siblings always run to completion, even when one of them fails
            let results = futures::future::join_all(
                ready
                    .iter()
                    .map(|stage| self.dispatcher.dispatch(&workflow_id, stage)),
            )
            .await;

            let mut round_failed = false;
            for result in results {
                if result.is_completed() {
                    completed.insert(result.stage_id.clone());
                } else {
                    failed.insert(result.stage_id.clone());
                    round_failed = true;
                }
                execution.results.push(result);
            }

            if round_failed && self.config.cascade == CascadePolicy::HaltAll {
                tracing::warn!(
                    "Round {} had failures, halting remaining stages: workflow_id={}",
                    round,
                    workflow_id
                );
                self.cascade_failure(execution, workflow, &completed).await;
                execution.error = Some(stage_failure(execution, &failed));
                return;
            }
        }
    }

    /// Mark every unresolved stage without a result as cut off by a failure
    async fn cascade_failure(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &WorkflowSpec,
        completed: &HashSet<StageId>,
    ) {
        let now = Utc::now();

        for stage in &workflow.stages {
            if completed.contains(&stage.id) || execution.result_for(&stage.id).is_some() {
                continue;
            }
            self.skip(execution, &stage.id, DEPENDENCY_FAILED, now).await;
        }
    }

    /// No stage is ready but some are unresolved: classify and close them out
    async fn settle_outstanding(
        &self,
        execution: &mut WorkflowExecution,
        workflow: &WorkflowSpec,
        dag: &WorkflowDag,
        completed: &HashSet<StageId>,
        failed: &HashSet<StageId>,
    ) {
        let now = Utc::now();
        let blocked = dag.downstream_of(failed);

        let outstanding: Vec<StageId> = workflow
            .stages
            .iter()
            .filter(|s| !completed.contains(&s.id) && execution.result_for(&s.id).is_none())
            .map(|s| s.id.clone())
            .collect();

        let mut unresolved = Vec::new();
        for stage_id in outstanding {
            if blocked.contains(&stage_id) {
                self.skip(execution, &stage_id, DEPENDENCY_FAILED, now).await;
            } else {
                unresolved.push(stage_id);
            }
        }

        if unresolved.is_empty() {
            if !failed.is_empty() {
                execution.error = Some(stage_failure(execution, failed));
            }
            return;
        }

        let message = format!(
            "{}: {}",
            UNRESOLVABLE_GRAPH,
            dag.describe_unresolvable(&unresolved)
        );
        tracing::error!(
            "Workflow graph cannot make progress: workflow_id={}, {}",
            execution.workflow_id,
            message
        );

        for stage_id in &unresolved {
            self.skip(execution, stage_id, NOT_EXECUTED, now).await;
        }

        execution.error = Some(RunError {
            kind: RunErrorKind::UnresolvableGraph,
            message,
        });
    }

    async fn skip(
        &self,
        execution: &mut WorkflowExecution,
        stage_id: &StageId,
        reason: &str,
        at: chrono::DateTime<Utc>,
    ) {
        record(
            self.event_log.as_ref(),
            Event::new(
                execution.workflow_id.clone(),
                EventType::StageSkipped {
                    stage_id: stage_id.clone(),
                    reason: reason.to_string(),
                },
            ),
        )
        .await;

        execution
            .results
            .push(StageResult::not_executed(stage_id.clone(), reason, at));
    }
}

/// Run error naming every stage that failed on its own
fn stage_failure(execution: &WorkflowExecution, failed: &HashSet<StageId>) -> RunError {
    let mut failures: Vec<String> = execution
        .results
        .iter()
        .filter(|r| failed.contains(&r.stage_id))
        .map(|r| {
            format!(
                "stage '{}' failed: {}",
                r.stage_id,
                r.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();
    failures.sort();

    RunError {
        kind: RunErrorKind::StageFailure,
        message: failures.join("; "),
    }
}
