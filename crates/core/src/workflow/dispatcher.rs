use super::record;
use crate::directory::FunctionDirectory;
use crate::events::{Event, EventLog, EventType};
use crate::tier::WorkerTierExecutor;
use crate::types::{StageResult, StageSpec, TierId, WorkflowId};
use chrono::Utc;
use std::sync::Arc;

/// Runs exactly one ready stage and turns every outcome into a
/// [`StageResult`]. Nothing fails past this boundary.
pub struct StageDispatcher {
    directory: Arc<dyn FunctionDirectory>,
    executor: Arc<dyn WorkerTierExecutor>,
    event_log: Arc<dyn EventLog>,
}

impl StageDispatcher {
    pub fn new(
        directory: Arc<dyn FunctionDirectory>,
        executor: Arc<dyn WorkerTierExecutor>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            directory,
            executor,
            event_log,
        }
    }

    /// Resolve the stage's tier, invoke it, and capture the outcome
    pub async fn dispatch(&self, workflow_id: &WorkflowId, stage: &StageSpec) -> StageResult {
        let tier = match self.directory.resolve(&stage.function) {
            Ok(Some(tier)) => tier,
            Ok(None) => {
                let error = format!("function '{}' not registered", stage.function);
                return self.unroutable(workflow_id, stage, error).await;
            }
            Err(e) => {
                let error = format!("function directory lookup failed: {}", e);
                return self.unroutable(workflow_id, stage, error).await;
            }
        };

        tracing::info!(
            "Dispatching stage {} ({}) to tier {}: workflow_id={}",
            stage.id,
            stage.function,
            tier,
            workflow_id
        );

        record(
            self.event_log.as_ref(),
            Event::new(
                workflow_id.clone(),
                EventType::StageStarted {
                    stage_id: stage.id.clone(),
                    function: stage.function.clone(),
                    tier: tier.clone(),
                },
            ),
        )
        .await;

        let started_at = Utc::now();
        let outcome = self
            .executor
            .invoke(&tier, &stage.function, &stage.params)
            .await;
        let ended_at = Utc::now();

        match outcome {
            Ok(value) => {
                record(
                    self.event_log.as_ref(),
                    Event::new(
                        workflow_id.clone(),
                        EventType::StageCompleted {
                            stage_id: stage.id.clone(),
                            tier: tier.clone(),
                            duration_ms: (ended_at - started_at).num_milliseconds(),
                        },
                    ),
                )
                .await;

                StageResult::completed(stage.id.clone(), value, tier, started_at, ended_at)
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(
                    "Stage {} failed on tier {}: {}: workflow_id={}",
                    stage.id,
                    tier,
                    error,
                    workflow_id
                );

                record(
                    self.event_log.as_ref(),
                    Event::new(
                        workflow_id.clone(),
                        EventType::StageFailed {
                            stage_id: stage.id.clone(),
                            tier: tier.clone(),
                            error: error.clone(),
                        },
                    ),
                )
                .await;

                // Routing succeeded, so the resolved tier is still recorded
                StageResult::failed(stage.id.clone(), error, tier, started_at, ended_at)
            }
        }
    }

    /// Failure for a stage whose function never reached a tier
    async fn unroutable(
        &self,
        workflow_id: &WorkflowId,
        stage: &StageSpec,
        error: String,
    ) -> StageResult {
        tracing::warn!(
            "Stage {} cannot be routed: {}: workflow_id={}",
            stage.id,
            error,
            workflow_id
        );

        record(
            self.event_log.as_ref(),
            Event::new(
                workflow_id.clone(),
                EventType::StageFailed {
                    stage_id: stage.id.clone(),
                    tier: TierId::unknown(),
                    error: error.clone(),
                },
            ),
        )
        .await;

        let now = Utc::now();
        StageResult::failed(stage.id.clone(), error, TierId::unknown(), now, now)
    }
}
