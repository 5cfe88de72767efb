use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event in a run's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub workflow_id: WorkflowId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(workflow_id: WorkflowId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id,
            timestamp: Utc::now(),
            event_type,
        }
    }

    /// Whether this event closes the run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            EventType::RunCompleted { .. } | EventType::RunFailed { .. }
        )
    }
}

/// Types of events emitted while a workflow runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    // Run lifecycle events
    RunStarted {
        workflow_name: String,
        stage_count: usize,
    },
    RunCompleted {
        duration_ms: i64,
        rounds: u32,
    },
    RunFailed {
        error: String,
        duration_ms: i64,
        rounds: u32,
    },

    // Scheduling events
    RoundStarted {
        round: u32,
        stages: Vec<StageId>,
    },

    // Stage lifecycle events
    StageStarted {
        stage_id: StageId,
        function: String,
        tier: TierId,
    },
    StageCompleted {
        stage_id: StageId,
        tier: TierId,
        duration_ms: i64,
    },
    StageFailed {
        stage_id: StageId,
        tier: TierId,
        error: String,
    },
    StageSkipped {
        stage_id: StageId,
        reason: String,
    },
}

/// Event log writer trait
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the log
    async fn append(&self, event: Event) -> anyhow::Result<()>;

    /// Get all events for a run, oldest first
    async fn get_run_events(&self, workflow_id: &WorkflowId) -> anyhow::Result<Vec<Event>>;
}
