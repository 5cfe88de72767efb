use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Opaque parameter bag passed verbatim to a stage function
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Identifier of a single workflow run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a stage within a workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a worker tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierId(pub String);

impl TierId {
    /// Recorded when a stage's function could not be resolved to a tier
    pub const UNKNOWN: &'static str = "unknown";
    /// Recorded when a stage was never executed
    pub const NONE: &'static str = "none";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn none() -> Self {
        Self(Self::NONE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Outcome of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

/// Declarative workflow: a named set of stages with dependency edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>, stages: Vec<StageSpec>) -> Self {
        Self {
            name: name.into(),
            description: None,
            stages,
        }
    }

    pub fn stage(&self, id: &StageId) -> Option<&StageSpec> {
        self.stages.iter().find(|s| &s.id == id)
    }

    /// Stage ids that appear more than once, in first-seen order
    pub fn duplicate_stage_ids(&self) -> Vec<StageId> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();

        for stage in &self.stages {
            if !seen.insert(&stage.id) && !duplicates.contains(&stage.id) {
                duplicates.push(stage.id.clone());
            }
        }

        duplicates
    }
}

/// A single stage: a function call plus the stages it waits for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: StageId,
    pub function: String,
    #[serde(default)]
    pub params: Parameters,
    #[serde(default)]
    pub depends_on: Vec<StageId>,
}

impl StageSpec {
    pub fn new(id: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            id: StageId::new(id),
            function: function.into(),
            params: Parameters::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(StageId::new));
        self
    }
}

/// Outcome of one stage within one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: StageId,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub tier: TierId,
}

impl StageResult {
    pub fn completed(
        stage_id: StageId,
        value: serde_json::Value,
        tier: TierId,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_id,
            status: StageStatus::Completed,
            result: Some(value),
            error: None,
            started_at,
            ended_at,
            tier,
        }
    }

    pub fn failed(
        stage_id: StageId,
        error: impl Into<String>,
        tier: TierId,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage_id,
            status: StageStatus::Failed,
            result: None,
            error: Some(error.into()),
            started_at,
            ended_at,
            tier,
        }
    }

    /// Failure for a stage that never reached an executor
    pub fn not_executed(stage_id: StageId, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::failed(stage_id, reason, TierId::none(), at, at)
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// Kind of run-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// No stage could become ready: a cycle or a dangling dependency
    UnresolvableGraph,
    /// At least one stage failed
    StageFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

/// State of a single run, owned by the orchestrator while it is in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub status: RunStatus,
    pub results: Vec<StageResult>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub rounds: u32,
    pub error: Option<RunError>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: WorkflowId, spec: &WorkflowSpec) -> Self {
        Self {
            workflow_id,
            workflow_name: spec.name.clone(),
            status: RunStatus::Pending,
            results: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            rounds: 0,
            error: None,
        }
    }

    pub fn result_for(&self, stage_id: &StageId) -> Option<&StageResult> {
        self.results.iter().find(|r| &r.stage_id == stage_id)
    }
}

/// Caller-facing outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionReport {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub status: RunStatus,
    /// One entry per spec stage, in spec order
    pub stages: Vec<StageResult>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl WorkflowExecutionReport {
    pub fn stage(&self, id: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage_id.0 == id)
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_stage_ids() {
        let spec = WorkflowSpec::new(
            "dupes",
            vec![
                StageSpec::new("a", "echo"),
                StageSpec::new("b", "echo"),
                StageSpec::new("a", "echo"),
                StageSpec::new("a", "echo"),
            ],
        );

        assert_eq!(spec.duplicate_stage_ids(), vec![StageId::new("a")]);
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: WorkflowSpec = serde_json::from_value(serde_json::json!({
            "name": "minimal",
            "stages": [
                { "id": "a", "function": "echo" },
                { "id": "b", "function": "echo", "depends_on": ["a"], "params": { "x": 1 } }
            ]
        }))
        .unwrap();

        assert_eq!(spec.description, None);
        assert!(spec.stages[0].depends_on.is_empty());
        assert_eq!(spec.stages[1].depends_on, vec![StageId::new("a")]);
        assert_eq!(spec.stages[1].params["x"], serde_json::json!(1));
    }

    #[test]
    fn test_stage_result_shapes() {
        let now = Utc::now();
        let ok = StageResult::completed(
            StageId::new("a"),
            serde_json::json!(3),
            TierId::new("compute"),
            now,
            now,
        );
        assert!(ok.is_completed());
        assert!(ok.error.is_none());

        let skipped = StageResult::not_executed(StageId::new("b"), "never ran", now);
        assert_eq!(skipped.status, StageStatus::Failed);
        assert_eq!(skipped.tier.as_str(), TierId::NONE);
        assert!(skipped.result.is_none());
    }
}
