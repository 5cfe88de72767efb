use crate::types::{
    RunStatus, StageResult, WorkflowExecution, WorkflowExecutionReport, WorkflowSpec,
};
use chrono::Utc;

/// Reason recorded for stages the run never attempted
pub const STAGE_NOT_EXECUTED: &str = "stage not executed due to workflow failure";

/// Turns a run's accumulated results into the caller-facing report
pub struct ResultAggregator;

impl ResultAggregator {
    /// Build the report for `execution`.
    ///
    /// Produces exactly one entry per stage in `workflow`, in spec order.
    /// Stages without a result get a synthesized failure stamped with the
    /// run's termination time. The overall status is completed only when
    /// every entry completed. Calling this twice on the same execution yields
    /// equal reports.
    pub fn report(
        execution: &WorkflowExecution,
        workflow: &WorkflowSpec,
    ) -> WorkflowExecutionReport {
        // A run that never terminated is reported as of now
        let ended_at = execution.ended_at.unwrap_or_else(Utc::now);

        let stages: Vec<StageResult> = workflow
            .stages
            .iter()
            .map(|stage| match execution.result_for(&stage.id) {
                Some(result) => result.clone(),
                None => StageResult::not_executed(stage.id.clone(), STAGE_NOT_EXECUTED, ended_at),
            })
            .collect();

        let status = if stages.iter().all(StageResult::is_completed) {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        WorkflowExecutionReport {
            workflow_id: execution.workflow_id.clone(),
            workflow_name: execution.workflow_name.clone(),
            status,
            stages,
            started_at: execution.started_at,
            ended_at,
            duration_ms: (ended_at - execution.started_at).num_milliseconds(),
            rounds: execution.rounds,
            error: execution.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StageId, StageSpec, StageStatus, TierId, WorkflowId};
    use chrono::Duration;

    fn workflow() -> WorkflowSpec {
        WorkflowSpec::new(
            "three",
            vec![
                StageSpec::new("a", "echo"),
                StageSpec::new("b", "echo"),
                StageSpec::new("c", "echo").depends_on(["a", "b"]),
            ],
        )
    }

    fn finished(results: Vec<StageResult>) -> WorkflowExecution {
        let spec = workflow();
        let mut execution = WorkflowExecution::new(WorkflowId::new("wf-1"), &spec);
        execution.results = results;
        execution.rounds = 2;
        execution.ended_at = Some(execution.started_at + Duration::milliseconds(1500));
        execution.status = RunStatus::Failed;
        execution
    }

    fn ok(id: &str) -> StageResult {
        let now = Utc::now();
        StageResult::completed(StageId::new(id), serde_json::json!(id), TierId::new("t"), now, now)
    }

    #[test]
    fn test_all_completed_in_spec_order() {
        // Result order within a round is not meaningful
        let execution = finished(vec![ok("b"), ok("a"), ok("c")]);

        let report = ResultAggregator::report(&execution, &workflow());

        assert_eq!(report.status, RunStatus::Completed);
        let order: Vec<&str> = report.stages.iter().map(|s| s.stage_id.0.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(report.duration_ms, 1500);
        assert_eq!(report.rounds, 2);
    }

    #[test]
    fn test_missing_results_are_synthesized() {
        let execution = finished(vec![ok("a")]);

        let report = ResultAggregator::report(&execution, &workflow());

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.stages.len(), 3);

        let c = report.stage("c").unwrap();
        assert_eq!(c.status, StageStatus::Failed);
        assert_eq!(c.error.as_deref(), Some(STAGE_NOT_EXECUTED));
        assert_eq!(c.tier.as_str(), TierId::NONE);
        assert_eq!(Some(c.started_at), execution.ended_at);
        assert_eq!(Some(c.ended_at), execution.ended_at);
    }

    #[test]
    fn test_report_is_idempotent() {
        let execution = finished(vec![ok("a")]);

        let first = ResultAggregator::report(&execution, &workflow());
        let second = ResultAggregator::report(&execution, &workflow());

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
