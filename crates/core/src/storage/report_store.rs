use crate::types::{WorkflowExecutionReport, WorkflowId};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage for finished run reports
#[async_trait::async_trait]
pub trait ReportStore: Send + Sync {
    /// Save a report, replacing any earlier report with the same workflow id
    async fn save(&self, report: &WorkflowExecutionReport) -> Result<()>;

    async fn get(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowExecutionReport>>;

    /// All reports, most recently started first
    async fn list(&self) -> Result<Vec<WorkflowExecutionReport>>;
}

/// Report store kept in memory
#[derive(Default)]
pub struct InMemoryReportStore {
    reports: RwLock<HashMap<WorkflowId, WorkflowExecutionReport>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ReportStore for InMemoryReportStore {
    async fn save(&self, report: &WorkflowExecutionReport) -> Result<()> {
        let previous = self
            .reports
            .write()
            .await
            .insert(report.workflow_id.clone(), report.clone());

        if previous.is_some() {
            tracing::warn!(
                "Replaced stored report for reused workflow_id={}",
                report.workflow_id
            );
        }

        Ok(())
    }

    async fn get(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowExecutionReport>> {
        Ok(self.reports.read().await.get(workflow_id).cloned())
    }

    async fn list(&self) -> Result<Vec<WorkflowExecutionReport>> {
        let mut reports: Vec<_> = self.reports.read().await.values().cloned().collect();
        reports.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });
        Ok(reports)
    }
}
