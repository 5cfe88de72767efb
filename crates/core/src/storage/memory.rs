use crate::events::{Event, EventLog};
use crate::types::WorkflowId;
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Event log kept entirely in memory
#[derive(Default)]
pub struct InMemoryEventLog {
    events: RwLock<HashMap<WorkflowId, Vec<Event>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        self.events
            .write()
            .await
            .entry(event.workflow_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn get_run_events(&self, workflow_id: &WorkflowId) -> Result<Vec<Event>> {
        Ok(self
            .events
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .unwrap_or_default())
    }
}
