pub mod dag;
pub mod dispatcher;
pub mod executor;
pub mod report;

pub use dag::{ready_stages, WorkflowDag};
pub use dispatcher::StageDispatcher;
pub use executor::{CascadePolicy, EngineConfig, WorkflowEngine};
pub use report::ResultAggregator;

use crate::events::{Event, EventLog};

/// Append to the event log without letting a log failure abort the run
pub(crate) async fn record(event_log: &dyn EventLog, event: Event) {
    if let Err(e) = event_log.append(event).await {
        tracing::warn!("Failed to record workflow event: {:#}", e);
    }
}
