pub mod event_log;
pub mod memory;
pub mod report_store;

pub use event_log::JsonlEventLog;
pub use memory::InMemoryEventLog;
pub use report_store::{InMemoryReportStore, ReportStore};
