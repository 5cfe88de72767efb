// Core types and engine for Tierflow workflow orchestration

pub mod directory;
pub mod error;
pub mod events;
pub mod storage;
pub mod tier;
pub mod types;
pub mod workflow;

pub use directory::{FunctionDirectory, StaticDirectory};
pub use error::{DirectoryError, EngineError, InvocationError, RegistryError};
pub use tier::{FunctionRegistry, LocalTierPool, StageFunction, TierConfig, WorkerTierExecutor};
pub use types::*;
pub use workflow::{CascadePolicy, EngineConfig, WorkflowEngine};
