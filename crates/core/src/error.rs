//! Error types for the Tierflow engine.

use crate::types::{StageId, TierId};

/// Errors returned from run submission.
///
/// Stage-level failures are never reported here; they are captured as
/// failed stage results inside the report.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The workflow declares the same stage id more than once.
    #[error("Workflow '{workflow}' declares duplicate stage ids: {}", join_ids(.stages))]
    DuplicateStage {
        workflow: String,
        stages: Vec<StageId>,
    },
}

/// Failure of the function directory itself (not a missing entry).
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Function directory unavailable: {0}")]
    Unavailable(String),
}

/// Errors produced by a worker-tier invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The function ran and reported an error.
    #[error("{0}")]
    Failed(String),

    /// No pool is configured for the requested tier.
    #[error("Tier '{0}' is not configured")]
    UnknownTier(TierId),

    /// The executor has no function with this name.
    #[error("Function '{0}' not found on any tier")]
    FunctionNotFound(String),

    /// The function exists but belongs to another tier.
    #[error("Function '{function}' is not served by tier '{tier}'")]
    WrongTier { function: String, tier: TierId },

    /// The tier's timeout elapsed before the function returned.
    #[error("Function '{function}' timed out after {timeout_secs} seconds on tier '{tier}'")]
    Timeout {
        function: String,
        tier: TierId,
        timeout_secs: u64,
    },

    /// The tier pool is shutting down or otherwise unusable.
    #[error("Tier '{tier}' unavailable: {reason}")]
    Unavailable { tier: TierId, reason: String },
}

impl From<anyhow::Error> for InvocationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{:#}", err))
    }
}

/// Errors raised while building a function registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Function '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Function name must not be empty")]
    EmptyName,
}

fn join_ids(ids: &[StageId]) -> String {
    ids.iter()
        .map(|id| id.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_stage_message() {
        let err = EngineError::DuplicateStage {
            workflow: "checkout".to_string(),
            stages: vec![StageId::new("a"), StageId::new("b")],
        };

        assert_eq!(
            err.to_string(),
            "Workflow 'checkout' declares duplicate stage ids: a, b"
        );
    }

    #[test]
    fn test_anyhow_conversion_keeps_chain() {
        let err: InvocationError = anyhow::anyhow!("card declined")
            .context("charge failed")
            .into();

        assert_eq!(err.to_string(), "charge failed: card declined");
    }
}
