use spool_core::error::InferenceError;
use spool_core::ids::ThreadId;
use spool_core::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool execution failed: {tool}")]
    ToolExecution { tool: String, detail: String },

    #[error("anonymization failed for tool {tool}: {detail}")]
    Anonymization { tool: String, detail: String },

    #[error("max iterations reached: {0}")]
    MaxIterationsReached(u32),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("thread already has an active run: {0}")]
    RunInProgress(ThreadId),

    #[error("run interrupted")]
    Interrupted,

    #[error("{0}")]
    Internal(String),
}

impl RunError {
    /// Stable machine-readable code carried by the outbound error event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Inference(_) => "inference_failed",
            Self::Store(_) => "store_failed",
            Self::ToolExecution { .. } => "tool_execution_failed",
            Self::Anonymization { .. } => "anonymization_failed",
            Self::MaxIterationsReached(_) => "max_iterations_reached",
            Self::InvalidInput(_) => "invalid_input",
            Self::RunInProgress(_) => "run_in_progress",
            Self::Interrupted => "interrupted",
            Self::Internal(_) => "internal",
        }
    }
}
