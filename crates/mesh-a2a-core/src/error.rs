use thiserror::Error;

pub type Result<T, E = A2aError> = std::result::Result<T, E>;

/// Error kinds the core distinguishes.
///
/// Signature and decryption failures are recovered internally (the message is
/// dropped and a warning logged); the remaining kinds propagate to callers.
#[derive(Debug, Error)]
pub enum A2aError {
    #[error("no identity stored for agent {0}")]
    IdentityMissing(String),

    #[error("identity storage corrupt: {0}")]
    IdentityCorrupt(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("message signature invalid")]
    SignatureInvalid,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("{0} not found")]
    NotFound(String),

    #[error("message queue full")]
    QueueOverflow,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl A2aError {
    /// Shorthand for transport failures wrapping an underlying cause.
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport(cause.to_string())
    }
}

/// Failures recorded on tasks and workflows; never crash the orchestrator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(String),

    #[error("task {task_id} unassignable: {reason}")]
    TaskUnassignable { task_id: String, reason: String },

    #[error("task {task_id} failed: {reason}")]
    TaskExecutionFailed { task_id: String, reason: String },
}
