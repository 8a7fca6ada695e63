use thiserror::Error;

/// Top-level error type for the orchestration core.
///
/// Component modules define richer error enums (`MessagingError`,
/// `StateMachineError`, `ValidationError`); this type is what crosses the
/// crate boundary from the coordinator and the binary entrypoint.
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Validation error: {0}")]
    Validation(#[from] crate::contracts::ValidationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] crate::messaging::MessagingError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] crate::state_machine::StateMachineError),

    #[error("Task memory error: {0}")]
    TaskMemory(#[from] crate::memory::TaskMemoryError),

    #[error("Design input error: {0}")]
    DesignInput(#[from] crate::design::DesignInputError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl ForgeError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
