use thiserror::Error;

/// Errors from scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("registry error: {0}")]
    Registry(#[from] ringleader_registry::RegistryError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
