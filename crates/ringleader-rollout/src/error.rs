use thiserror::Error;

/// Errors from deployment scheduling.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("deployment already running: {0}")]
    AlreadyRunning(String),

    #[error("gating service error: {0}")]
    Gate(String),

    #[error("state error: {0}")]
    State(#[from] ringleader_state::StateError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;
