use thiserror::Error;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("state error: {0}")]
    State(#[from] ringleader_state::StateError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
