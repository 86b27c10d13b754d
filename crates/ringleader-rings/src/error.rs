use thiserror::Error;

/// Errors from ring assignment operations.
#[derive(Debug, Error)]
pub enum RingsError {
    #[error("device not registered: {0}")]
    UnknownDevice(String),

    #[error("categorization failed: {0}")]
    Categorization(String),

    #[error("registry error: {0}")]
    Registry(#[from] ringleader_registry::RegistryError),
}

pub type RingsResult<T> = Result<T, RingsError>;
