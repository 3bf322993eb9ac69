use thiserror::Error;

/// Failure of a service operation, split by who is at fault.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ServiceError::InvalidInput(message.into())
    }

    pub fn is_client_error(&self) -> bool {
        !matches!(self, ServiceError::Backend(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
