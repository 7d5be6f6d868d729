//! The closed error taxonomy provider back-ends classify every failure into
//! (spec.md §4.1, §7).

use thiserror::Error;

/// Errors a provider operation can return. The set is closed and frozen:
/// reconcilers match on `kind()` rather than on message text.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("canceled: {0}")]
    Canceled(String),

    #[error("retryable: {0}")]
    Retryable(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

/// The taxonomy tag, independent of the message — what reconcilers actually
/// branch on (spec.md §7 propagation policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidSpec,
    Unauthorized,
    Unavailable,
    Unimplemented,
    DeadlineExceeded,
    Canceled,
    Retryable,
    Internal,
    ResourceExhausted,
    AlreadyExists,
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NotFound(_) => ErrorKind::NotFound,
            ProviderError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            ProviderError::Unauthorized(_) => ErrorKind::Unauthorized,
            ProviderError::Unavailable(_) => ErrorKind::Unavailable,
            ProviderError::Unimplemented(_) => ErrorKind::Unimplemented,
            ProviderError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            ProviderError::Canceled(_) => ErrorKind::Canceled,
            ProviderError::Retryable(_) => ErrorKind::Retryable,
            ProviderError::Internal(_) => ErrorKind::Internal,
            ProviderError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            ProviderError::AlreadyExists(_) => ErrorKind::AlreadyExists,
        }
    }

    /// Requeue with jittered exponential backoff (spec.md §4.4 failure
    /// semantics, §7 propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Unavailable
                | ErrorKind::DeadlineExceeded
                | ErrorKind::ResourceExhausted
                | ErrorKind::Retryable
                | ErrorKind::Internal
        )
    }

    /// Terminal for this generation; cleared only by a spec edit or
    /// credential change (spec.md §7).
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidSpec | ErrorKind::Unauthorized)
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
