//! Reconciler error type. Every reconcile function returns this; the
//! `kube::runtime::Controller` error handler (`on_error`) decides the
//! requeue policy from it (spec.md §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("provider rpc failed: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("provider channel error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("dependency not found: {0}")]
    NotFound(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("capability missing: {0}")]
    CapabilityMissing(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should trigger an immediate jittered-backoff
    /// requeue (spec.md §7), as opposed to waiting for the next spec/resync
    /// edit.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(_) | Error::Grpc(_) | Error::Transport(_) | Error::ProviderUnavailable(_) => true,
            Error::NotFound(_) => true,
            Error::InvalidSpec(_) | Error::CapabilityMissing(_) => false,
            Error::Other(_) => true,
        }
    }
}

/// How a failed provider RPC should be treated, mirroring the reconciler
/// propagation policy in spec.md §7. The mirror image of
/// `virtrigaud-providers::grpc::provider_err_to_status` on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    NotFound,
    InvalidSpec,
    Unauthorized,
    Unimplemented,
    Canceled,
    Retryable,
}

pub fn classify_status(status: &tonic::Status) -> StatusClass {
    match status.code() {
        tonic::Code::NotFound => StatusClass::NotFound,
        tonic::Code::InvalidArgument => StatusClass::InvalidSpec,
        tonic::Code::Unauthenticated | tonic::Code::PermissionDenied => StatusClass::Unauthorized,
        tonic::Code::Unimplemented => StatusClass::Unimplemented,
        tonic::Code::Cancelled => StatusClass::Canceled,
        _ => StatusClass::Retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_codes() {
        assert_eq!(classify_status(&tonic::Status::not_found("x")), StatusClass::NotFound);
        assert_eq!(classify_status(&tonic::Status::invalid_argument("x")), StatusClass::InvalidSpec);
        assert_eq!(classify_status(&tonic::Status::unauthenticated("x")), StatusClass::Unauthorized);
        assert_eq!(classify_status(&tonic::Status::permission_denied("x")), StatusClass::Unauthorized);
        assert_eq!(classify_status(&tonic::Status::unimplemented("x")), StatusClass::Unimplemented);
        assert_eq!(classify_status(&tonic::Status::cancelled("x")), StatusClass::Canceled);
    }

    #[test]
    fn falls_back_to_retryable() {
        assert_eq!(classify_status(&tonic::Status::unavailable("x")), StatusClass::Retryable);
        assert_eq!(classify_status(&tonic::Status::internal("x")), StatusClass::Retryable);
    }

    #[test]
    fn retryability_matches_spec_policy() {
        assert!(Error::ProviderUnavailable("x".into()).is_retryable());
        assert!(Error::NotFound("x".into()).is_retryable());
        assert!(!Error::InvalidSpec("x".into()).is_retryable());
        assert!(!Error::CapabilityMissing("x".into()).is_retryable());
    }
}
