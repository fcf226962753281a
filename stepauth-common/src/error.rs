// ================================================================
// File: stepauth-common/src/error.rs
// ================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::challenge::ChallengeKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("A {0} challenge is already pending")]
    ChallengeAlreadyPending(ChallengeKind),

    #[error("No pending {0} challenge")]
    NoPendingChallenge(ChallengeKind),

    #[error("The {0} challenge was already resolved")]
    AlreadyResolved(ChallengeKind),

    #[error("No challenge handler registered to answer the {0} challenge")]
    HandlerNotRegistered(ChallengeKind),

    #[error("Cannot replace the challenge handler while a {0} challenge is pending")]
    InvalidHandlerSwap(ChallengeKind),

    #[error("The {0} step stopped waiting for its answer")]
    SlotClosed(ChallengeKind),

    #[error("A sign-in flow is already in progress on this session")]
    FlowInProgress,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Coarse grouping of [`Error`] used by callers that only care about
/// who is at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Misuse of the challenge protocol by the backend or the application.
    ProtocolViolation,
    /// Something the identity backend reported, passed through untouched.
    BackendFailure,
    /// A challenge was raised but nobody was there to answer it.
    HandlerMissing,
    Configuration,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::ChallengeAlreadyPending(_)
            | Error::NoPendingChallenge(_)
            | Error::AlreadyResolved(_)
            | Error::InvalidHandlerSwap(_)
            | Error::SlotClosed(_)
            | Error::FlowInProgress => ErrorClass::ProtocolViolation,
            Error::Backend(BackendError::HandlerMissing(_)) | Error::HandlerNotRegistered(_) => {
                ErrorClass::HandlerMissing
            }
            Error::Backend(_) => ErrorClass::BackendFailure,
            Error::Config(_) | Error::Io(_) | Error::Parse(_) => ErrorClass::Configuration,
        }
    }
}

/// Failures reported by the identity backend for a single step.
///
/// These travel through resolution slots and completion callbacks, so they
/// are cheap to clone and carry only strings.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum BackendError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Challenge expired: {0}")]
    ChallengeExpired(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("No handler available to answer the {0} challenge")]
    HandlerMissing(ChallengeKind),

    #[error("Challenge rejected: {0}")]
    Rejected(String),

    #[error("Authentication flow cancelled")]
    FlowCancelled,

    #[error("Backend error: {0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_protocol_violations() {
        let kind = ChallengeKind::MultiFactorCode;
        assert_eq!(Error::NoPendingChallenge(kind).class(), ErrorClass::ProtocolViolation);
        assert_eq!(Error::AlreadyResolved(kind).class(), ErrorClass::ProtocolViolation);
        assert_eq!(Error::InvalidHandlerSwap(kind).class(), ErrorClass::ProtocolViolation);
        assert_eq!(Error::ChallengeAlreadyPending(kind).class(), ErrorClass::ProtocolViolation);
        assert_eq!(Error::FlowInProgress.class(), ErrorClass::ProtocolViolation);
    }

    #[test]
    fn handler_missing_wins_over_backend_failure() {
        let err = Error::from(BackendError::HandlerMissing(ChallengeKind::Password));
        assert_eq!(err.class(), ErrorClass::HandlerMissing);

        let err = Error::from(BackendError::InvalidCredential("bad password".into()));
        assert_eq!(err.class(), ErrorClass::BackendFailure);
    }

    #[test]
    fn backend_error_message_is_passed_through() {
        let err = Error::from(BackendError::Network("connection reset".into()));
        assert_eq!(err.to_string(), "Backend error: Network error: connection reset");
    }
}
