use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidTarget,
    InvalidMethod,
    Network,
    Decode,
    Cancelled,
}

/// Serializable form of a [`SubmissionError`], carried by the
/// `form-submission-error` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("invalid submission target: {0}")]
    InvalidTarget(String),
    #[error("unsupported request method: {0:?}")]
    InvalidMethod(String),
    #[error("network request failed: {0}")]
    Network(String),
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("submission cancelled before completion")]
    Cancelled,
}

impl SubmissionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidTarget(_) => ErrorCode::InvalidTarget,
            Self::InvalidMethod(_) => ErrorCode::InvalidMethod,
            Self::Network(_) => ErrorCode::Network,
            Self::Decode(_) => ErrorCode::Decode,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }
}

impl From<&SubmissionError> for ErrorReport {
    fn from(value: &SubmissionError) -> Self {
        Self::new(value.code(), value.to_string())
    }
}
