use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{domain::FieldSet, error::ErrorReport};

pub const SUBMISSION_START: &str = "form-submission-start";
pub const SUBMISSION_END: &str = "form-submission-end";
pub const RESPONSE: &str = "form-response";
pub const SUBMISSION_ERROR: &str = "form-submission-error";

/// One network exchange derived from a form's declared target and method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub url: String,
    pub method: String,
    pub body: FieldSet,
}

impl SubmissionRequest {
    pub fn new(url: impl Into<String>, method: &str, body: FieldSet) -> Self {
        Self {
            url: url.into(),
            method: method.trim().to_ascii_uppercase(),
            body,
        }
    }

    /// GET and HEAD carry their fields in the query string instead of a body.
    pub fn uses_query_string(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD")
    }
}

/// Lifecycle notifications dispatched from a form. All of them bubble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FormEvent {
    SubmissionStart,
    SubmissionEnd,
    Response { json: Value },
    SubmissionError { error: ErrorReport },
}

impl FormEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmissionStart => SUBMISSION_START,
            Self::SubmissionEnd => SUBMISSION_END,
            Self::Response { .. } => RESPONSE,
            Self::SubmissionError { .. } => SUBMISSION_ERROR,
        }
    }

    /// Payload as seen by listeners: `null` for start/end.
    pub fn detail(&self) -> Value {
        match self {
            Self::SubmissionStart | Self::SubmissionEnd => Value::Null,
            Self::Response { json } => json!({ "json": json }),
            Self::SubmissionError { error } => json!({ "error": error }),
        }
    }
}

/// Decoded result of one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// The validation predicate refused the submission.
    Rejected,
    /// Another submission of the same form was still in flight.
    Skipped,
    /// The form was detached from its controller before the trigger arrived.
    Detached,
    Completed { status: u16, json: Value },
}

impl SubmissionOutcome {
    pub fn json(&self) -> Option<&Value> {
        match self {
            Self::Completed { json, .. } => Some(json),
            Self::Rejected | Self::Skipped | Self::Detached => None,
        }
    }
}
