use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;

use crate::models::ValidationIssue;
use crate::session::EngineError;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

impl From<ValidationIssue> for ErrorDetail {
    fn from(i: ValidationIssue) -> Self {
        Self {
            field: i.field,
            issue: i.issue,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn not_found(what: &str, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"), request_id)
    }

    pub fn validation(message: impl Into<String>, issues: Vec<ValidationIssue>, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message, request_id)
            .with_details(issues.into_iter().map(ErrorDetail::from).collect())
    }

    pub fn from_engine(err: EngineError, request_id: impl Into<String>) -> Self {
        let message = err.to_string();
        match err {
            EngineError::NotReady => Self::new(StatusCode::NOT_FOUND, "QUIZ_NOT_READY", message, request_id),
            EngineError::WrongStep { .. }
            | EngineError::TransitionPending
            | EngineError::NothingPending
            | EngineError::QuestionMismatch { .. } => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", message, request_id)
            }
            EngineError::UnknownOption(_)
            | EngineError::UnsupportedInput(_)
            | EngineError::InputRequired
            | EngineError::SkipNotAllowed
            | EngineError::BackNotAllowed => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", message, request_id)
            }
            EngineError::InvalidLeadForm(issues) => Self::validation(message, issues, request_id),
            EngineError::Submission(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "SUBMISSION_FAILED", message, request_id)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}
