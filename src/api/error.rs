//! Request-level errors and their HTTP status codes.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::TaskError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Task(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Task(_) => StatusCode::CONFLICT,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use uuid::Uuid;

    #[test]
    fn status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(
            ApiError::BadRequest("task is required".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(TaskError::NotFound { id }).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(TaskError::AlreadyTerminal {
                id,
                status: TaskStatus::Completed
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(TaskError::NoPendingQuestion { id }).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(TaskError::InvalidTransition {
                id,
                from: TaskStatus::Pending,
                to: TaskStatus::Completed
            })
            .status(),
            StatusCode::CONFLICT
        );
    }
}
