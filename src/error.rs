use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::scheduling::SchedulingError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Username or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} not found"))
    }

    pub fn db(e: sqlx::Error) -> Self {
        ApiError::Internal(format!("db error: {e}"))
    }

    /// Unique violations become 409 with `msg`; anything else is internal.
    pub fn db_unique(e: sqlx::Error, msg: &str) -> Self {
        let unique = e
            .as_database_error()
            .is_some_and(|d| d.is_unique_violation());
        if unique {
            ApiError::Conflict("CONFLICT", msg.to_string())
        } else {
            ApiError::db(e)
        }
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<SchedulingError> for ApiError {
    fn from(e: SchedulingError) -> Self {
        match e {
            SchedulingError::Validation(msg) => ApiError::BadRequest("VALIDATION_ERROR", msg),
            SchedulingError::Conflict(msg) => ApiError::Conflict("CONFLICT", msg),
            SchedulingError::NotFound(what) => ApiError::not_found(&what),
            SchedulingError::State(msg) => ApiError::Conflict("INVALID_STATE", msg),
            SchedulingError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => {
                // Details go to the log; clients get a generic message.
                error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::to_error_response("INTERNAL", "Internal server error"),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduling_errors_map_to_statuses() {
        let cases = [
            (SchedulingError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (SchedulingError::Conflict("x".into()), StatusCode::CONFLICT),
            (SchedulingError::NotFound("appointment".into()), StatusCode::NOT_FOUND),
            (SchedulingError::State("x".into()), StatusCode::CONFLICT),
            (SchedulingError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_state_error_code() {
        match ApiError::from(SchedulingError::State("appointment is CANCELLED".into())) {
            ApiError::Conflict(code, msg) => {
                assert_eq!(code, "INVALID_STATE");
                assert_eq!(msg, "appointment is CANCELLED");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
