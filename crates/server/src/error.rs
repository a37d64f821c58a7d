use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use estate_core::ErrorClass;
use estate_storage::StoreError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

fn domain_status(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::BadInput => StatusCode::BAD_REQUEST,
        ErrorClass::Conflict => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Store(StoreError::Domain(e)) => {
                tracing::warn!(code = e.code(), error = %e, "request rejected");
                (
                    domain_status(e.class()),
                    ErrorBody {
                        error: e.to_string(),
                        code: e.code(),
                        details: None,
                    },
                )
            }
            ApiError::Store(StoreError::Parse(e)) => {
                tracing::warn!(error = %e, "statement could not be parsed");
                let details = e.diagnostics().and_then(|d| serde_json::to_value(d).ok());
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorBody {
                        error: e.to_string(),
                        code: "PARSE_ERROR",
                        details,
                    },
                )
            }
            ApiError::Store(StoreError::Validation(v)) => {
                tracing::warn!(errors = v.errors.len(), "statement failed validation");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorBody {
                        error: v.to_string(),
                        code: "VALIDATION_FAILED",
                        details: serde_json::to_value(&v).ok(),
                    },
                )
            }
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: msg,
                    code: "BAD_REQUEST",
                    details: None,
                },
            ),
            ApiError::Store(e @ (StoreError::Database(_) | StoreError::InvalidData(_))) => internal(&e),
            ApiError::Internal(msg) => internal(&msg),
        };
        (status, Json(body)).into_response()
    }
}

fn internal(e: &dyn std::fmt::Display) -> (StatusCode, ErrorBody) {
    tracing::error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorBody {
            error: "internal server error".to_string(),
            code: "INTERNAL",
            details: None,
        },
    )
}
