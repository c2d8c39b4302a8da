use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::certification::IneligibleReason;
use crate::db::store::{
    BATCH_CODE_KEY, CERTIFICATE_HOLDER_KEY, REGISTRATION_EMAIL_LEVEL_KEY, STAFF_EMAIL_KEY,
    TEMPLATE_NAME_KEY,
};
use crate::db::DatabaseError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not eligible: {0}")]
    Eligibility(IneligibleReason),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{} not found", what))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(DatabaseError::NotFound) | AppError::NotFound(_) => "not_found",
            AppError::Database(DatabaseError::Duplicate(_) | DatabaseError::Conflict(_))
            | AppError::Conflict(_) => "conflict",
            AppError::Database(DatabaseError::InvalidInput(_)) | AppError::Validation(_) => {
                "validation_error"
            }
            AppError::Database(_) | AppError::InternalServerError(_) => "internal_error",
            AppError::Authentication(_) => "authentication_error",
            AppError::Authorization(_) => "authorization_error",
            AppError::Eligibility(_) => "not_eligible",
            AppError::ExternalService(_) => "external_service_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code() {
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "validation_error" => StatusCode::BAD_REQUEST,
            "authentication_error" => StatusCode::UNAUTHORIZED,
            "authorization_error" => StatusCode::FORBIDDEN,
            "not_eligible" => StatusCode::UNPROCESSABLE_ENTITY,
            "external_service_error" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the caller. Storage internals stay in logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Database(DatabaseError::NotFound) => "Resource not found".to_string(),
            AppError::Database(DatabaseError::Duplicate(constraint)) => {
                duplicate_message(constraint).to_string()
            }
            AppError::Database(DatabaseError::InvalidInput(msg) | DatabaseError::Conflict(msg)) => {
                msg.clone()
            }
            AppError::Database(_) | AppError::InternalServerError(_) => {
                "An internal server error occurred".to_string()
            }
            AppError::Authentication(msg)
            | AppError::Authorization(msg)
            | AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::ExternalService(msg) => msg.clone(),
            AppError::Eligibility(reason) => reason.to_string(),
        }
    }
}

fn duplicate_message(constraint: &str) -> &'static str {
    match constraint {
        REGISTRATION_EMAIL_LEVEL_KEY => "Email already registered for this program level",
        CERTIFICATE_HOLDER_KEY => "Certificate already issued for this program level",
        BATCH_CODE_KEY => "Batch code already exists",
        STAFF_EMAIL_KEY => "A staff member with this email already exists",
        TEMPLATE_NAME_KEY => "A certificate template with this name already exists",
        _ => "Resource already exists",
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        });
        if let AppError::Eligibility(reason) = &self {
            body["error"]["reason"] = json!(reason);
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::not_found("Batch").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Authentication("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Authorization("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Eligibility(IneligibleReason::HasAbsentMarks).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AppError::ExternalService("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::Database(DatabaseError::Duplicate(REGISTRATION_EMAIL_LEVEL_KEY.into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Database(DatabaseError::Conflict("not pending".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Database(DatabaseError::MigrationError("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn database_details_are_not_echoed() {
        let err = AppError::Database(DatabaseError::MigrationError("relation missing".into()));
        assert!(!err.public_message().contains("relation"));
    }
}
