use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cine_core::{CoreError, ProviderError, ValidationErrors};
use cine_payment::orchestrator::RETRY_MESSAGE;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    AuthenticationError(String),
    AuthorizationError(String),
    BadRequest(String),
    ServiceUnavailable(String),
}

impl AppError {
    fn into_parts(self) -> (StatusCode, String, Option<ValidationErrors>) {
        match self {
            AppError::Core(CoreError::ValidationError(errors)) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                Some(errors),
            ),
            AppError::Core(CoreError::ProviderError(e)) => {
                tracing::error!("Payment provider failure: {}", e);
                let status = match e {
                    ProviderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, RETRY_MESSAGE.to_string(), None)
            }
            AppError::Core(CoreError::Conflict(msg)) => (StatusCode::CONFLICT, msg, None),
            AppError::Core(CoreError::IdentityError(msg)) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::Core(CoreError::CatalogUnavailable(msg)) => {
                tracing::error!("Content catalog unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, RETRY_MESSAGE.to_string(), None)
            }
            AppError::Core(CoreError::PersistenceError(msg)) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    None,
                )
            }
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = self.into_parts();

        let body = match details {
            Some(details) => json!({ "error": error_message, "details": details }),
            None => json!({ "error": error_message }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::Core(CoreError::ProviderError(err))
    }
}

/// Same statuses as [`AppError`], rendered as `{"error_message": ..}` for
/// the Yape endpoint.
#[derive(Debug)]
pub struct YapeError(pub AppError);

impl From<AppError> for YapeError {
    fn from(err: AppError) -> Self {
        YapeError(err)
    }
}

impl From<CoreError> for YapeError {
    fn from(err: CoreError) -> Self {
        YapeError(AppError::Core(err))
    }
}

impl IntoResponse for YapeError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = self.0.into_parts();
        let error_message = match details {
            Some(details) => details.to_string(),
            None => error_message,
        };
        (status, Json(json!({ "error_message": error_message }))).into_response()
    }
}
