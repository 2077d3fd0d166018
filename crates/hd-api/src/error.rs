//! API error mapping
//!
//! Domain errors map to HTTP statuses at this boundary only. Delivery
//! failures are not errors here: the send surface answers 2xx with a
//! per-channel breakdown and `success: false`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hd_common::{ErrorCode, HeraldError};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

pub struct ApiError(pub HeraldError);

impl From<HeraldError> for ApiError {
    fn from(err: HeraldError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ServiceUnavailable | ErrorCode::CircuitOpen => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorBody {
            success: false,
            code: code.as_str().to_string(),
            message: self.0.to_string(),
            retryable: self.0.retryable(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
