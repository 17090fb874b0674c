use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use huddle_api::ErrorResponse;

/// Unified API error type.
///
/// Produces `{"error": "<message>"}` JSON responses.
#[derive(Debug)]
pub struct ApiErr {
    status: StatusCode,
    message: String,
}

impl ApiErr {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<huddle_core::ProtocolError> for ApiErr {
    fn from(e: huddle_core::ProtocolError) -> Self {
        Self::bad_request(e.to_string())
    }
}
