use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::error::Error;

impl Error {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingTenantId | Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::DisallowedByPolicy => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::MissingProjectId
            | Error::MissingUserContext
            | Error::InvalidInput(_)
            | Error::InvalidParent(_)
            | Error::InvalidCatalog
            | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Error::Storage(_)
            | Error::Pool(_)
            | Error::Integrity(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Renders the error in the `{ "data": null, "error": ... }` envelope.
///
/// Server-side failures are logged and replaced with a generic message so storage
/// details never reach the client.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {self}");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = json!({ "data": null, "error": message });
        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Signature realm=\"skillvault\""),
            );
        }

        response
    }
}
