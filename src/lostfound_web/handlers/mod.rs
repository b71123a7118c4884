use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::lostfound::report::Invalid;

pub mod auth;
pub mod comments;
pub mod geo;
pub mod incidents;
pub mod media;

pub enum WebError {
    NotFound,
    Forbidden,
    Invalid(Invalid),
    Internal(anyhow::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
            WebError::Forbidden => (StatusCode::FORBIDDEN, "forbidden").into_response(),
            WebError::Invalid(invalid) => (StatusCode::BAD_REQUEST, invalid.to_string()).into_response(),
            WebError::Internal(err) => {
                // rejected input may also surface from below the handlers
                if let Some(invalid) = err.downcast_ref::<Invalid>() {
                    return (StatusCode::BAD_REQUEST, invalid.to_string()).into_response();
                }

                warn!("Request failed: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}

impl<T: Into<anyhow::Error>> From<T> for WebError {
    fn from(err: T) -> Self {
        WebError::Internal(err.into())
    }
}
