use std::str::FromStr;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http;
use axum::http::{HeaderValue, Request};
use axum::response::{IntoResponse, Response};
use mime::Mime;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, instrument};

use crate::lostfound_web::handlers::WebError;
use crate::lostfound_web::AppState;

/// Serves a stored object, e.g. the photo of an incident.
#[instrument(skip_all, fields(% path))]
pub async fn handle_object(
    Path(path): Path<String>,
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, WebError> {
    let file = state.objects.locate(&path).ok_or(WebError::NotFound)?;

    debug!("Serve object {:?}", file);

    // guess mime from the object path
    let mime = mime_guess::from_path(&file).first_or(Mime::from_str("application/octet-stream")?);

    let mut resp = ServeFile::new_with_mime(&file, &mime).oneshot(request).await?;

    // objects are replaced on upload, so clients must revalidate
    if resp.status().is_success() {
        resp.headers_mut().insert(
            http::header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=3600, must-revalidate"),
        );
    }

    Ok(resp.into_response())
}
