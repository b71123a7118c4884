use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::instrument;

use crate::lostfound::report::Invalid;
use crate::lostfound::{Comment, IncidentId};
use crate::lostfound_web::auth::User;
use crate::lostfound_web::handlers::WebError;
use crate::lostfound_web::AppState;

/// Longest comment accepted, in characters.
const MAX_COMMENT_CHARS: usize = 1000;

#[instrument(skip_all, fields(% id))]
pub async fn list(State(state): State<AppState>, Path(id): Path<IncidentId>) -> Result<Json<Vec<Comment>>, WebError> {
    state.store.get(id).await?.ok_or(WebError::NotFound)?;
    Ok(Json(state.store.comments(id).await?))
}

#[derive(Deserialize)]
pub struct CommentRequest {
    text: String,
}

#[instrument(skip_all, fields(% id, user = %user.name))]
pub async fn create(
    user: User,
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
    Json(request): Json<CommentRequest>,
) -> Result<Response, WebError> {
    check_text(&request.text).map_err(WebError::Invalid)?;

    state.store.get(id).await?.ok_or(WebError::NotFound)?;

    let comment = state.store.add_comment(id, &user.name, &request.text).await?;
    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

fn check_text(text: &str) -> Result<(), Invalid> {
    let text = text.trim();

    if text.is_empty() {
        return Err(Invalid::field("text", "must not be empty"));
    }

    if text.chars().count() > MAX_COMMENT_CHARS {
        return Err(Invalid::field("text", format!("must not exceed {} characters", MAX_COMMENT_CHARS)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_and_oversized_comments() {
        assert!(check_text("Seen it near the market").is_ok());
        assert!(check_text("").is_err());
        assert!(check_text(" \n\t ").is_err());
        assert!(check_text(&"x".repeat(MAX_COMMENT_CHARS)).is_ok());
        assert!(check_text(&"x".repeat(MAX_COMMENT_CHARS + 1)).is_err());
    }
}
