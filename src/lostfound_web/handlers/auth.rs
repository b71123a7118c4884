use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::lostfound_web::auth::{AuthSession, Credentials, User};
use crate::lostfound_web::handlers::WebError;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[instrument(skip_all, fields(username = %payload.username))]
pub async fn login(
    mut auth_session: AuthSession,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, WebError> {
    let creds = Credentials {
        username: payload.username,
        password: payload.password,
    };

    let Some(user) = auth_session.authenticate(creds).await? else {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    };

    auth_session.login(&user).await?;
    info!("User {:?} logged in", user.name);

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[instrument(skip_all, fields(user = %user.name))]
pub async fn logout(user: User, mut auth_session: AuthSession) -> Result<StatusCode, WebError> {
    auth_session.logout().await?;
    info!("User {:?} logged out", user.name);

    Ok(StatusCode::NO_CONTENT)
}
