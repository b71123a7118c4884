use std::fmt::Display;
use std::num::NonZeroU32;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use axum_login::tower_sessions::cookie::time::Duration;
use axum_login::tower_sessions::{ExpiredDeletion, Expiry, SessionManagerLayer};
use axum_login::AuthManagerLayerBuilder;
use lostfound_geo::Gazetteer;
use sqlx::SqlitePool;
use tokio::net::ToSocketAddrs;
use tokio::signal;
use tokio::task::AbortHandle;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::CompressionLevel;
use tower_sessions_sqlx_store::SqliteStore;
use tracing::{info, warn, Level};

use crate::lostfound::objects::FsObjectStore;
use crate::lostfound::report::MAX_IMAGE_BYTES;
use crate::lostfound::store::IncidentStore;

mod auth;
mod handlers;

pub use auth::User;

pub struct Options<A> {
    pub store: IncidentStore,
    pub objects: FsObjectStore,
    pub gazetteer: Gazetteer,
    pub page_size: NonZeroU32,
    pub addr: A,
    pub db: SqlitePool,
    pub users: Vec<User>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: IncidentStore,
    pub objects: FsObjectStore,
    pub gazetteer: Gazetteer,
    pub page_size: NonZeroU32,
}

pub async fn serve<A>(opts: Options<A>) -> Result<()>
where
    A: ToSocketAddrs + Display,
{
    let state = AppState {
        store: opts.store,
        objects: opts.objects,
        gazetteer: opts.gazetteer,
        page_size: opts.page_size,
    };

    info!("Create session store in database");
    let session_store = SqliteStore::new(opts.db);
    session_store.migrate().await?;

    // cleanup expired sessions from time to time
    let delete_task = tokio::task::spawn(
        session_store
            .clone()
            .continuously_delete_expired(std::time::Duration::from_secs(60))
    );

    let session_layer = SessionManagerLayer::new(session_store)
        .with_expiry(Expiry::OnInactivity(Duration::weeks(4)));

    let auth_backend = auth::Backend::from(opts.users);

    let auth_layer = AuthManagerLayerBuilder::new(auth_backend, session_layer).build();

    // photos are uploaded as the raw request body
    let upload_limit = DefaultBodyLimit::max(MAX_IMAGE_BYTES);

    let media_route = media_route(state.objects.public_prefix());

    let mut app = Router::new()
        .route("/api/incidents", get(handlers::incidents::feed).post(handlers::incidents::create))
        .route(
            "/api/incidents/{id}",
            get(handlers::incidents::get)
                .patch(handlers::incidents::update)
                .delete(handlers::incidents::delete),
        )
        .route(
            "/api/incidents/{id}/images/{name}",
            put(handlers::incidents::upload_image).layer(upload_limit),
        )
        .route("/api/incidents/{id}/location", put(handlers::incidents::set_location))
        .route(
            "/api/incidents/{id}/comments",
            get(handlers::comments::list).post(handlers::comments::create),
        )
        .route("/api/me/incidents", get(handlers::incidents::mine))
        .route("/api/map", get(handlers::geo::map))
        .route("/api/nearest", get(handlers::geo::nearest))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .layer(CompressionLayer::new().gzip(true).quality(CompressionLevel::Fastest));

    match media_route {
        Some(route) => app = app.route(&route, get(handlers::media::handle_object)),
        None => warn!("Media prefix {:?} is not a local path, objects must be served elsewhere", state.objects.public_prefix()),
    }

    let app = app
        .layer(auth_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state);

    info!("Starting webserver on http://{}/", opts.addr);
    let listener = tokio::net::TcpListener::bind(opts.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(delete_task.abort_handle()))
        .await?;

    Ok(())
}

/// The route serving stored objects, if the public prefix is a path on this server.
fn media_route(prefix: &str) -> Option<String> {
    if !prefix.starts_with('/') && !prefix.is_empty() {
        return None;
    }

    Some(format!("{}/{{*path}}", prefix))
}

async fn shutdown_signal(deletion_task_abort_handle: AbortHandle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to listen for SIGTERM: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down");
    deletion_task_abort_handle.abort();
}
