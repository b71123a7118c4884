use std::num::NonZeroU32;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::Query;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::lostfound::feed::{self, Cursor, ResolvedIncident};
use crate::lostfound::objects;
use crate::lostfound::report::{self, IncidentUpdate, Invalid, NewIncident};
use crate::lostfound::{Incident, IncidentId, LatLng};
use crate::lostfound_web::auth::User;
use crate::lostfound_web::handlers::WebError;
use crate::lostfound_web::AppState;

/// Upper bound for the page size a client may ask for.
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Deserialize)]
pub struct FeedQuery {
    cursor: Option<Cursor>,
    limit: Option<u32>,
}

#[instrument(skip_all, fields(? query.cursor, ? query.limit))]
pub async fn feed(State(state): State<AppState>, Query(query): Query<FeedQuery>) -> Result<Response, WebError> {
    let page_size = page_size(query.limit, state.page_size);
    let page = feed::fetch_page(&state.store, &state.objects, page_size, query.cursor.as_ref()).await?;
    Ok(Json(page).into_response())
}

fn page_size(limit: Option<u32>, default: NonZeroU32) -> NonZeroU32 {
    let limit = limit.unwrap_or(default.get()).min(MAX_PAGE_SIZE);
    NonZeroU32::new(limit).unwrap_or(default)
}

#[instrument(skip_all, fields(% id))]
pub async fn get(State(state): State<AppState>, Path(id): Path<IncidentId>) -> Result<Json<ResolvedIncident>, WebError> {
    let incident = state.store.get(id).await?.ok_or(WebError::NotFound)?;
    Ok(Json(resolve(&state, incident).await))
}

#[instrument(skip_all, fields(user = %user.name))]
pub async fn create(
    user: User,
    State(state): State<AppState>,
    Json(report): Json<NewIncident>,
) -> Result<Response, WebError> {
    report.validate(&state.gazetteer).map_err(WebError::Invalid)?;

    let incident = state.store.create(&user.name, &report).await?;
    let incident = resolve(&state, incident).await;

    Ok((StatusCode::CREATED, Json(incident)).into_response())
}

#[instrument(skip_all, fields(% id, user = %user.name))]
pub async fn update(
    user: User,
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
    Json(update): Json<IncidentUpdate>,
) -> Result<Json<ResolvedIncident>, WebError> {
    owned_incident(&state, &user, id).await?;
    update.validate().map_err(WebError::Invalid)?;

    let incident = state.store.update(id, &update).await?.ok_or(WebError::NotFound)?;
    Ok(Json(resolve(&state, incident).await))
}

#[instrument(skip_all, fields(% id, user = %user.name))]
pub async fn delete(
    user: User,
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
) -> Result<StatusCode, WebError> {
    owned_incident(&state, &user, id).await?;

    if !state.store.delete(id).await? {
        return Err(WebError::NotFound);
    }

    // the record is gone already, a leftover folder only wastes space
    if let Err(err) = state.objects.delete_folder(&objects::incident_photo_folder(id)).await {
        warn!("Failed to delete photos of incident {}: {:?}", id, err);
    }

    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(% id, % name, user = %user.name))]
pub async fn upload_image(
    user: User,
    State(state): State<AppState>,
    Path((id, name)): Path<(IncidentId, String)>,
    body: Bytes,
) -> Result<Json<ResolvedIncident>, WebError> {
    let incident = owned_incident(&state, &user, id).await?;

    let name = report::validate_image(&name, body.len()).map_err(WebError::Invalid)?;
    let path = objects::incident_photo_path(id, &name);

    // fail early before writing the object, the store checks again when adding the path
    report::check_photo_limit(&incident.image_paths, &path).map_err(WebError::Invalid)?;

    state.objects.put(&path, &body).await?;

    let incident = state.store.add_image_path(id, &path).await?.ok_or(WebError::NotFound)?;
    info!("Stored photo {:?} of incident {}", path, id);

    Ok(Json(resolve(&state, incident).await))
}

#[derive(Deserialize)]
pub struct LocationRequest {
    lat: f64,
    lng: f64,
}

/// Pins an incident on the map and answers with the town closest to the pin.
#[instrument(skip_all, fields(% id, user = %user.name))]
pub async fn set_location(
    user: User,
    State(state): State<AppState>,
    Path(id): Path<IncidentId>,
    Json(request): Json<LocationRequest>,
) -> Result<Response, WebError> {
    owned_incident(&state, &user, id).await?;

    let position = LatLng::new(request.lat, request.lng)
        .map_err(|err| WebError::Invalid(Invalid::field("locationLngLat", err.to_string())))?;

    state.store.set_location(id, position).await?.ok_or(WebError::NotFound)?;

    let nearest = state.gazetteer.nearest(position);
    Ok(Json(nearest).into_response())
}

#[instrument(skip_all, fields(user = %user.name))]
pub async fn mine(user: User, State(state): State<AppState>) -> Result<Json<Vec<ResolvedIncident>>, WebError> {
    let incidents = state.store.by_uid(&user.name).await?;
    Ok(Json(feed::resolve_all(&state.objects, incidents).await))
}

async fn owned_incident(state: &AppState, user: &User, id: IncidentId) -> Result<Incident, WebError> {
    let incident = state.store.get(id).await?.ok_or(WebError::NotFound)?;

    if !user.owns(&incident) {
        return Err(WebError::Forbidden);
    }

    Ok(incident)
}

async fn resolve(state: &AppState, incident: Incident) -> ResolvedIncident {
    let mut resolved = feed::resolve_all(&state.objects, vec![incident]).await;

    match resolved.pop() {
        Some(incident) => incident,
        None => unreachable!("resolve_all keeps every incident"),
    }
}
