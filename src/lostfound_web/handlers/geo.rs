use std::num::NonZeroU32;

use axum::extract::State;
use axum::Json;
use axum_extra::extract::Query;
use lostfound_geo::Nearest;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::lostfound::feed::{FeedReader, ResolvedIncident};
use crate::lostfound::report::Invalid;
use crate::lostfound::{IncidentId, LatLng};
use crate::lostfound_web::handlers::WebError;
use crate::lostfound_web::AppState;

/// Page size used while walking the feed for the map.
const MAP_PAGE_SIZE: u32 = 100;

#[derive(Deserialize)]
pub struct NearestQuery {
    lat: f64,
    lng: f64,
}

#[instrument(skip_all, fields(lat = query.lat, lng = query.lng))]
pub async fn nearest(State(state): State<AppState>, Query(query): Query<NearestQuery>) -> Result<Json<Nearest>, WebError> {
    let position = LatLng::new(query.lat, query.lng)
        .map_err(|err| WebError::Invalid(Invalid::field("position", err.to_string())))?;

    Ok(Json(state.gazetteer.nearest(position)))
}

/// An incident as shown on the map.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPin {
    id: IncidentId,
    lat: f64,
    lng: f64,
    status: String,
    tags: Vec<String>,
    location: Option<String>,
    image: Option<String>,
}

impl MapPin {
    fn from_incident(resolved: ResolvedIncident) -> Option<Self> {
        let position = resolved.incident.location_lng_lat?;

        Some(Self {
            id: resolved.incident.id,
            lat: position.lat,
            lng: position.lng,
            status: resolved.incident.status,
            tags: resolved.incident.tags,
            location: resolved.incident.location,
            image: resolved.images.into_iter().next(),
        })
    }
}

/// All incidents that carry a pin.
#[instrument(skip_all)]
pub async fn map(State(state): State<AppState>) -> Result<Json<Vec<MapPin>>, WebError> {
    let page_size = NonZeroU32::new(MAP_PAGE_SIZE).unwrap_or(state.page_size);
    let mut reader = FeedReader::new(state.store.clone(), state.objects.clone(), page_size);

    while reader.has_more() {
        let count = reader.load_more().await?;
        debug!("Loaded {} incidents for the map, {} in total, cursor {:?}", count, reader.items().len(), reader.cursor());
    }

    let pins = reader
        .into_items()
        .into_iter()
        .filter_map(MapPin::from_incident)
        .collect::<Vec<_>>();

    debug!("Found {} pinned incidents", pins.len());

    Ok(Json(pins))
}
