use std::ops::DerefMut;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::lostfound::feed::Cursor;
use crate::lostfound::{Incident, IncidentId, LatLng, STATUS_UNCLAIMED};

mod types;
pub mod comment;

/// Opens the database and brings its schema up to date.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let db = SqlitePoolOptions::new().connect_with(options).await?;

    info!("Running database migrations");
    sqlx::migrate!().run(&db).await?;

    Ok(db)
}

#[derive(sqlx::FromRow)]
struct IncidentRow {
    pub id: IncidentId,
    pub uid: String,
    pub tags: Json<Vec<String>>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub date_lost: NaiveDate,
    pub date_found: Option<NaiveDate>,
    pub phone_number: Option<String>,
    pub status: Option<String>,
    pub image_paths: Json<Vec<String>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<IncidentRow> for Incident {
    fn from(row: IncidentRow) -> Self {
        // a pin is only valid with both coordinates in range
        let location_lng_lat = match (row.latitude, row.longitude) {
            (Some(lat), Some(lng)) => LatLng::new(lat, lng).ok(),
            _ => None,
        };

        let status = row.status
            .filter(|status| !status.is_empty())
            .unwrap_or_else(|| STATUS_UNCLAIMED.to_owned());

        Self {
            id: row.id,
            uid: row.uid,
            tags: row.tags.0,
            description: row.description,
            location: row.location,
            date_lost: row.date_lost,
            date_found: row.date_found,
            phone_number: row.phone_number,
            status,
            image_paths: row.image_paths.0,
            location_lng_lat,
            created_at: row.created_at,
        }
    }
}

/// Stores a new incident into the database.
pub async fn store_incident(tx: &mut Transaction<'_, Sqlite>, item: &Incident) -> Result<()> {
    sqlx::query("INSERT INTO lf_incident (id, uid, tags, description, location, date_lost, date_found, phone_number, status, image_paths, latitude, longitude, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)")
        .bind(item.id)
        .bind(&item.uid)
        .bind(Json(&item.tags))
        .bind(&item.description)
        .bind(&item.location)
        .bind(item.date_lost)
        .bind(item.date_found)
        .bind(&item.phone_number)
        .bind(&item.status)
        .bind(Json(&item.image_paths))
        .bind(item.location_lng_lat.map(|pos| pos.lat))
        .bind(item.location_lng_lat.map(|pos| pos.lng))
        .bind(item.created_at)
        .execute(tx.deref_mut())
        .await?;

    Ok(())
}

/// Writes all mutable fields of an existing incident.
pub async fn update_incident(tx: &mut Transaction<'_, Sqlite>, item: &Incident) -> Result<bool> {
    let result = sqlx::query("UPDATE lf_incident SET tags=?, description=?, location=?, date_found=?, phone_number=?, status=?, image_paths=?, latitude=?, longitude=? WHERE id=?")
        .bind(Json(&item.tags))
        .bind(&item.description)
        .bind(&item.location)
        .bind(item.date_found)
        .bind(&item.phone_number)
        .bind(&item.status)
        .bind(Json(&item.image_paths))
        .bind(item.location_lng_lat.map(|pos| pos.lat))
        .bind(item.location_lng_lat.map(|pos| pos.lng))
        .bind(item.id)
        .execute(tx.deref_mut())
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn read_incident(tx: &mut Transaction<'_, Sqlite>, id: IncidentId) -> Result<Option<Incident>> {
    let row: Option<IncidentRow> = sqlx::query_as("SELECT * FROM lf_incident WHERE id=?")
        .bind(id)
        .fetch_optional(tx.deref_mut())
        .await?;

    Ok(row.map(Incident::from))
}

/// Reads up to `limit` incidents, newest `date_lost` first. The id breaks ties between
/// incidents of the same day, so that a cursor always names a single position.
pub async fn query_incidents(tx: &mut Transaction<'_, Sqlite>, start_after: Option<&Cursor>, limit: u32) -> Result<Vec<Incident>> {
    let rows: Vec<IncidentRow> = match start_after {
        None => {
            sqlx::query_as("SELECT * FROM lf_incident ORDER BY date_lost DESC, id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(tx.deref_mut())
                .await?
        }

        Some(cursor) => {
            sqlx::query_as("SELECT * FROM lf_incident WHERE (date_lost, id) < (?, ?) ORDER BY date_lost DESC, id DESC LIMIT ?")
                .bind(cursor.date_lost)
                .bind(cursor.id)
                .bind(limit)
                .fetch_all(tx.deref_mut())
                .await?
        }
    };

    Ok(rows.into_iter().map(Incident::from).collect())
}

pub async fn incidents_by_uid(tx: &mut Transaction<'_, Sqlite>, uid: &str) -> Result<Vec<Incident>> {
    let rows: Vec<IncidentRow> = sqlx::query_as("SELECT * FROM lf_incident WHERE uid=? ORDER BY date_lost DESC, id DESC")
        .bind(uid)
        .fetch_all(tx.deref_mut())
        .await?;

    Ok(rows.into_iter().map(Incident::from).collect())
}

pub async fn delete_incident(tx: &mut Transaction<'_, Sqlite>, id: IncidentId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM lf_incident WHERE id=?")
        .bind(id)
        .execute(tx.deref_mut())
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
pub async fn memory() -> SqlitePool {
    // a single connection, every new connection would open a fresh in-memory database
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    sqlx::migrate!().run(&db).await.unwrap();
    db
}
