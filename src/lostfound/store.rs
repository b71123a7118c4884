use std::num::NonZeroU32;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::lostfound::feed::{Cursor, IncidentSource};
use crate::lostfound::report::{self, IncidentUpdate, NewIncident};
use crate::lostfound::{db, Comment, CommentId, Incident, IncidentId, LatLng, STATUS_UNCLAIMED};

/// Incidents and their comments, backed by the database.
#[derive(Clone)]
pub struct IncidentStore {
    db: SqlitePool,
}

impl IncidentStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Stores a new, already validated report for the given user.
    #[instrument(skip_all, fields(uid))]
    pub async fn create(&self, uid: &str, report: &NewIncident) -> Result<Incident> {
        let incident = Incident {
            id: IncidentId::random(),
            uid: uid.to_owned(),
            tags: report.unique_tags(),
            description: Some(report.description.trim().to_owned()),
            location: Some(report.location.clone()),
            date_lost: report.date_lost.unwrap_or_else(|| Utc::now().date_naive()),
            date_found: report.date_found,
            phone_number: Some(report.phone_number.trim().to_owned()),
            status: STATUS_UNCLAIMED.to_owned(),
            image_paths: Vec::new(),
            location_lng_lat: None,
            created_at: Utc::now(),
        };

        let mut tx = self.db.begin().await?;
        db::store_incident(&mut tx, &incident).await?;
        tx.commit().await?;

        info!("Reported incident {}: {}", incident.id, incident);

        Ok(incident)
    }

    #[instrument(skip_all, fields(% id))]
    pub async fn get(&self, id: IncidentId) -> Result<Option<Incident>> {
        let mut tx = self.db.begin().await?;
        db::read_incident(&mut tx, id).await
    }

    /// Applies an already validated update. Returns the new state of the incident,
    /// or `None` if it does not exist (anymore).
    #[instrument(skip_all, fields(% id))]
    pub async fn update(&self, id: IncidentId, update: &IncidentUpdate) -> Result<Option<Incident>> {
        self.modify(id, |incident| {
            if let Some(status) = &update.status {
                incident.status = status.trim().to_owned();
            }

            if let Some(description) = &update.description {
                incident.description = Some(description.trim().to_owned());
            }

            if let Some(date_found) = update.date_found {
                incident.date_found = Some(date_found);
            }

            if let Some(phone_number) = &update.phone_number {
                incident.phone_number = Some(phone_number.trim().to_owned());
            }

            Ok(())
        }).await
    }

    #[instrument(skip_all, fields(% id))]
    pub async fn set_location(&self, id: IncidentId, position: LatLng) -> Result<Option<Incident>> {
        self.modify(id, |incident| {
            incident.location_lng_lat = Some(position);
            Ok(())
        }).await
    }

    /// Appends a photo reference. Uploading a photo with the same name again
    /// replaces the stored object and keeps the reference where it was.
    /// Fails with [report::Invalid] if the incident already has all its photos.
    #[instrument(skip_all, fields(% id, path))]
    pub async fn add_image_path(&self, id: IncidentId, path: &str) -> Result<Option<Incident>> {
        self.modify(id, |incident| {
            report::check_photo_limit(&incident.image_paths, path)?;

            if !incident.image_paths.iter().any(|p| p == path) {
                incident.image_paths.push(path.to_owned());
            }

            Ok(())
        }).await
    }

    /// Reads, changes and writes back an incident. A failing change rolls back.
    async fn modify(&self, id: IncidentId, change: impl FnOnce(&mut Incident) -> Result<()>) -> Result<Option<Incident>> {
        // take the write lock up front, concurrent changes must see each others result
        let mut tx = self.db.begin_with("BEGIN IMMEDIATE").await?;

        let Some(mut incident) = db::read_incident(&mut tx, id).await? else {
            return Ok(None);
        };

        change(&mut incident)?;
        db::update_incident(&mut tx, &incident).await?;
        tx.commit().await?;

        Ok(Some(incident))
    }

    /// Deletes an incident together with its comments.
    #[instrument(skip_all, fields(% id))]
    pub async fn delete(&self, id: IncidentId) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        let comments = db::comment::delete_for_incident(&mut tx, id).await?;
        let deleted = db::delete_incident(&mut tx, id).await?;
        tx.commit().await?;

        if deleted {
            info!("Deleted incident {} and {} comments", id, comments);
        }

        Ok(deleted)
    }

    /// All incidents reported by a user, newest first.
    #[instrument(skip_all, fields(uid))]
    pub async fn by_uid(&self, uid: &str) -> Result<Vec<Incident>> {
        let mut tx = self.db.begin().await?;
        db::incidents_by_uid(&mut tx, uid).await
    }

    #[instrument(skip_all, fields(% incident, uid))]
    pub async fn add_comment(&self, incident: IncidentId, uid: &str, text: &str) -> Result<Comment> {
        let comment = Comment {
            id: CommentId::random(),
            incident,
            uid: uid.to_owned(),
            text: text.trim().to_owned(),
            timestamp: Utc::now(),
        };

        let mut tx = self.db.begin().await?;
        db::comment::store(&mut tx, &comment).await?;
        tx.commit().await?;

        Ok(comment)
    }

    #[instrument(skip_all, fields(% incident))]
    pub async fn comments(&self, incident: IncidentId) -> Result<Vec<Comment>> {
        let mut tx = self.db.begin().await?;
        db::comment::load_for_incident(&mut tx, incident).await
    }
}

#[async_trait]
impl IncidentSource for IncidentStore {
    async fn query(&self, start_after: Option<&Cursor>, limit: NonZeroU32) -> Result<Vec<Incident>> {
        let mut tx = self.db.begin().await?;
        db::query_incidents(&mut tx, start_after, limit.get()).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::NaiveDate;

    use super::*;

    fn report(description: &str, date_lost: NaiveDate) -> NewIncident {
        NewIncident {
            tags: vec!["Phones".into()],
            description: description.into(),
            location: "Kitwe".into(),
            date_lost: Some(date_lost),
            date_found: None,
            phone_number: "0966000111".into(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    async fn page(store: &IncidentStore, cursor: Option<&Cursor>, limit: u32) -> Vec<Incident> {
        store.query(cursor, NonZeroU32::new(limit).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn stores_and_reads_incidents() {
        let store = IncidentStore::new(db::memory().await);

        let created = store.create("alice", &report("  Black phone ", day(3))).await.unwrap();
        assert_eq!(created.status, STATUS_UNCLAIMED);
        assert_eq!(created.description.as_deref(), Some("Black phone"));

        let read = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(read.id, created.id);
        assert_eq!(read.uid, "alice");
        assert_eq!(read.tags, vec!["Phones".to_owned()]);
        assert_eq!(read.date_lost, day(3));
        assert!(read.image_paths.is_empty());
        assert!(read.location_lng_lat.is_none());

        assert!(store.get(IncidentId::random()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pages_are_ordered_and_disjoint() {
        let store = IncidentStore::new(db::memory().await);

        // several incidents share a day, the id decides their order
        for (n, d) in [(1, 1), (2, 5), (3, 5), (4, 5), (5, 2), (6, 9), (7, 5)] {
            store.create("alice", &report(&format!("item {}", n), day(d))).await.unwrap();
        }

        let mut cursor = None;
        let mut seen = Vec::new();

        loop {
            let items = page(&store, cursor.as_ref(), 2).await;
            if items.is_empty() {
                break;
            }

            cursor = items.last().map(Cursor::from);
            seen.extend(items);
        }

        assert_eq!(seen.len(), 7);
        assert_eq!(seen.iter().map(|i| i.id).collect::<HashSet<_>>().len(), 7);
        assert!(seen.windows(2).all(|w| w[0].date_lost >= w[1].date_lost));
        assert_eq!(seen[0].date_lost, day(9));
        assert_eq!(seen[6].date_lost, day(1));
    }

    #[tokio::test]
    async fn updates_and_pins() {
        let store = IncidentStore::new(db::memory().await);
        let incident = store.create("alice", &report("Keys", day(1))).await.unwrap();

        let update = IncidentUpdate { status: Some("Claimed".into()), date_found: Some(day(4)), ..Default::default() };
        let updated = store.update(incident.id, &update).await.unwrap().unwrap();
        assert_eq!(updated.status, "Claimed");
        assert_eq!(updated.date_found, Some(day(4)));
        assert_eq!(updated.description.as_deref(), Some("Keys"));

        let pin = LatLng::new(-12.8, 28.2).unwrap();
        store.set_location(incident.id, pin).await.unwrap();

        store.add_image_path(incident.id, "IncidentsPhotos/x/a.jpg").await.unwrap();
        store.add_image_path(incident.id, "IncidentsPhotos/x/b.jpg").await.unwrap();
        store.add_image_path(incident.id, "IncidentsPhotos/x/a.jpg").await.unwrap();

        let read = store.get(incident.id).await.unwrap().unwrap();
        assert_eq!(read.location_lng_lat, Some(pin));
        assert_eq!(read.image_paths, vec!["IncidentsPhotos/x/a.jpg".to_owned(), "IncidentsPhotos/x/b.jpg".to_owned()]);
        assert_eq!(read.status, "Claimed");

        assert!(store.update(IncidentId::random(), &update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn photo_limit_is_checked_when_storing() {
        let store = IncidentStore::new(db::memory().await);
        let incident = store.create("alice", &report("Backpack", day(1))).await.unwrap();

        for n in 1..=report::MAX_IMAGES {
            let path = format!("IncidentsPhotos/{}/{}.jpg", incident.id, n);
            store.add_image_path(incident.id, &path).await.unwrap();
        }

        // one photo too many
        let path = format!("IncidentsPhotos/{}/extra.jpg", incident.id);
        let err = store.add_image_path(incident.id, &path).await.unwrap_err();
        assert!(err.downcast_ref::<report::Invalid>().is_some());

        // replacing a photo at the limit is fine
        let path = format!("IncidentsPhotos/{}/3.jpg", incident.id);
        let read = store.add_image_path(incident.id, &path).await.unwrap().unwrap();
        assert_eq!(read.image_paths.len(), report::MAX_IMAGES);

        let read = store.get(incident.id).await.unwrap().unwrap();
        assert_eq!(read.image_paths.len(), report::MAX_IMAGES);
    }

    #[tokio::test]
    async fn concurrent_uploads_respect_the_photo_limit() {
        let store = IncidentStore::new(db::memory().await);
        let incident = store.create("alice", &report("Camera", day(1))).await.unwrap();

        for n in 1..report::MAX_IMAGES {
            let path = format!("IncidentsPhotos/{}/{}.jpg", incident.id, n);
            store.add_image_path(incident.id, &path).await.unwrap();
        }

        let a = format!("IncidentsPhotos/{}/a.jpg", incident.id);
        let b = format!("IncidentsPhotos/{}/b.jpg", incident.id);

        let (a, b) = tokio::join!(
            store.add_image_path(incident.id, &a),
            store.add_image_path(incident.id, &b),
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);

        let read = store.get(incident.id).await.unwrap().unwrap();
        assert_eq!(read.image_paths.len(), report::MAX_IMAGES);
    }

    #[tokio::test]
    async fn delete_removes_comments() {
        let store = IncidentStore::new(db::memory().await);
        let incident = store.create("alice", &report("Umbrella", day(2))).await.unwrap();

        store.add_comment(incident.id, "bob", "I think I saw it").await.unwrap();
        store.add_comment(incident.id, "carol", "  Found it at the station ").await.unwrap();

        let comments = store.comments(incident.id).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].uid, "bob");
        assert_eq!(comments[1].text, "Found it at the station");

        assert!(store.delete(incident.id).await.unwrap());
        assert!(!store.delete(incident.id).await.unwrap());
        assert!(store.get(incident.id).await.unwrap().is_none());
        assert!(store.comments(incident.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_incidents_of_a_user() {
        let store = IncidentStore::new(db::memory().await);
        store.create("alice", &report("Bag", day(1))).await.unwrap();
        store.create("bob", &report("Books", day(2))).await.unwrap();
        store.create("alice", &report("Shoes", day(3))).await.unwrap();

        let mine = store.by_uid("alice").await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].description.as_deref(), Some("Shoes"));
    }
}
