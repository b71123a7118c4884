//! Reads the incident feed page by page.
//!
//! Pages are ordered by `date_lost`, newest first. Each page is fetched strictly after a
//! [Cursor] naming the last record of the previous page. There is no snapshot across pages:
//! records inserted or deleted between two fetches at the page boundary may show up twice
//! or not at all.

use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use tracing::{debug, instrument, warn};

use crate::lostfound::objects::ObjectResolver;
use crate::lostfound::{Incident, IncidentId};

/// Maximum number of image lookups in flight while resolving a page.
const RESOLVE_CONCURRENCY: usize = 8;

/// Position of a record in the feed, taken from the last record of a page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[derive(SerializeDisplay, DeserializeFromStr)]
pub struct Cursor {
    pub date_lost: NaiveDate,
    pub id: IncidentId,
}

impl From<&Incident> for Cursor {
    fn from(incident: &Incident) -> Self {
        Self { date_lost: incident.date_lost, id: incident.id }
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.date_lost.format("%Y-%m-%d"), self.id)
    }
}

impl FromStr for Cursor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (date, id) = s.split_once('.').ok_or_else(|| anyhow!("malformed cursor {:?}", s))?;

        Ok(Self {
            date_lost: NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .with_context(|| format!("cursor date {:?}", date))?,
            id: id.parse()?,
        })
    }
}

/// The backing store of the feed.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Returns up to `limit` incidents ordered by `date_lost` descending, ties broken by
    /// id descending, starting strictly after `start_after`.
    async fn query(&self, start_after: Option<&Cursor>, limit: NonZeroU32) -> Result<Vec<Incident>>;
}

/// An incident with its image references turned into fetchable urls.
#[derive(Clone, Debug, Serialize)]
pub struct ResolvedIncident {
    #[serde(flatten)]
    pub incident: Incident,

    /// Urls of the images that could be resolved, in the order of `image_paths`.
    pub images: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub items: Vec<ResolvedIncident>,
    pub cursor: Option<Cursor>,

    /// True if the page was full. The next page might still turn out to be empty.
    pub has_more: bool,
}

/// Fetches the page following `cursor`, or the first page if no cursor is given.
///
/// A failing query fails the page. An image that cannot be resolved is logged
/// and left out of its incident's `images`.
#[instrument(skip_all, fields(% page_size, ? cursor))]
pub async fn fetch_page<S, R>(source: &S, resolver: &R, page_size: NonZeroU32, cursor: Option<&Cursor>) -> Result<FeedPage>
where
    S: IncidentSource + ?Sized,
    R: ObjectResolver + ?Sized,
{
    let incidents = source
        .query(cursor, page_size)
        .await
        .context("query incidents")?;

    let has_more = incidents.len() == page_size.get() as usize;

    // the cursor stays in place if there was nothing to read
    let cursor = incidents.last().map(Cursor::from).or(cursor.copied());

    debug!("Fetched {} incidents, has_more={}", incidents.len(), has_more);

    let items = resolve_all(resolver, incidents).await;
    Ok(FeedPage { items, cursor, has_more })
}

/// Appends a freshly fetched page to the records already loaded.
pub fn append_page(mut existing: Vec<ResolvedIncident>, page: Vec<ResolvedIncident>) -> Vec<ResolvedIncident> {
    existing.extend(page);
    existing
}

/// Resolves the images of all given incidents. Lookups run concurrently,
/// the order of incidents and of images within each incident is kept.
pub async fn resolve_all<R>(resolver: &R, incidents: Vec<Incident>) -> Vec<ResolvedIncident>
where
    R: ObjectResolver + ?Sized,
{
    let lookups = incidents
        .iter()
        .enumerate()
        .flat_map(|(idx, incident)| {
            incident.image_paths
                .iter()
                .map(move |path| resolve_one(resolver, idx, incident.id, path))
        })
        .collect::<Vec<_>>();

    let resolved = stream::iter(lookups)
        .buffered(RESOLVE_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

    let mut images = vec![Vec::new(); incidents.len()];
    for (idx, url) in resolved {
        if let Some(url) = url {
            images[idx].push(url);
        }
    }

    incidents
        .into_iter()
        .zip(images)
        .map(|(incident, images)| ResolvedIncident { incident, images })
        .collect()
}

async fn resolve_one<R>(resolver: &R, idx: usize, id: IncidentId, path: &str) -> (usize, Option<String>)
where
    R: ObjectResolver + ?Sized,
{
    match resolver.resolve(path).await {
        Ok(url) => (idx, Some(url)),
        Err(err) => {
            warn!("Dropping image of incident {}: {}", id, err);
            (idx, None)
        }
    }
}

/// Accumulates the feed across "load more" requests.
///
/// [FeedReader::load_more] borrows the reader mutably for the whole fetch, so a second
/// fetch can only start once the previous one has finished.
pub struct FeedReader<S, R> {
    source: S,
    resolver: R,
    page_size: NonZeroU32,
    items: Vec<ResolvedIncident>,
    cursor: Option<Cursor>,
    has_more: bool,
}

impl<S, R> FeedReader<S, R>
where
    S: IncidentSource,
    R: ObjectResolver,
{
    pub fn new(source: S, resolver: R, page_size: NonZeroU32) -> Self {
        Self {
            source,
            resolver,
            page_size,
            items: Vec::new(),
            cursor: None,
            has_more: true,
        }
    }

    /// Fetches the next page and appends it. Returns the number of records appended.
    /// On error the loaded records, the cursor and `has_more` are left untouched.
    pub async fn load_more(&mut self) -> Result<usize> {
        let page = fetch_page(&self.source, &self.resolver, self.page_size, self.cursor.as_ref()).await?;

        let count = page.items.len();
        self.items = append_page(std::mem::take(&mut self.items), page.items);
        self.cursor = page.cursor;
        self.has_more = page.has_more;

        Ok(count)
    }

    pub fn items(&self) -> &[ResolvedIncident] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ResolvedIncident> {
        self.items
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }
}
