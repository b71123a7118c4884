use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use anyhow::ensure;
use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use lostfound_geo::LatLng;

pub mod config;
pub mod db;
pub mod feed;
pub mod objects;
pub mod report;
pub mod store;

/// Status of a freshly reported incident.
pub const STATUS_UNCLAIMED: &str = "Unclaimed";

/// The tags a report can be labeled with.
pub const TAGS: &[&str] = &[
    "Wallets",
    "Keys",
    "Phones",
    "Bags",
    "Laptops",
    "Watches",
    "Glasses",
    "Jewelry",
    "ID Cards",
    "Credit/Debit Cards",
    "Clothing Items",
    "Umbrellas",
    "Headphones/Earbuds",
    "Shoes",
    "Cameras",
    "Tablets",
    "Books",
    "Power Banks",
    "Documents",
    "Water Bottles",
    "Television",
];

/// A unique identifier of a stored record. The type parameter
/// keeps ids of different record types apart.
pub struct Id<T> {
    value: [u8; 8],
    _type: PhantomData<fn() -> T>,
}

pub type IncidentId = Id<Incident>;
pub type CommentId = Id<Comment>;

impl<T> Id<T> {
    /// Generates a new random id.
    pub fn random() -> Self {
        let uuid = uuid::Uuid::new_v4();

        let mut bytes = [0_u8; 8];
        bytes.copy_from_slice(&uuid.as_bytes()[..8]);
        Self::from(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value[..]
    }
}

impl<T> From<[u8; 8]> for Id<T> {
    fn from(value: [u8; 8]) -> Self {
        Self { value, _type: PhantomData }
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl<T> FromStr for Id<T> {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ensure!(s.len() == 16, "expected hex string of length 16, got {}", s.len());

        let mut bytes = [0; 8];
        hex::decode_to_slice(s, &mut bytes[..])?;

        Ok(bytes.into())
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.value))
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(|err| Error::custom(format!("parse id {:?}: {}", text, err)))
    }
}

/// A reported lost or found item.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: IncidentId,

    /// The user that reported this incident. Only this user may change it.
    pub uid: String,

    pub tags: Vec<String>,
    pub description: Option<String>,

    /// Name of the town the item was lost in.
    pub location: Option<String>,

    pub date_lost: NaiveDate,
    pub date_found: Option<NaiveDate>,
    pub phone_number: Option<String>,
    pub status: String,

    /// References into the object store, in upload order.
    pub image_paths: Vec<String>,

    /// A pin placed on the map by the reporting user.
    pub location_lng_lat: Option<LatLng>,

    pub created_at: DateTime<Utc>,
}

impl Display for Incident {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let tags = if self.tags.is_empty() { "N/A".to_owned() } else { self.tags.iter().join(", ") };

        write!(
            f,
            "{}: {} ({}, {}) [{}]",
            tags,
            or_na(&self.description),
            or_na(&self.location),
            self.date_lost,
            self.status,
        )
    }
}

fn or_na(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.is_empty()).unwrap_or("N/A")
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub incident: IncidentId,
    pub uid: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_parses_its_display_form() {
        let id = IncidentId::random();
        let parsed: IncidentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn id_rejects_garbage() {
        assert!("abc".parse::<IncidentId>().is_err());
        assert!("zzzzzzzzzzzzzzzz".parse::<IncidentId>().is_err());
    }

    #[test]
    fn display_falls_back_to_na() {
        let incident = Incident {
            id: IncidentId::from([0, 0, 0, 0, 0, 0, 0, 1]),
            uid: "alice".into(),
            tags: Vec::new(),
            description: None,
            location: Some("Lusaka".into()),
            date_lost: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            date_found: None,
            phone_number: None,
            status: STATUS_UNCLAIMED.into(),
            image_paths: Vec::new(),
            location_lng_lat: None,
            created_at: Utc::now(),
        };

        assert_eq!(incident.to_string(), "N/A: N/A (Lusaka, 2024-05-01) [Unclaimed]");
    }
}
