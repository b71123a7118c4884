use std::io::Read;
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, ensure, Result};
use arcstr::ArcStr;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

static DATA: &str = include_str!("./towns.csv");

/// Mean radius of the earth in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Creates a new coordinate, rejecting values outside of the valid degree ranges.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        ensure!((-90.0..=90.0).contains(&lat), "latitude out of range: {}", lat);
        ensure!((-180.0..=180.0).contains(&lng), "longitude out of range: {}", lng);
        Ok(Self { lat, lng })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Town {
    pub name: ArcStr,
    pub lat: f64,
    pub lng: f64,
}

impl Town {
    pub fn position(&self) -> LatLng {
        LatLng { lat: self.lat, lng: self.lng }
    }
}

/// The result of a nearest town lookup.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Nearest {
    pub name: ArcStr,
    pub lat: f64,
    pub lng: f64,
    pub distance_km: f64,
}

/// A fixed, non-empty list of named reference points.
#[derive(Clone, Debug)]
pub struct Gazetteer {
    towns: Arc<[Town]>,
}

impl Gazetteer {
    pub fn new(towns: Vec<Town>) -> Result<Self> {
        ensure!(!towns.is_empty(), "gazetteer must contain at least one town");
        Ok(Self { towns: towns.into() })
    }

    /// Reads a gazetteer from csv data with the columns `name`, `lat` and `lng`.
    pub fn from_csv(data: impl Read) -> Result<Self> {
        let mut r = csv::Reader::from_reader(data);

        let mut towns = Vec::<Town>::new();
        for record in r.deserialize() {
            let town: Town = record?;
            LatLng::new(town.lat, town.lng)?;
            towns.push(town);
        }

        Self::new(towns)
    }

    pub fn towns(&self) -> &[Town] {
        &self.towns
    }

    pub fn contains(&self, name: &str) -> bool {
        self.towns.iter().any(|town| town.name.as_str() == name)
    }

    /// Finds the town closest to the given point. If two towns are equally far away,
    /// the one listed first wins.
    pub fn nearest(&self, point: LatLng) -> Nearest {
        let closest = self.towns
            .iter()
            .map(|town| (town, haversine_km(point, town.position())))
            .min_by_key(|&(_, distance)| OrderedFloat(distance));

        match closest {
            Some((town, distance_km)) => Nearest {
                name: town.name.clone(),
                lat: town.lat,
                lng: town.lng,
                distance_km,
            },

            None => unreachable!("gazetteer is never empty"),
        }
    }
}

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    // rounding can push h just above 1 for antipodal points
    let h = h.min(1.0);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// The embedded gazetteer of zambian towns.
pub fn gazetteer() -> Result<&'static Gazetteer> {
    static GAZETTEER: OnceLock<Result<Gazetteer>> = OnceLock::new();
    GAZETTEER.get_or_init(parse).as_ref().map_err(|err| anyhow!("{:?}", err))
}

fn parse() -> Result<Gazetteer> {
    Gazetteer::from_csv(DATA.as_bytes())
}
