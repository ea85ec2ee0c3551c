use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Upper bound stored for "nad N Kč" price cells.
pub const PRICE_UNBOUNDED: u32 = 1_000_000;

// ── Listings ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum ListingKind {
    #[serde(rename = "dárek")]
    Gift,
    #[serde(rename = "zážitek")]
    Experience,
}

impl ListingKind {
    /// Numeric `type` query parameter used by the site.
    pub fn site_type(self) -> u8 {
        match self {
            ListingKind::Gift => 2,
            ListingKind::Experience => 3,
        }
    }

    /// Path segment under `/prani/`.
    pub fn path(self) -> &'static str {
        match self {
            ListingKind::Gift => "darek",
            ListingKind::Experience => "zazitek",
        }
    }
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange(pub u32, pub u32);

/// One wish scraped from a listing row. Field names on the wire match the map front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: u64,
    #[serde(rename = "typ")]
    pub kind: ListingKind,
    #[serde(rename = "name")]
    pub beneficiary_name: String,
    #[serde(rename = "age")]
    pub beneficiary_age: u32,
    #[serde(rename = "thing")]
    pub item_description: String,
    #[serde(rename = "text")]
    pub item_rationale: String,
    pub place: String,
    #[serde(rename = "price")]
    pub price_range: Option<PriceRange>,
}

// ── Places ──

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coords {
    pub lat: f64,
    pub lon: f64,
}

impl Serialize for Coords {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.lat, self.lon].serialize(serializer)
    }
}

/// Geocoders hand out coordinates as strings; older caches kept them that way.
#[derive(Deserialize)]
#[serde(untagged)]
enum CoordValue {
    Num(f64),
    Text(String),
}

impl CoordValue {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            CoordValue::Num(n) => Ok(n),
            CoordValue::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid coordinate {:?}", s))),
        }
    }
}

impl<'de> Deserialize<'de> for Coords {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (lat, lon) = <(CoordValue, CoordValue)>::deserialize(deserializer)?;
        Ok(Coords {
            lat: lat.into_f64()?,
            lon: lon.into_f64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceEntry {
    pub name: String,
    pub coords: Coords,
    pub wishes: Vec<Listing>,
}

// ── Snapshots ──

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub money: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inprogress: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<i64>,
}

impl Stats {
    pub fn get(&self, metric: Metric) -> Option<i64> {
        match metric {
            Metric::Money => self.money,
            Metric::Completed => self.completed,
            Metric::InProgress => self.inprogress,
            Metric::Free => self.free,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub places: Vec<PlaceEntry>,
}

/// Raw metrics tracked across the snapshot history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Money,
    Completed,
    InProgress,
    Free,
}

// ── Series ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePoint {
    pub t: i64,
    pub y: i64,
}

pub type Series = Vec<TimePoint>;

/// Chart-ready aggregate written by the `stats` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsDocument {
    pub timestamp: i64,
    pub money: Series,
    pub money_inc: Series,
    pub completed: Series,
    pub inprogress: Series,
    pub free: Series,
}
