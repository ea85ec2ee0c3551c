use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::model::Coords;
use crate::net::PageSource;
use crate::settings::Settings;

/// Free-text search returning candidate coordinates, best match first.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Coords>>;
}

// ── Nominatim ──

pub struct Nominatim {
    http: Arc<dyn PageSource>,
    settings: Settings,
}

#[derive(Deserialize)]
struct NominatimHit {
    lat: String,
    lon: String,
}

impl Nominatim {
    pub fn new(http: Arc<dyn PageSource>, settings: Settings) -> Self {
        Nominatim { http, settings }
    }
}

#[async_trait]
impl Geocoder for Nominatim {
    async fn search(&self, query: &str) -> Result<Vec<Coords>> {
        let params = [("format", "json".to_string()), ("q", query.to_string())];
        let body = self
            .http
            .get_text(&self.settings.geocode_url, &params, self.settings.geocode_timeout())
            .await?;
        let hits: Vec<NominatimHit> =
            serde_json::from_str(&body).with_context(|| format!("Bad geocoder reply for {:?}", query))?;
        hits.into_iter()
            .map(|h| {
                Ok(Coords {
                    lat: h.lat.parse().with_context(|| format!("Bad latitude {:?}", h.lat))?,
                    lon: h.lon.parse().with_context(|| format!("Bad longitude {:?}", h.lon))?,
                })
            })
            .collect()
    }
}

// ── Resolution ──

/// Queries tried for a place: the full name, then the part before the first hyphen so
/// "Horní Ves - Dolní Ves" falls back to "Horní Ves".
fn candidates(place: &str) -> Vec<&str> {
    let mut out = vec![place.trim()];
    if let Some((head, _)) = place.split_once('-') {
        let head = head.trim();
        if !head.is_empty() {
            out.push(head);
        }
    }
    out
}

/// Resolve one place name. `Ok(None)` means the geocoder knows no such place.
pub async fn resolve(geocoder: &dyn Geocoder, place: &str, country: &str) -> Result<Option<Coords>> {
    for name in candidates(place) {
        let hits = geocoder.search(&format!("{}, {}", name, country)).await?;
        if let Some(first) = hits.into_iter().next() {
            return Ok(Some(first));
        }
    }
    Ok(None)
}

/// Resolve every place concurrently, at most `concurrency` lookups in flight. Misses and
/// errors are logged and left out; they never stop the other lookups.
pub async fn resolve_all(
    geocoder: Arc<dyn Geocoder>,
    places: Vec<String>,
    country: &str,
    concurrency: usize,
) -> HashMap<String, Coords> {
    let total = places.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} places") {
        pb.set_style(style.progress_chars("=> "));
    }

    // Workers only send results back; the map is filled here.
    let (tx, mut rx) = tokio::sync::mpsc::channel(concurrency.max(1) * 2);

    for place in places {
        let geocoder = Arc::clone(&geocoder);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let country = country.to_string();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = resolve(geocoder.as_ref(), &place, &country).await;
            let _ = tx.send((place, result)).await;
        });
    }

    drop(tx);

    let mut resolved = HashMap::new();
    let mut misses = 0usize;
    while let Some((place, result)) = rx.recv().await {
        match result {
            Ok(Some(coords)) => {
                info!("{} -> {}, {}", place, coords.lat, coords.lon);
                resolved.insert(place, coords);
            }
            Ok(None) => {
                warn!("Failed to find coords for '{}'", place);
                misses += 1;
            }
            Err(e) => {
                warn!("Geocoding '{}' failed: {:#}", place, e);
                misses += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Geocoded {} places ({} resolved, {} missed)", total, resolved.len(), misses);
    resolved
}

// ── Cache ──

/// Place name to coordinates, persisted between runs as one JSON object.
#[derive(Debug, Default)]
pub struct CoordCache {
    path: PathBuf,
    entries: BTreeMap<String, Coords>,
}

impl CoordCache {
    /// Load the cache, starting empty if the file is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring corrupt place cache {:?}: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) => {
                info!("No place cache at {:?} ({}), starting empty", path, e);
                BTreeMap::new()
            }
        };
        CoordCache { path, entries }
    }

    pub fn get(&self, place: &str) -> Option<Coords> {
        self.entries.get(place).copied()
    }

    pub fn contains(&self, place: &str) -> bool {
        self.entries.contains_key(place)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names from `places` that still need a lookup.
    pub fn missing<'a, I>(&self, places: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        places
            .into_iter()
            .filter(|p| !self.contains(p))
            .cloned()
            .collect()
    }

    pub fn extend(&mut self, resolved: HashMap<String, Coords>) {
        self.entries.extend(resolved);
    }

    /// Rewrite the whole cache file. The new contents replace the old file in one rename.
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
        serde_json::to_writer(&mut tmp, &self.entries)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write place cache {:?}", self.path))?;
        Ok(())
    }
}
