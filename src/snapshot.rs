use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::geocode::CoordCache;
use crate::model::{PlaceEntry, Snapshot, Stats};
use crate::parser::PlaceListings;

const SNAPSHOT_EXT: &str = ".json";
const BUNDLE_EXT: &str = ".json.gz";

/// Assemble the per-run document. Places the cache cannot place on the map are left out;
/// their wishes still count in the landing page stats.
pub fn build(timestamp: i64, stats: Stats, listings: PlaceListings, cache: &CoordCache) -> Snapshot {
    let mut unplaced = 0usize;
    let places = listings
        .into_iter()
        .filter_map(|(name, wishes)| match cache.get(&name) {
            Some(coords) => Some(PlaceEntry { name, coords, wishes }),
            None => {
                unplaced += wishes.len();
                None
            }
        })
        .collect();
    if unplaced > 0 {
        warn!("{} wishes have no coordinates and are left off the map", unplaced);
    }
    Snapshot {
        timestamp,
        stats,
        places,
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut w = BufWriter::new(file);
    serde_json::to_writer(&mut w, value)?;
    w.flush()?;
    Ok(())
}

/// Drop a timestamped copy into the backup directory, e.g. `backup/20241201T1830.json`.
pub fn write_backup(dir: &Path, snapshot: &Snapshot, now: DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    let path = dir.join(format!("{}{}", now.format("%Y%m%dT%H%M"), SNAPSHOT_EXT));
    write_json(&path, snapshot)?;
    Ok(path)
}

// ── History ──

/// Snapshots read from a backup directory, together with the files they came from.
pub struct History {
    pub snapshots: Vec<Snapshot>,
    pub files: Vec<PathBuf>,
}

enum Shape {
    Single,
    Bundle,
}

fn shape_of(path: &Path) -> Option<Shape> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(BUNDLE_EXT) {
        Some(Shape::Bundle)
    } else if name.ends_with(SNAPSHOT_EXT) {
        Some(Shape::Single)
    } else {
        None
    }
}

/// Read every snapshot document and bundle in `dir`. Files are visited in name order so the
/// result does not depend on directory listing order. Any unreadable document fails the load.
pub fn load_history(dir: &Path) -> Result<History> {
    if !dir.is_dir() {
        anyhow::bail!("{:?} is not a directory", dir);
    }

    let mut files: Vec<(PathBuf, Shape)> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|p| shape_of(&p).map(|s| (p, s)))
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let loaded = files
        .par_iter()
        .map(|(path, shape)| {
            let loaded = match shape {
                Shape::Single => load_single(path),
                Shape::Bundle => load_bundle(path),
            };
            loaded.with_context(|| format!("Failed to load {:?}", path))
        })
        .collect::<Result<Vec<_>>>()?;

    let snapshots: Vec<Snapshot> = loaded.into_iter().flatten().collect();
    info!("Loaded {} snapshots from {} files", snapshots.len(), files.len());
    Ok(History {
        snapshots,
        files: files.into_iter().map(|(p, _)| p).collect(),
    })
}

fn load_single(path: &Path) -> Result<Vec<Snapshot>> {
    let file = File::open(path)?;
    let snapshot = serde_json::from_reader(BufReader::new(file))?;
    Ok(vec![snapshot])
}

/// Bundles are gzip'd, one snapshot per line. Older bundles hold a single JSON array.
fn load_bundle(path: &Path) -> Result<Vec<Snapshot>> {
    let mut reader = BufReader::new(GzDecoder::new(File::open(path)?));

    let starts_with_array = {
        let buf = reader.fill_buf()?;
        buf.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'[')
    };
    if starts_with_array {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        return Ok(serde_json::from_str(&text)?);
    }

    let mut snapshots = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let snapshot: Snapshot = serde_json::from_str(&line).with_context(|| format!("line {}", n + 1))?;
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

/// Fold the whole history into a single bundle of stat records and delete the files it came
/// from. The old files are only removed once the bundle is in place under its final name; if
/// the bundle cannot be written they stay untouched.
pub fn compact(dir: &Path, snapshots: &[Snapshot], files: &[PathBuf], now: DateTime<Local>) -> Result<PathBuf> {
    let path = dir.join(format!("{}{}", now.format("%Y%m%dT%H%M"), BUNDLE_EXT));
    let tmp = dir.join(format!(".{}{}.tmp", now.format("%Y%m%dT%H%M"), BUNDLE_EXT));

    if let Err(e) = write_bundle(&tmp, snapshots) {
        let _ = fs::remove_file(&tmp);
        return Err(e.context(format!("Failed to write bundle {:?}", path)));
    }
    if let Err(e) = fs::rename(&tmp, &path) {
        let _ = fs::remove_file(&tmp);
        return Err(anyhow::Error::new(e).context(format!("Failed to move bundle to {:?}", path)));
    }

    let mut leftovers = 0usize;
    for old in files.iter().filter(|f| **f != path) {
        if let Err(e) = fs::remove_file(old) {
            warn!("Failed to remove compacted file {:?}: {}", old, e);
            leftovers += 1;
        }
    }
    if leftovers > 0 {
        anyhow::bail!("Bundle written to {:?} but {} old files could not be removed", path, leftovers);
    }
    info!("Compacted {} files into {:?}", files.len(), path);
    Ok(path)
}

fn write_bundle(path: &Path, snapshots: &[Snapshot]) -> Result<()> {
    let file = File::create(path)?;
    let mut enc = GzEncoder::new(BufWriter::new(file), Compression::default());
    for s in snapshots {
        let record = Snapshot {
            timestamp: s.timestamp,
            stats: s.stats.clone(),
            places: Vec::new(),
        };
        serde_json::to_writer(&mut enc, &record)?;
        enc.write_all(b"\n")?;
    }
    enc.finish()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    use crate::model::{Coords, Listing, ListingKind};

    fn stats(money: i64) -> Stats {
        Stats {
            money: Some(money),
            ..Stats::default()
        }
    }

    fn wish(id: u64, place: &str) -> Listing {
        Listing {
            id,
            kind: ListingKind::Gift,
            beneficiary_name: "Jan".into(),
            beneficiary_age: 80,
            item_description: "Kniha".into(),
            item_rationale: "Rád čtu".into(),
            place: place.into(),
            price_range: None,
        }
    }

    fn gz_write(path: &Path, text: &str) {
        let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    #[test]
    fn build_drops_unplaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CoordCache::load(dir.path().join("c.json"));
        cache.extend(HashMap::from([("Brno".to_string(), Coords { lat: 1.0, lon: 2.0 })]));

        let mut listings = PlaceListings::new();
        listings.insert("Brno".into(), vec![wish(1, "Brno")]);
        listings.insert("Atlantida".into(), vec![wish(2, "Atlantida")]);

        let s = build(10, stats(5), listings, &cache);
        assert_eq!(s.places.len(), 1);
        assert_eq!(s.places[0].name, "Brno");
    }

    #[test]
    fn loads_every_shape() {
        let dir = tempfile::tempdir().unwrap();
        let single = Snapshot {
            timestamp: 300,
            stats: stats(3),
            places: Vec::new(),
        };
        write_json(&dir.path().join("20241203T1000.json"), &single).unwrap();
        gz_write(
            &dir.path().join("20241201T1000.json.gz"),
            "{\"timestamp\":100,\"stats\":{\"money\":1}}\n\n{\"timestamp\":200,\"stats\":{\"money\":2}}\n",
        );
        gz_write(
            &dir.path().join("20241130T1000.json.gz"),
            "[{\"timestamp\":50,\"stats\":{\"free\":9}}]",
        );
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let history = load_history(dir.path()).unwrap();
        assert_eq!(history.files.len(), 3);
        let mut ts: Vec<i64> = history.snapshots.iter().map(|s| s.timestamp).collect();
        ts.sort();
        assert_eq!(ts, vec![50, 100, 200, 300]);
    }

    #[test]
    fn corrupt_document_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{\"timestamp\": ").unwrap();
        assert!(load_history(dir.path()).is_err());
        assert!(load_history(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn compact_replaces_files_with_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 12, 24, 18, 0, 0).unwrap();
        for (i, ts) in [100, 200].iter().enumerate() {
            let s = Snapshot {
                timestamp: *ts,
                stats: stats(*ts),
                places: vec![PlaceEntry {
                    name: "Brno".into(),
                    coords: Coords { lat: 1.0, lon: 2.0 },
                    wishes: vec![wish(i as u64, "Brno")],
                }],
            };
            write_backup(dir.path(), &s, now - chrono::Duration::hours(i as i64 + 1)).unwrap();
        }

        let history = load_history(dir.path()).unwrap();
        let bundle = compact(dir.path(), &history.snapshots, &history.files, now).unwrap();
        assert!(bundle.ends_with("20241224T1800.json.gz"));

        let after = load_history(dir.path()).unwrap();
        assert_eq!(after.files, vec![bundle]);
        assert_eq!(after.snapshots.len(), 2);
        assert!(after.snapshots.iter().all(|s| s.places.is_empty()));
    }

    #[test]
    fn failed_removal_leaves_history_readable() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 12, 24, 18, 0, 0).unwrap();
        let s = Snapshot {
            timestamp: 100,
            stats: stats(7),
            places: Vec::new(),
        };
        write_backup(dir.path(), &s, now - chrono::Duration::hours(1)).unwrap();

        let history = load_history(dir.path()).unwrap();
        let mut files = history.files.clone();
        files.push(dir.path().join("20241101T0000.json"));

        assert!(compact(dir.path(), &history.snapshots, &files, now).is_err());

        let after = load_history(dir.path()).unwrap();
        assert_eq!(after.snapshots.len(), 1);
        assert_eq!(after.snapshots[0].stats.money, Some(7));
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["20241224T1800.json.gz".to_string()]);
    }
}
