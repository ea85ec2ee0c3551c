use std::collections::HashSet;

use crate::model::{Metric, Series, Snapshot, TimePoint};
use crate::parser::PlaceListings;

/// Drop repeated wish ids inside one snapshot, keeping the first. Overlapping pages during a
/// fetch can list the same wish twice; places left without wishes are removed.
pub fn dedup_listings(snapshot: &mut Snapshot) {
    let mut seen = HashSet::new();
    for place in &mut snapshot.places {
        place.wishes.retain(|w| seen.insert(w.id));
    }
    snapshot.places.retain(|p| !p.wishes.is_empty());
}

/// Normalize a loaded history: per-snapshot dedup, then a stable sort by timestamp.
pub fn merge(mut snapshots: Vec<Snapshot>) -> Vec<Snapshot> {
    for s in &mut snapshots {
        dedup_listings(s);
    }
    snapshots.sort_by_key(|s| s.timestamp);
    snapshots
}

/// One point per snapshot that reports `metric`. Snapshots without it are skipped, not zeroed.
pub fn series_for(snapshots: &[Snapshot], metric: Metric) -> Series {
    snapshots
        .iter()
        .filter_map(|s| {
            s.stats.get(metric).map(|y| TimePoint { t: s.timestamp, y })
        })
        .collect()
}

/// Every wish ever listed, by place, first sighting wins. Expects a `merge`d history.
pub fn merge_places(snapshots: &[Snapshot]) -> PlaceListings {
    let mut seen = HashSet::new();
    let mut out = PlaceListings::new();
    for place in snapshots.iter().flat_map(|s| &s.places) {
        let fresh: Vec<_> = place
            .wishes
            .iter()
            .filter(|w| seen.insert(w.id))
            .cloned()
            .collect();
        if !fresh.is_empty() {
            out.entry(place.name.clone()).or_default().extend(fresh);
        }
    }
    out
}
