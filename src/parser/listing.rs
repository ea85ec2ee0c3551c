use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::fields::{clean_text, parse_name_age, parse_price_range};
use crate::model::{Listing, ListingKind};

static ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody#snippet-grid-tbody > tr").unwrap());
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody#snippet-grid-tbody").unwrap());

const DESCRIPTION_SUFFIX: &str = " Proč si to přeji";
const READ_MORE: &str = " ... více\u{a0}>>";

/// Listings gathered over a run, keyed by place name.
pub type PlaceListings = BTreeMap<String, Vec<Listing>>;

/// Ids already seen per place during the current run.
pub type SeenIds = HashMap<String, HashSet<u64>>;

/// What one listing page told us about the pages after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page held a full set of rows; ask for the next one.
    Full,
    /// Short page, missing table or a row without an id: nothing more to fetch.
    Exhausted,
    /// An id reappeared for its place, so the site pagination overlapped.
    Duplicate(u64),
}

impl PageOutcome {
    pub fn has_more(self) -> bool {
        self == PageOutcome::Full
    }
}

/// Walk the listing rows of one page, appending normalized listings to `out`.
pub fn extract_page(
    html: &str,
    kind: ListingKind,
    per_page: usize,
    seen: &mut SeenIds,
    out: &mut PlaceListings,
) -> PageOutcome {
    let document = Html::parse_document(html);
    if document.select(&BODY).next().is_none() {
        warn!("Listing table missing on {} page", kind);
        return PageOutcome::Exhausted;
    }

    let rows: Vec<ElementRef> = document.select(&ROWS).collect();
    for row in &rows {
        let Some(raw_id) = row.value().attr("data-id") else {
            debug!("Row without data-id, end of {} listings", kind);
            return PageOutcome::Exhausted;
        };
        let Ok(id) = raw_id.trim().parse::<u64>() else {
            warn!("Unparsable data-id {:?} on {} page", raw_id, kind);
            return PageOutcome::Exhausted;
        };

        let place = cell_text(row, "col-place", None, None);
        if !seen.entry(place.clone()).or_default().insert(id) {
            warn!("Wish {} in {} seen twice, stopping {} pagination", id, place, kind);
            return PageOutcome::Duplicate(id);
        }

        let listing = build_listing(row, id, kind, place);
        debug!(?listing, "parsed wish");
        out.entry(listing.place.clone()).or_default().push(listing);
    }

    if rows.len() >= per_page {
        PageOutcome::Full
    } else {
        PageOutcome::Exhausted
    }
}

fn build_listing(row: &ElementRef, id: u64, kind: ListingKind, place: String) -> Listing {
    let (beneficiary_name, beneficiary_age) = parse_name_age(&cell_text(row, "col-name_", None, None));

    let price_text = cell_text(row, "col-price", None, None);
    let price_range = parse_price_range(&price_text).unwrap_or_else(|e| {
        warn!("Wish {}: {}", id, e);
        None
    });

    Listing {
        id,
        kind,
        beneficiary_name,
        beneficiary_age,
        item_description: cell_text(row, "col-description", Some(DESCRIPTION_SUFFIX), None),
        item_rationale: cell_text(row, "col-descriptionWhy", None, Some(READ_MORE)),
        place,
        price_range,
    }
}

/// Cleaned text of the first `td` with `class` in the row, empty if the cell is absent.
fn cell_text(row: &ElementRef, class: &str, suffix: Option<&str>, remove: Option<&str>) -> String {
    row.children()
        .filter_map(ElementRef::wrap)
        .find(|td| td.value().name() == "td" && td.value().classes().any(|c| c == class))
        .map(|td| clean_text(td.text(), suffix, remove))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PriceRange;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn full_page_is_parsed() {
        let mut seen = SeenIds::new();
        let mut out = PlaceListings::new();
        let outcome = extract_page(&fixture("wishes_page"), ListingKind::Gift, 3, &mut seen, &mut out);
        assert_eq!(outcome, PageOutcome::Full);

        let brno = &out["Brno"];
        assert_eq!(brno.len(), 2);
        let marie = &brno[0];
        assert_eq!(marie.id, 101);
        assert_eq!(marie.beneficiary_name, "Marie Nováková");
        assert_eq!(marie.beneficiary_age, 87);
        assert_eq!(marie.item_description, "Teplá deka");
        assert_eq!(marie.item_rationale, "V zimě mi bývá zima.");
        assert_eq!(marie.price_range, Some(PriceRange(0, 500)));
        assert_eq!(marie.kind, ListingKind::Gift);

        let josef = &brno[1];
        assert_eq!(josef.beneficiary_age, 0);
        assert_eq!(josef.price_range, None);

        let ves = &out["Horní Ves - Dolní Ves"];
        assert_eq!(ves[0].price_range, Some(PriceRange(2000, 1_000_000)));
    }

    #[test]
    fn short_page_ends_pagination() {
        let mut seen = SeenIds::new();
        let mut out = PlaceListings::new();
        let outcome = extract_page(&fixture("wishes_page"), ListingKind::Gift, 50, &mut seen, &mut out);
        assert_eq!(outcome, PageOutcome::Exhausted);
        assert_eq!(out.values().map(Vec::len).sum::<usize>(), 3);
    }

    #[test]
    fn repeated_page_is_flagged() {
        let mut seen = SeenIds::new();
        let mut out = PlaceListings::new();
        let page = fixture("wishes_page");
        extract_page(&page, ListingKind::Gift, 3, &mut seen, &mut out);
        let outcome = extract_page(&page, ListingKind::Gift, 3, &mut seen, &mut out);
        assert_eq!(outcome, PageOutcome::Duplicate(101));
        assert_eq!(out["Brno"].len(), 2);
    }

    #[test]
    fn row_without_id_stops_early() {
        let mut seen = SeenIds::new();
        let mut out = PlaceListings::new();
        let outcome = extract_page(&fixture("wishes_empty"), ListingKind::Experience, 1, &mut seen, &mut out);
        assert_eq!(outcome, PageOutcome::Exhausted);
        assert!(out.is_empty());
    }

    #[test]
    fn missing_table_is_end_of_data() {
        let mut seen = SeenIds::new();
        let mut out = PlaceListings::new();
        let outcome = extract_page("<html><body>Údržba</body></html>", ListingKind::Gift, 1, &mut seen, &mut out);
        assert_eq!(outcome, PageOutcome::Exhausted);
    }
}
