use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::model::{ListingKind, Stats};
use crate::net::PageSource;
use crate::parser::{self, PageOutcome, PlaceListings, SeenIds};
use crate::settings::Settings;

/// How a listing kind's pagination ended.
pub struct KindSummary {
    pub kind: ListingKind,
    /// Pages downloaded successfully.
    pub pages: u32,
    pub listings: usize,
    pub complete: bool,
}

/// Fetch the landing page counters. A dead landing page only costs us the stats.
pub async fn fetch_main_stats(source: &dyn PageSource, settings: &Settings) -> Stats {
    let url = format!("{}/", settings.base_url.trim_end_matches('/'));
    match source.get_text(&url, &[], settings.page_timeout()).await {
        Ok(html) => parser::parse_main_stats(&html),
        Err(e) => {
            warn!("Skipping main page stats: {}", e);
            Stats::default()
        }
    }
}

/// Walk the listing pages of one kind until a page comes back short. Listings land in `out`
/// as they are parsed, so a failed page still leaves everything before it usable.
pub async fn fetch_kind(
    source: &dyn PageSource,
    settings: &Settings,
    kind: ListingKind,
    seen: &mut SeenIds,
    out: &mut PlaceListings,
) -> KindSummary {
    let url = format!("{}/prani/{}", settings.base_url.trim_end_matches('/'), kind.path());
    let before: usize = out.values().map(Vec::len).sum();

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }

    let mut page = 1u32;
    let mut fetched = 0u32;
    let mut complete = true;
    loop {
        pb.set_message(format!("{} page {}", kind, page));
        let query = [
            ("type", kind.site_type().to_string()),
            ("grid-page", page.to_string()),
            ("locale", "cs".to_string()),
            ("grid-per_page", settings.per_page.to_string()),
        ];

        let html = match source.get_text(&url, &query, settings.page_timeout()).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Giving up on {} listings at page {}: {}", kind, page, e);
                complete = false;
                break;
            }
        };

        fetched += 1;
        let outcome = parser::extract_page(&html, kind, settings.per_page, seen, out);
        pb.tick();
        if let PageOutcome::Duplicate(id) = outcome {
            info!("Page {} of {} repeats wish {}, treating as last page", page, kind, id);
        }
        if !outcome.has_more() {
            break;
        }
        page += 1;
    }
    pb.finish_and_clear();

    let listings = out.values().map(Vec::len).sum::<usize>() - before;
    info!("Fetched {} {} wishes over {} pages", listings, kind, fetched);
    KindSummary {
        kind,
        pages: fetched,
        listings,
        complete,
    }
}
