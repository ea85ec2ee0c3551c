pub mod fields;
pub mod listing;
pub mod stats;

pub use listing::{extract_page, PageOutcome, PlaceListings, SeenIds};
pub use stats::parse_main_stats;
