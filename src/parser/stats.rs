use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::fields::parse_count;
use crate::model::Stats;

static MONEY_BAR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#money-progress .progress-bar").unwrap());
static WISH_BARS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#progress .progress-bar").unwrap());

/// Read the headline counters off the landing page. Anything that does not look like the
/// expected bars is left out rather than guessed.
pub fn parse_main_stats(html: &str) -> Stats {
    let document = Html::parse_document(html);
    let mut stats = Stats::default();

    let money_bars: Vec<_> = document.select(&MONEY_BAR).collect();
    if let [bar] = money_bars.as_slice() {
        stats.money = parse_count(&bar.text().collect::<String>());
    }

    let wish_bars: Vec<_> = document.select(&WISH_BARS).collect();
    if let [completed, inprogress, free] = wish_bars.as_slice() {
        // Only the bar's own text; nested labels carry no numbers we want.
        let own_text = |bar: &scraper::ElementRef| -> String {
            bar.children()
                .filter_map(|n| n.value().as_text().map(|t| String::from(&**t)))
                .collect()
        };
        stats.completed = parse_count(&own_text(completed));
        stats.inprogress = parse_count(&own_text(inprogress));
        stats.free = parse_count(&own_text(free));
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landing_page_counters() {
        let html = std::fs::read_to_string("tests/fixtures/main_page.html").unwrap();
        let stats = parse_main_stats(&html);
        assert_eq!(stats.money, Some(1_234_567));
        assert_eq!(stats.completed, Some(12_345));
        assert_eq!(stats.inprogress, Some(678));
        assert_eq!(stats.free, Some(9_012));
    }

    #[test]
    fn unexpected_layout_yields_nothing() {
        let html = r#"<div id="progress"><div class="progress-bar">5 ks</div></div>"#;
        assert_eq!(parse_main_stats(html), Stats::default());
    }
}
