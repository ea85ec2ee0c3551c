use std::sync::LazyLock;

use regex::Regex;

use crate::error::PriceError;
use crate::model::{PriceRange, PRICE_UNBOUNDED};

static AGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*) ([0-9]+) let$").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());
static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9][0-9\s]*)\s").unwrap());

/// Join the non-empty text fragments of a cell with single spaces, then drop a trailing
/// `suffix` and every occurrence of `remove`.
pub fn clean_text<'a, I>(fragments: I, suffix: Option<&str>, remove: Option<&str>) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut text = fragments
        .into_iter()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(suffix) = suffix {
        if let Some(stripped) = text.strip_suffix(suffix) {
            text.truncate(stripped.len());
        }
    }
    if let Some(remove) = remove {
        if !remove.is_empty() && text.contains(remove) {
            text = text.replace(remove, "");
        }
    }
    text
}

/// Split `"Marie 87 let"` into `("Marie", 87)`. Cells without an age come back whole with 0.
pub fn parse_name_age(text: &str) -> (String, u32) {
    AGE_RE
        .captures(text)
        .and_then(|caps| {
            let age = caps[2].parse().ok()?;
            Some((caps[1].to_string(), age))
        })
        .unwrap_or_else(|| (text.to_string(), 0))
}

/// Price cells come as `"do 500 Kč"`, `"nad 2000 Kč"` or `"500 až 1000 Kč"`.
pub fn parse_price_range(text: &str) -> Result<Option<PriceRange>, PriceError> {
    if text.is_empty() {
        return Ok(None);
    }

    let numbers = NUMBER_RE
        .find_iter(text)
        .map(|m| m.as_str().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| PriceError::Number(text.to_string()))?;

    let first = *numbers
        .first()
        .ok_or_else(|| PriceError::Missing(text.to_string()))?;

    if text.starts_with("do ") {
        return Ok(Some(PriceRange(0, first)));
    }
    if text.starts_with("nad ") {
        return Ok(Some(PriceRange(first, PRICE_UNBOUNDED)));
    }
    match numbers.get(1) {
        Some(&second) => Ok(Some(PriceRange(first, second))),
        None => Err(PriceError::SingleBound(text.to_string())),
    }
}

/// Read a space-grouped count followed by a unit, e.g. `"1 234 567 Kč"`.
pub fn parse_count(text: &str) -> Option<i64> {
    let caps = COUNT_RE.captures(text)?;
    let digits: String = caps[1].chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}
