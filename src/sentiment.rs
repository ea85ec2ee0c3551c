use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;

/// Comments left for one region code, ready for the map's choropleth layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionComments {
    #[serde(rename = "fillKey")]
    pub fill_key: String,
    pub messages: Vec<String>,
}

/// Group a `code,comment` CSV export by code. The first row is the sheet header.
pub fn group_comments(csv_text: &str) -> Result<BTreeMap<String, RegionComments>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let mut out: BTreeMap<String, RegionComments> = BTreeMap::new();
    for (n, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Bad CSV row {}", n + 2))?;
        let code = record.get(0).unwrap_or_default();
        let comment = record.get(1).unwrap_or_default();
        if code.is_empty() || comment.is_empty() {
            continue;
        }
        out.entry(code.to_string())
            .or_insert_with(|| RegionComments {
                fill_key: code.to_string(),
                messages: Vec::new(),
            })
            .messages
            .push(escape_html(comment));
    }
    Ok(out)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
