use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Runtime knobs. Defaults target the live site; every field can be overridden from a TOML
/// file or `WISHMAP_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub per_page: usize,
    pub page_timeout_secs: u64,
    pub geocode_url: String,
    pub geocode_country: String,
    pub geocode_timeout_secs: u64,
    pub geocode_concurrency: usize,
    pub max_attempts: u32,
    pub retry_pause_ms: u64,
    pub user_agent: String,
    pub sentiment_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: "https://jeziskovavnoucata.rozhlas.cz".into(),
            per_page: 50,
            page_timeout_secs: 30,
            geocode_url: "https://nominatim.openstreetmap.org/search".into(),
            geocode_country: "Czechia".into(),
            geocode_timeout_secs: 60,
            geocode_concurrency: 8,
            max_attempts: 5,
            retry_pause_ms: 1000,
            user_agent: concat!("wishmap/", env!("CARGO_PKG_VERSION")).into(),
            sentiment_url: None,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(p) = path {
            builder = builder.add_source(File::from(p).required(true));
        }
        let settings = builder
            .add_source(Environment::with_prefix("WISHMAP").try_parsing(true))
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        Ok(settings)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout_secs)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_site() {
        let s = Settings::default();
        assert_eq!(s.per_page, 50);
        assert_eq!(s.geocode_concurrency, 8);
        assert_eq!(s.max_attempts, 5);
    }

    #[test]
    fn file_overrides_keep_other_defaults() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(f, "per_page = 20\ngeocode_country = \"Slovakia\"").unwrap();
        let s = Settings::load(Some(f.path())).unwrap();
        assert_eq!(s.per_page, 20);
        assert_eq!(s.geocode_country, "Slovakia");
        assert_eq!(s.page_timeout_secs, 30);
    }
}
