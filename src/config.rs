//! Runtime settings.
//!
//! Defaults below, overridden by `GAPFILL_*` environment variables
//! (`GAPFILL_PORT=8080`, `GAPFILL_DB_PATH=/var/lib/gapfill.sqlite`, ...).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::scraper::DEFAULT_SEARCH_URL;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Prefix of the shareable exercise links handed back to teachers.
    pub public_base_url: String,
    pub search_url: String,
    /// Max concurrent requests to the sentence site per generate call.
    pub scrape_concurrency: usize,
    pub scrape_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            db_path: PathBuf::from("data/gapfill.sqlite"),
            public_base_url: "http://127.0.0.1:5000".into(),
            search_url: DEFAULT_SEARCH_URL.into(),
            scrape_concurrency: 4,
            scrape_timeout_secs: 20,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(Environment::with_prefix("GAPFILL"))
    }

    fn load_from(env: Environment) -> Result<Self> {
        Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn student_url(&self, token: &str) -> String {
        format!(
            "{}/exercise/{}",
            self.public_base_url.trim_end_matches('/'),
            token
        )
    }
}
