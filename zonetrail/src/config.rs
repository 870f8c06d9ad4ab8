use anyhow::{Context, Result};
use feeds::FeedConfig;
use history_sqlite::{CountStrategy, StoreConfig};
use lookup::LookupConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub pool_size: Option<usize>,
    pub acquire_timeout_ms: Option<u64>,
    pub statement_timeout_ms: Option<u64>,
    pub busy_timeout_ms: Option<u64>,
    pub counts: Option<CountStrategy>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct QueryConfig {
    pub page_size: Option<usize>,
    pub feed_cap: Option<usize>,
    pub min_search_len: Option<usize>,
    pub random_attempts: Option<usize>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub database: Option<DatabaseConfig>,
    pub query: Option<QueryConfig>,
}

/// Loads `path`, or `./zonetrail.yaml` when no path is given and that file exists.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("zonetrail.yaml");
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&s).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse_config(s: &str) -> Result<Config> {
    Ok(serde_yaml::from_str::<Option<Config>>(s)?.unwrap_or_default())
}

impl Config {
    /// Store settings; `db` from the command line wins over the file.
    pub fn store_config(&self, db: Option<PathBuf>) -> StoreConfig {
        let db_cfg = self.database.clone().unwrap_or_default();
        let path = db.or(db_cfg.path).unwrap_or_else(|| PathBuf::from("zonetrail.db"));
        let mut cfg = StoreConfig::new(path);
        if let Some(n) = db_cfg.pool_size { cfg.pool_size = n; }
        if let Some(ms) = db_cfg.acquire_timeout_ms { cfg.acquire_timeout = Duration::from_millis(ms); }
        if let Some(ms) = db_cfg.statement_timeout_ms { cfg.statement_timeout = Duration::from_millis(ms); }
        if let Some(ms) = db_cfg.busy_timeout_ms { cfg.busy_timeout = Duration::from_millis(ms); }
        if let Some(c) = db_cfg.counts { cfg.counts = c; }
        if let Some(n) = self.query.as_ref().and_then(|q| q.page_size) { cfg.page_size = n; }
        cfg
    }

    pub fn feed_config(&self) -> FeedConfig {
        let mut cfg = FeedConfig::default();
        if let Some(q) = &self.query {
            if let Some(n) = q.feed_cap { cfg.cap = n; }
            if let Some(n) = q.min_search_len { cfg.min_search_len = n; }
        }
        cfg
    }

    pub fn lookup_config(&self) -> LookupConfig {
        let mut cfg = LookupConfig::default();
        if let Some(n) = self.query.as_ref().and_then(|q| q.random_attempts) { cfg.random_attempts = n; }
        cfg
    }

    pub fn request_timeout(&self) -> Duration {
        let ms = self.query.as_ref().and_then(|q| q.timeout_ms).unwrap_or(10_000);
        Duration::from_millis(ms)
    }
}
