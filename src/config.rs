//! Server configuration
//!
//! Turns parsed `serve` arguments into validated settings and wires the
//! dashboard service from them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CachePolicy, FileStore, MemoryStore, Namespace, Store, SystemClock, TtlCache};
use crate::cli::ServeArgs;
use crate::dashboard::Dashboard;
use crate::fetch::HttpSource;
use crate::upstream::finance::DEFAULT_RAPIDAPI_HOSTS;
use crate::upstream::{FinanceClient, HeadlineFeed, HeadlinesClient, RapidHost, WeatherClient};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid TTL override '{0}'. Expected NAMESPACE=SECONDS")]
    InvalidTtl(String),

    #[error("Unknown cache namespace '{0}'")]
    UnknownNamespace(String),

    #[error("Invalid listen address '{0}'")]
    InvalidAddress(String),

    #[error("The cleanup multiplier must be at least 1")]
    InvalidMultiplier,

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Validated settings for `skydesk serve`
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub openweather_key: Option<String>,
    pub openweather_bases: Vec<String>,
    pub yahoo_base: String,
    pub rapidapi_key: Option<String>,
    pub rapidapi_hosts: Vec<RapidHost>,
    pub headlines_feed: String,
    pub policy: CachePolicy,
    /// `None` keeps the cache in memory
    pub cache_dir: Option<PathBuf>,
    /// `None` disables background sweeps
    pub sweep_interval: Option<Duration>,
    pub cleanup_multiplier: u32,
    pub timeout: Duration,
}

impl ServerConfig {
    pub fn from_args(args: &ServeArgs) -> Result<Self, ConfigError> {
        let addr: SocketAddr = format!("{}:{}", args.host, args.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(format!("{}:{}", args.host, args.port)))?;

        if args.cleanup_multiplier == 0 {
            return Err(ConfigError::InvalidMultiplier);
        }

        let mut policy = CachePolicy::server_defaults();
        if let Some(min) = args.weather_ttl_min {
            policy.set_ttl(Namespace::WEATHER, minutes("weather-ttl-min", min)?);
        }
        if let Some(min) = args.forecast_ttl_min {
            policy.set_ttl(Namespace::FORECAST, minutes("forecast-ttl-min", min)?);
        }
        for raw in &args.ttl {
            let (namespace, ttl) = parse_ttl_override(raw)?;
            policy.set_ttl(namespace, ttl);
        }

        let host_names: Vec<String> = if args.rapidapi_hosts.is_empty() {
            DEFAULT_RAPIDAPI_HOSTS.iter().map(|h| h.to_string()).collect()
        } else {
            args.rapidapi_hosts.clone()
        };
        let rapidapi_hosts = host_names
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(RapidHost::new)
            .collect();

        let cache_dir = if args.memory_cache {
            None
        } else {
            match &args.cache_dir {
                Some(dir) => Some(dir.clone()),
                None => FileStore::new().map(|store| store.dir().to_path_buf()),
            }
        };

        Ok(Self {
            addr,
            openweather_key: non_empty(args.openweather_key.as_deref()),
            openweather_bases: args.openweather_bases.clone(),
            yahoo_base: args.yahoo_base.clone(),
            rapidapi_key: non_empty(args.rapidapi_key.as_deref()),
            rapidapi_hosts,
            headlines_feed: args.headlines_feed.clone(),
            policy,
            cache_dir,
            sweep_interval: (args.sweep_secs > 0).then(|| Duration::from_secs(args.sweep_secs)),
            cleanup_multiplier: args.cleanup_multiplier,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }

    /// Builds the cache and upstream clients described by this config
    pub fn build_dashboard(&self) -> Result<Dashboard, ConfigError> {
        let http = HttpSource::new(self.timeout)?;

        let store: Arc<dyn Store> = match &self.cache_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "using on-disk cache");
                Arc::new(FileStore::with_dir(dir.clone()))
            }
            None => {
                info!("using in-memory cache");
                Arc::new(MemoryStore::new())
            }
        };
        let cache = TtlCache::new(store, Arc::new(SystemClock), self.policy.clone());

        if self.openweather_key.is_none() {
            warn!("OPENWEATHER_KEY not set, weather requests will fail");
        }
        if self.rapidapi_key.is_none() {
            info!("YF_API_KEY not set, finance falls back to placeholders when Yahoo fails");
        }

        Ok(Dashboard::new(
            cache,
            WeatherClient::new(
                http.clone(),
                self.openweather_bases.clone(),
                self.openweather_key.clone(),
            ),
            FinanceClient::new(
                http.clone(),
                self.yahoo_base.clone(),
                self.rapidapi_key.clone(),
                self.rapidapi_hosts.clone(),
            ),
            HeadlinesClient::new(http, vec![HeadlineFeed::nasa_at(self.headlines_feed.clone())]),
        ))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Parses `namespace=seconds`
pub fn parse_ttl_override(raw: &str) -> Result<(Namespace, Duration), ConfigError> {
    let (name, secs) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidTtl(raw.to_string()))?;
    let name = name.trim().to_lowercase();
    let namespace =
        Namespace::from_name(&name).ok_or_else(|| ConfigError::UnknownNamespace(name.clone()))?;
    let secs: u64 = secs
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidTtl(raw.to_string()))?;
    Ok((namespace, Duration::from_secs(secs)))
}

fn minutes(flag: &str, min: u64) -> Result<Duration, ConfigError> {
    min.checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidTtl(format!("--{}={}", flag, min)))
}
