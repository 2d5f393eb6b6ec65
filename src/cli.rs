//! Command-line interface parsing for skydesk
//!
//! `serve` runs the caching proxy; the remaining subcommands are thin clients
//! that query a running proxy and print the result.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::upstream::finance::YAHOO_BASE_URL;
use crate::upstream::news::NASA_RSS_URL;
use crate::upstream::weather::OPENWEATHER_BASE_URL;
use crate::upstream::Units;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified units are not recognized
    #[error("Invalid units: '{0}'. Valid units: metric, imperial, standard")]
    InvalidUnits(String),

    /// No symbols were given
    #[error("At least one symbol is required")]
    NoSymbols,

    /// The cleanup multiplier must be positive
    #[error("Invalid multiplier: {0}. The multiplier must be at least 1")]
    InvalidMultiplier(u32),
}

/// skydesk - caching proxy for a weather, finance and news dashboard
#[derive(Parser, Debug)]
#[command(name = "skydesk")]
#[command(about = "Caching proxy for weather, finance and news data with multi-backend failover")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the caching proxy server
    Serve(ServeArgs),
    /// Show current conditions via a running proxy
    Weather(WeatherArgs),
    /// Show the 5 day / 3 hour forecast via a running proxy
    Forecast(WeatherArgs),
    /// Show stock quotes via a running proxy
    ///
    /// Examples:
    ///   skydesk quotes AAPL MSFT
    ///   skydesk quotes "CL=F,NG=F"
    Quotes(QuotesArgs),
    /// Search symbols by name via a running proxy
    Search(SearchArgs),
    /// Purge old entries from a running proxy's cache
    Cleanup(CleanupArgs),
}

/// Options for the proxy server; every option can also come from the environment
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 4000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "SKYDESK_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// OpenWeather API key
    #[arg(long, env = "OPENWEATHER_KEY", hide_env_values = true)]
    pub openweather_key: Option<String>,

    /// OpenWeather base URLs, tried in order
    #[arg(
        long = "openweather-base",
        env = "OPENWEATHER_BASES",
        value_delimiter = ',',
        default_value = OPENWEATHER_BASE_URL
    )]
    pub openweather_bases: Vec<String>,

    /// Public Yahoo Finance base URL
    #[arg(long, env = "YAHOO_BASE_URL", default_value = YAHOO_BASE_URL)]
    pub yahoo_base: String,

    /// RapidAPI key for the Yahoo Finance mirrors
    #[arg(long, env = "YF_API_KEY", hide_env_values = true)]
    pub rapidapi_key: Option<String>,

    /// RapidAPI hosts, tried in order after Yahoo (defaults to the known mirrors)
    #[arg(long = "rapidapi-host", env = "YF_API_HOSTS", value_delimiter = ',')]
    pub rapidapi_hosts: Vec<String>,

    /// RSS feed for climate headlines
    #[arg(long, env = "HEADLINES_FEED", default_value = NASA_RSS_URL)]
    pub headlines_feed: String,

    /// TTL for current weather, in minutes
    #[arg(long, env = "WEATHER_TTL_MIN")]
    pub weather_ttl_min: Option<u64>,

    /// TTL for forecasts, in minutes
    #[arg(long, env = "FORECAST_TTL_MIN")]
    pub forecast_ttl_min: Option<u64>,

    /// Per-namespace TTL override, e.g. --ttl quotes=30 (seconds)
    #[arg(long = "ttl", value_name = "NAMESPACE=SECS")]
    pub ttl: Vec<String>,

    /// Directory for the on-disk cache
    #[arg(long, env = "SKYDESK_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Keep the cache in memory only
    #[arg(long)]
    pub memory_cache: bool,

    /// Seconds between background cache sweeps (0 disables)
    #[arg(long, env = "SKYDESK_SWEEP_SECS", default_value_t = 600)]
    pub sweep_secs: u64,

    /// Entries older than TTL times this are removed by sweeps
    #[arg(long, default_value_t = 4)]
    pub cleanup_multiplier: u32,

    /// Upstream request timeout, in seconds
    #[arg(long, env = "SKYDESK_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,
}

/// Where the client subcommands find the proxy
#[derive(Args, Debug, Clone)]
pub struct ProxyArgs {
    /// Proxy base URLs, tried in order
    #[arg(long = "proxy", env = "SKYDESK_PROXY", value_delimiter = ',')]
    pub bases: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct WeatherArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// metric, imperial or standard
    #[arg(long, default_value = "metric")]
    pub units: String,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

#[derive(Args, Debug, Clone)]
pub struct QuotesArgs {
    /// Ticker symbols, separated by spaces or commas
    pub symbols: Vec<String>,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    pub query: String,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    #[arg(long, default_value_t = 4)]
    pub multiplier: u32,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

/// Parses a units argument into `Units`.
///
/// # Arguments
/// * `s` - The units string from CLI
///
/// # Returns
/// * `Ok(Units)` if the string names a known measurement system
/// * `Err(CliError::InvalidUnits)` otherwise
pub fn parse_units_arg(s: &str) -> Result<Units, CliError> {
    s.parse().map_err(|_| CliError::InvalidUnits(s.to_string()))
}

/// Joins symbol arguments into the comma-separated form the proxy expects
pub fn parse_symbols_arg(symbols: &[String]) -> Result<String, CliError> {
    let joined = symbols
        .iter()
        .flat_map(|s| s.split(|c: char| c == ',' || c.is_whitespace()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    if joined.is_empty() {
        Err(CliError::NoSymbols)
    } else {
        Ok(joined)
    }
}

pub fn parse_multiplier_arg(multiplier: u32) -> Result<u32, CliError> {
    if multiplier == 0 {
        Err(CliError::InvalidMultiplier(multiplier))
    } else {
        Ok(multiplier)
    }
}
