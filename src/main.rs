//! skydesk - caching proxy for a weather, finance and news dashboard
//!
//! `skydesk serve` runs the proxy; the other subcommands query a running
//! proxy and print a short text summary.

use std::error::Error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use skydesk::cli::{
    parse_multiplier_arg, parse_symbols_arg, parse_units_arg, Cli, Command, ProxyArgs, WeatherArgs,
};
use skydesk::client::ProxyClient;
use skydesk::config::ServerConfig;
use skydesk::fetch::http::DEFAULT_TIMEOUT;
use skydesk::fetch::HttpSource;
use skydesk::server;
use skydesk::upstream::finance::Quote;
use skydesk::upstream::weather::{aqi_label, forecast_slots, CurrentSummary};
use skydesk::upstream::WeatherResource;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn proxy_client(args: &ProxyArgs) -> Result<ProxyClient, Box<dyn Error>> {
    let http = HttpSource::new(DEFAULT_TIMEOUT)?;
    Ok(ProxyClient::new(http, args.bases.clone()))
}

fn format_price(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "n/a".to_string())
}

fn print_quote(quote: &Quote) {
    if quote.placeholder {
        println!("{:<10} data unavailable", quote.symbol);
        return;
    }
    let change = quote
        .regular_market_change_percent
        .map(|p| format!("{:+.2}%", p))
        .unwrap_or_default();
    println!(
        "{:<10} {:>12} {:>8}  {}",
        quote.symbol,
        format_price(quote.regular_market_price),
        change,
        quote.short_name.as_deref().unwrap_or("")
    );
}

async fn show_weather(args: WeatherArgs) -> Result<(), Box<dyn Error>> {
    let units = parse_units_arg(&args.units)?;
    let client = proxy_client(&args.proxy)?;

    let payload = client
        .weather(WeatherResource::Current, args.lat, args.lon, units)
        .await?;
    match CurrentSummary::from_payload(&payload) {
        Some(summary) => {
            println!("{}: {}", summary.name, summary.description());
            println!(
                "Temperature {:.1} (feels like {:.1}), humidity {}%",
                summary.main.temp,
                summary.main.feels_like.unwrap_or(summary.main.temp),
                summary.main.humidity.map(|h| format!("{:.0}", h)).unwrap_or_else(|| "?".into())
            );
            if let Some(wind) = summary.wind {
                println!("Wind {:.1}", wind.speed);
            }
        }
        None => println!("{}", serde_json::to_string_pretty(&payload)?),
    }

    // Air quality is a bonus line; a failure here is not an error
    if let Ok(air) = client
        .weather(WeatherResource::AirQuality, args.lat, args.lon, units)
        .await
    {
        if let Some(aqi) = air.pointer("/list/0/main/aqi").and_then(|v| v.as_u64()) {
            println!("Air quality: {}", aqi_label(aqi));
        }
    }
    Ok(())
}

async fn show_forecast(args: WeatherArgs) -> Result<(), Box<dyn Error>> {
    let units = parse_units_arg(&args.units)?;
    let client = proxy_client(&args.proxy)?;

    let payload = client
        .weather(WeatherResource::Forecast, args.lat, args.lon, units)
        .await?;
    for slot in forecast_slots(&payload) {
        let when = chrono::DateTime::from_timestamp(slot.dt, 0)
            .map(|t| t.format("%a %H:%M").to_string())
            .unwrap_or_else(|| slot.dt.to_string());
        let rain = slot
            .pop
            .map(|p| format!("{:>3.0}% rain", p * 100.0))
            .unwrap_or_default();
        let description = slot.weather.first().map(|c| c.description.as_str()).unwrap_or("");
        println!("{}  {:>6.1}  {:<24} {}", when, slot.main.temp, description, rain);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let config = ServerConfig::from_args(&args)?;
            server::run(config).await?;
        }
        Command::Weather(args) => show_weather(args).await?,
        Command::Forecast(args) => show_forecast(args).await?,
        Command::Quotes(args) => {
            let joined = parse_symbols_arg(&args.symbols)?;
            let symbols: Vec<String> = joined.split(',').map(str::to_uppercase).collect();
            let client = proxy_client(&args.proxy)?;
            for quote in client.quotes(&symbols).await? {
                print_quote(&quote);
            }
        }
        Command::Search(args) => {
            let client = proxy_client(&args.proxy)?;
            let hits = client.search(&args.query).await?;
            if hits.is_empty() {
                println!("No matches for '{}'", args.query);
            }
            for hit in hits {
                let name = hit.shortname.or(hit.longname).unwrap_or_default();
                println!(
                    "{:<10} {:<40} {}",
                    hit.symbol,
                    name,
                    hit.exchange.unwrap_or_default()
                );
            }
        }
        Command::Cleanup(args) => {
            let multiplier = parse_multiplier_arg(args.multiplier)?;
            let client = proxy_client(&args.proxy)?;
            let removed = client.cleanup(multiplier).await?;
            println!("Removed {} cache entries", removed);
        }
    }

    Ok(())
}
