//! Upstream data providers
//!
//! Each submodule turns one provider family into ordered candidates for
//! `crate::fetch` and normalizes what comes back.

pub mod finance;
pub mod news;
pub mod weather;

pub use finance::{FinanceClient, RapidHost};
pub use news::{HeadlineFeed, HeadlinesClient};
pub use weather::{Units, WeatherClient, WeatherResource};
