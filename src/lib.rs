//! skydesk library
//!
//! Caching proxy core for a weather, finance and news dashboard: a namespaced
//! TTL cache, an ordered-candidate fetcher with placeholder fallbacks, the
//! upstream integrations built on them, and the HTTP server and client.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod fetch;
pub mod sequence;
pub mod server;
pub mod upstream;
