//! Shared application state for the proxy server

use chrono::{DateTime, Utc};

use crate::dashboard::Dashboard;

/// State handed to every route handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub dashboard: Dashboard,
    /// Default multiplier for `/api/cache/cleanup`
    pub cleanup_multiplier: u32,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(dashboard: Dashboard, cleanup_multiplier: u32) -> Self {
        Self {
            dashboard,
            cleanup_multiplier,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
