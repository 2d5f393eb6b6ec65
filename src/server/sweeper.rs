//! Background cache sweeping
//!
//! Expired entries are evicted lazily when read; keys that are never read
//! again would stay forever, so a periodic task removes anything older than
//! a multiple of its namespace TTL.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cache::TtlCache;

/// Messages sent from the sweeper task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepMessage {
    /// A sweep finished and removed `removed` entries
    Swept { removed: usize },
}

/// Configuration for periodic sweeps
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    /// Entries older than `ttl * multiplier` are removed
    pub multiplier: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600), // 10 minutes
            multiplier: 4,
        }
    }
}

/// Handle for the background sweep task
pub struct SweepHandle {
    /// Sweep reports; dropping the receiver does not stop the task
    pub receiver: mpsc::Receiver<SweepMessage>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SweepHandle {
    /// Spawns a task that sweeps `cache` every `config.interval`
    ///
    /// The first sweep runs one interval after spawning.
    pub fn spawn(cache: TtlCache, config: SweepConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(8);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval);
            // Skip the first tick (immediate)
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = cache.cleanup(config.multiplier);
                        if removed > 0 {
                            info!(removed, "background sweep removed old cache entries");
                        }
                        // Nobody listening is fine
                        let _ = msg_tx.try_send(SweepMessage::Swept { removed });
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("cache sweeper stopping");
                        break;
                    }
                }
            }
        });

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Stops the sweep task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachePolicy, ManualClock, MemoryStore, Namespace};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_sweep_config_default() {
        let config = SweepConfig::default();
        assert_eq!(config.interval, Duration::from_secs(600));
        assert_eq!(config.multiplier, 4);
    }

    #[tokio::test]
    async fn test_sweeper_removes_old_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = TtlCache::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            CachePolicy::new().with_ttl(Namespace::QUOTES, Duration::from_secs(10)),
        );
        cache.set(Namespace::QUOTES, "old", json!(1));
        clock.advance(41_000);
        cache.set(Namespace::QUOTES, "new", json!(2));

        let mut handle = SweepHandle::spawn(
            cache.clone(),
            SweepConfig {
                interval: Duration::from_millis(20),
                multiplier: 4,
            },
        );

        let message = tokio::time::timeout(Duration::from_secs(2), handle.receiver.recv())
            .await
            .unwrap();
        assert_eq!(message, Some(SweepMessage::Swept { removed: 1 }));
        assert!(cache.get(Namespace::QUOTES, "new").is_some());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let cache = TtlCache::in_memory(CachePolicy::server_defaults());
        let mut handle = SweepHandle::spawn(
            cache,
            SweepConfig {
                interval: Duration::from_millis(10),
                multiplier: 4,
            },
        );
        assert!(handle.receiver.recv().await.is_some());

        let SweepHandle {
            mut receiver,
            shutdown_tx,
        } = handle;
        shutdown_tx.send(()).await.unwrap();
        // Channel closes once the task has exited and dropped its sender
        while receiver.recv().await.is_some() {}
    }
}
