//! Background Expiry Sweeper
//!
//! Lazy expiry is not enough for callbacks: a waiting caller whose response
//! never arrives would wait forever, because nobody ever looks the entry up
//! again. The sweeper periodically evicts expired entries from an
//! [`ExpiringMap`] and hands each one to an `on_expire` handler, which for the
//! blocking connection resolves the callback with a timeout error.
//!
//! ## Adaptive Frequency
//!
//! If a large share of entries is expiring, the sweeper runs more often.
//! While nothing expires it backs off to save CPU.

use super::map::ExpiringMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Base interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 1s)
    pub max_interval: Duration,

    /// If this fraction of entries expired in one sweep, speed up
    pub speedup_threshold: f64,

    /// Below this fraction, with nothing expired, slow down
    pub slowdown_threshold: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// A handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts sweeping `map` on the current Tokio runtime.
    ///
    /// `on_expire` is called once per evicted entry, outside any map lock.
    pub fn start<K, V, F>(map: Arc<ExpiringMap<K, V>>, config: SweepConfig, on_expire: F) -> Self
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: FnMut(K, V) + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(map, config, on_expire, shutdown_rx));

        debug!("Expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the sweeper. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop<K, V, F>(
    map: Arc<ExpiringMap<K, V>>,
    config: SweepConfig,
    mut on_expire: F,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    K: Hash + Eq,
    F: FnMut(K, V),
{
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper stopped");
                    return;
                }
            }
        }

        let entries_before = map.len();
        let evicted = map.evict_expired();
        let expired = evicted.len();

        for (key, value) in evicted {
            on_expire(key, value);
        }

        if entries_before > 0 {
            let expiry_rate = expired as f64 / entries_before as f64;

            if expiry_rate > config.speedup_threshold {
                current_interval = (current_interval / 2).max(config.min_interval);
                trace!(
                    expired = expired,
                    new_interval_ms = current_interval.as_millis(),
                    "High expiry rate, speeding up sweeper"
                );
            } else if expiry_rate < config.slowdown_threshold && expired == 0 {
                current_interval = (current_interval * 2).min(config.max_interval);
            }
        } else {
            current_interval = (current_interval * 2).min(config.max_interval);
        }

        if expired > 0 {
            debug!(expired = expired, remaining = map.len(), "Expired entries swept");
        }
    }
}
