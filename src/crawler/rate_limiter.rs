//! Per-host politeness gate
//!
//! Workers targeting the same host are spaced by at least that host's delay
//! and capped by a per-host concurrency permit. Workers on other hosts are
//! never blocked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

struct HostSlot {
    last_call: tokio::sync::Mutex<Option<Instant>>,
    permits: Arc<Semaphore>,
    delay: Mutex<Option<Duration>>,
}

/// Per-host minimum-interval gate with a per-host concurrency cap
pub struct PoliteRateLimiter {
    default_delay: Duration,
    per_host_concurrency: usize,
    hosts: Mutex<HashMap<String, Arc<HostSlot>>>,
}

impl PoliteRateLimiter {
    /// Creates a limiter
    ///
    /// # Arguments
    ///
    /// * `default_delay` - Minimum interval for hosts without an override
    /// * `per_host_concurrency` - Concurrent requests allowed per host
    pub fn new(default_delay: Duration, per_host_concurrency: usize) -> Self {
        Self {
            default_delay,
            per_host_concurrency: per_host_concurrency.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, host: &str) -> Arc<HostSlot> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostSlot {
                    last_call: tokio::sync::Mutex::new(None),
                    permits: Arc::new(Semaphore::new(self.per_host_concurrency)),
                    delay: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Overrides the delay of one host
    pub fn set_delay(&self, host: &str, delay: Duration) {
        let slot = self.slot(host);
        *slot.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Raises the delay of one host if `delay` is longer than the current one
    pub fn raise_delay(&self, host: &str, delay: Duration) {
        if delay > self.delay(host) {
            tracing::debug!("Raising politeness delay for {} to {:?}", host, delay);
            self.set_delay(host, delay);
        }
    }

    /// Current delay of one host
    pub fn delay(&self, host: &str) -> Duration {
        self.slot(host)
            .delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(self.default_delay)
    }

    /// Waits until the host's delay has passed since its last call, then stamps the call
    pub async fn wait_if_needed(&self, host: &str) {
        let slot = self.slot(host);
        let delay = self.delay(host);

        let mut last_call = slot.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + delay;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    /// Takes one of the host's concurrency permits
    ///
    /// The permit is released when dropped.
    pub async fn acquire(&self, host: &str) -> Option<OwnedSemaphorePermit> {
        self.slot(host).permits.clone().acquire_owned().await.ok()
    }
}
