//! Resource guard
//!
//! Workers call [`ResourceGuard::throttle_if_needed`] before starting a fetch.
//! While the host is above its CPU or memory ceiling the call sleeps and
//! re-checks, so an overloaded machine slows the crawl down instead of
//! failing it.

mod probe;

pub use probe::{ResourceProbe, ResourceSample, ScriptedProbe, SystemProbe};

use crate::config::ResourceConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Suspends workers while host utilization is above the configured ceilings
pub struct ResourceGuard {
    probe: Mutex<Box<dyn ResourceProbe>>,
    cpu_ceiling: f32,
    memory_ceiling: f32,
    poll_interval: Duration,
    enabled: bool,
    throttled: AtomicBool,
}

impl ResourceGuard {
    /// Creates a guard sampling the host through `sysinfo`
    pub fn new(config: &ResourceConfig) -> Self {
        Self::with_probe(config, Box::new(SystemProbe::new()))
    }

    /// Creates a guard with a custom probe
    pub fn with_probe(config: &ResourceConfig, probe: Box<dyn ResourceProbe>) -> Self {
        Self {
            probe: Mutex::new(probe),
            cpu_ceiling: config.cpu_ceiling,
            memory_ceiling: config.memory_ceiling,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            enabled: config.enabled,
            throttled: AtomicBool::new(false),
        }
    }

    /// A guard that never throttles
    pub fn disabled() -> Self {
        Self::with_probe(
            &ResourceConfig {
                enabled: false,
                ..ResourceConfig::default()
            },
            Box::new(ScriptedProbe::idle()),
        )
    }

    /// Returns true if current utilization is below both ceilings
    pub fn is_safe(&self) -> bool {
        if !self.enabled {
            return true;
        }

        let sample = self
            .probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample();

        sample.cpu_percent < self.cpu_ceiling && sample.memory_percent < self.memory_ceiling
    }

    /// Sleeps in fixed intervals until utilization is safe again
    pub async fn throttle_if_needed(&self) {
        while !self.is_safe() {
            if !self.throttled.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "Host above resource ceilings (cpu {:.0}%, memory {:.0}%), throttling",
                    self.cpu_ceiling,
                    self.memory_ceiling
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        if self.throttled.swap(false, Ordering::Relaxed) {
            tracing::info!("Resource usage back under ceilings, resuming");
        }
    }
}
