//! Host utilization probes

use sysinfo::System;

/// One utilization reading, both values in percent (0-100)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Source of utilization readings
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Probe backed by `sysinfo`
///
/// CPU usage is measured between consecutive samples, so the very first
/// reading reports 0%.
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&mut self) -> ResourceSample {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };

        ResourceSample {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            memory_percent,
        }
    }
}

/// Probe that replays a fixed list of readings, repeating the last one
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    samples: Vec<ResourceSample>,
    position: usize,
}

impl ScriptedProbe {
    pub fn new(samples: Vec<ResourceSample>) -> Self {
        Self {
            samples,
            position: 0,
        }
    }

    /// A probe that always reports an idle host
    pub fn idle() -> Self {
        Self::new(vec![ResourceSample {
            cpu_percent: 0.0,
            memory_percent: 0.0,
        }])
    }
}

impl ResourceProbe for ScriptedProbe {
    fn sample(&mut self) -> ResourceSample {
        let index = self.position.min(self.samples.len().saturating_sub(1));
        self.position += 1;
        self.samples.get(index).copied().unwrap_or(ResourceSample {
            cpu_percent: 0.0,
            memory_percent: 0.0,
        })
    }
}
