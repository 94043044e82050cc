//! Process table, CPU and memory facts (cross-platform via sysinfo).

use super::{MemoryUsage, ProbeError, ProcessInfo};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use sysinfo::System;

struct ProcessTable {
    sys: System,
    refreshed_at: Option<Instant>,
    cached: Vec<ProcessInfo>,
}

pub struct ProcessCollector {
    table: Mutex<ProcessTable>,
    min_window: Duration,
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::with_min_window(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
    }
}

impl ProcessCollector {
    /// Calls closer together than `min_window` share one process table, so
    /// per-process CPU is always measured over at least that long.
    pub fn with_min_window(min_window: Duration) -> Self {
        Self {
            table: Mutex::new(ProcessTable {
                sys: System::new(),
                refreshed_at: None,
                cached: Vec::new(),
            }),
            min_window: min_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    /// Current process list. Per-process CPU is relative to the previous
    /// refresh; the first call primes the table and samples over `min_window`.
    pub fn processes(&self) -> Result<Vec<ProcessInfo>, ProbeError> {
        let mut table = self.table.lock();
        match table.refreshed_at {
            Some(at) if at.elapsed() < self.min_window && !table.cached.is_empty() => {
                return Ok(table.cached.clone());
            }
            Some(_) => table.sys.refresh_processes(),
            None => {
                table.sys.refresh_processes();
                std::thread::sleep(self.min_window);
                table.sys.refresh_processes();
            }
        }
        let out: Vec<ProcessInfo> = table
            .sys
            .processes()
            .iter()
            .map(|(pid, proc_)| ProcessInfo {
                pid: pid.as_u32(),
                name: proc_.name().to_string(),
                cpu_percent: proc_.cpu_usage(),
            })
            .collect();
        table.refreshed_at = Some(Instant::now());
        if out.is_empty() {
            return Err(ProbeError::unavailable("processes", "empty process table"));
        }
        table.cached = out.clone();
        Ok(out)
    }

    /// Global CPU utilisation sampled over the minimum sysinfo update interval.
    pub fn cpu_percent(&self) -> Result<f32, ProbeError> {
        let mut table = self.table.lock();
        let sys = &mut table.sys;
        sys.refresh_cpu();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu();
        if sys.cpus().is_empty() {
            return Err(ProbeError::unavailable("cpu", "no cpu reported"));
        }
        Ok(sys.global_cpu_info().cpu_usage())
    }

    pub fn memory(&self) -> Result<MemoryUsage, ProbeError> {
        let mut table = self.table.lock();
        let sys = &mut table.sys;
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(ProbeError::unavailable("memory", "total memory reported as 0"));
        }
        Ok(MemoryUsage {
            used_bytes: sys.used_memory(),
            total_bytes: total,
        })
    }
}
