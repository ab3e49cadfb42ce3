//! Process resource sampling
//!
//! Profiled operations are bracketed by a memory/CPU snapshot before and after.
//! `ProcessResourceProbe` reads the current process through sysinfo (memory) and
//! getrusage (CPU user/system time); `ManualResourceProbe` returns whatever the
//! caller last set, which keeps tests deterministic.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, System};
use tracing::debug;

/// Memory usage of the process at one point in time (bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Resident memory actually in use by the process
    pub heap_used_bytes: u64,
    /// Mapped but not resident memory (virtual - resident)
    pub external_bytes: u64,
}

/// Cumulative CPU time consumed by the process (microseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub user_micros: u64,
    pub system_micros: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub memory: MemoryUsage,
    pub cpu: CpuUsage,
}

/// Source of resource snapshots
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceSnapshot;
}

/// Samples the current process
pub struct ProcessResourceProbe {
    system: Mutex<System>,
    pid: Pid,
}

impl ProcessResourceProbe {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        system.refresh_process(pid);
        debug!(pid = %pid, "🔍 Process resource probe initialized");

        Self {
            system: Mutex::new(system),
            pid,
        }
    }

    fn memory_usage(&self) -> MemoryUsage {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process(self.pid) {
            return MemoryUsage::default();
        }

        match system.process(self.pid) {
            Some(process) => {
                let resident = process.memory();
                MemoryUsage {
                    heap_used_bytes: resident,
                    external_bytes: process.virtual_memory().saturating_sub(resident),
                }
            }
            None => MemoryUsage::default(),
        }
    }
}

impl Default for ProcessResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for ProcessResourceProbe {
    fn sample(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            memory: self.memory_usage(),
            cpu: process_cpu_usage(),
        }
    }
}

#[cfg(unix)]
fn process_cpu_usage() -> CpuUsage {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage only writes into the provided struct
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return CpuUsage::default();
    }
    // SAFETY: zero-initialised and filled by a successful getrusage call
    let usage = unsafe { usage.assume_init() };

    CpuUsage {
        user_micros: timeval_micros(usage.ru_utime),
        system_micros: timeval_micros(usage.ru_stime),
    }
}

#[cfg(unix)]
fn timeval_micros(tv: libc::timeval) -> u64 {
    (tv.tv_sec.max(0) as u64) * 1_000_000 + tv.tv_usec.max(0) as u64
}

#[cfg(not(unix))]
fn process_cpu_usage() -> CpuUsage {
    CpuUsage::default()
}

/// Probe whose readings are set by hand
#[derive(Debug, Default)]
pub struct ManualResourceProbe {
    current: Mutex<ResourceSnapshot>,
}

impl ManualResourceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, snapshot: ResourceSnapshot) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    pub fn set_heap_used(&self, bytes: u64) {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).memory.heap_used_bytes = bytes;
    }

    pub fn add_cpu_time(&self, user_micros: u64, system_micros: u64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.cpu.user_micros += user_micros;
        current.cpu.system_micros += system_micros;
    }
}

impl ResourceProbe for ManualResourceProbe {
    fn sample(&self) -> ResourceSnapshot {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_probe_reads_current_process() {
        let probe = ProcessResourceProbe::new();
        let first = probe.sample();

        // Burn a little CPU so the cumulative counters cannot go backwards
        let mut acc = 0u64;
        for i in 0..200_000u64 {
            acc = acc.wrapping_add(i * i);
        }
        assert!(acc > 0);

        let second = probe.sample();
        assert!(second.cpu.user_micros + second.cpu.system_micros >= first.cpu.user_micros + first.cpu.system_micros);
    }

    #[test]
    fn test_manual_probe() {
        let probe = ManualResourceProbe::new();
        assert_eq!(probe.sample(), ResourceSnapshot::default());

        probe.set_heap_used(4096);
        probe.add_cpu_time(150, 50);
        probe.add_cpu_time(50, 0);

        let snapshot = probe.sample();
        assert_eq!(snapshot.memory.heap_used_bytes, 4096);
        assert_eq!(snapshot.cpu.user_micros, 200);
        assert_eq!(snapshot.cpu.system_micros, 50);
    }
}
