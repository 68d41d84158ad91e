//! Process resource sampling via `sysinfo` (single-PID refresh).

use sysinfo::{Pid, ProcessesToUpdate, System};

/// One CPU / memory / uptime sample of the current process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessSample {
    /// Percent of total machine capacity, `0.0..=100.0`.
    pub cpu_usage: f32,
    /// Resident set size in bytes.
    pub memory_bytes: u64,
    /// Seconds since the process started.
    pub uptime_secs: u64,
}

/// Samples CPU and memory of the running process.
///
/// CPU usage is computed by `sysinfo` between two refreshes, so the first
/// sample after construction reports against the baseline taken in `new`.
pub struct ProcessSampler {
    system: System,
    pid: Pid,
    num_cpus: f32,
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get() as f32)
            .unwrap_or(1.0);
        Self { system, pid, num_cpus }
    }

    pub fn sample(&mut self) -> ProcessSample {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        self.system
            .process(self.pid)
            .map(|p| ProcessSample {
                // sysinfo reports 0..num_cpus*100
                cpu_usage: (p.cpu_usage() / self.num_cpus).clamp(0.0, 100.0),
                memory_bytes: p.memory(),
                uptime_secs: p.run_time(),
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_reports_own_memory() {
        let mut sampler = ProcessSampler::new();
        let sample = sampler.sample();
        assert!(sample.memory_bytes > 0);
        assert!((0.0..=100.0).contains(&sample.cpu_usage));
    }

    #[test]
    fn test_uptime_is_monotonic() {
        let mut sampler = ProcessSampler::new();
        let first = sampler.sample();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = sampler.sample();
        assert!(second.uptime_secs >= first.uptime_secs);
    }
}
