use std::time::Duration;
#[cfg(feature = "cli")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use std::time::Instant;
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// 每秒處理筆數；經過時間為零時回傳 0
pub fn records_per_second(records: usize, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        records as f64 / seconds
    } else {
        0.0
    }
}

/// 本行程在某個時間點的資源用量
#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub rss_mb: u64,
    pub peak_rss_mb: u64,
    pub elapsed: Duration,
}

/// 只觀察目前行程的 CPU 與常駐記憶體，不掃描整台機器
#[cfg(feature = "cli")]
pub struct ResourceMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    started: Instant,
    peak_rss_mb: AtomicU64,
}

#[cfg(feature = "cli")]
impl ResourceMonitor {
    pub fn new(enabled: bool) -> Self {
        let pid = if enabled {
            let pid = sysinfo::get_current_pid().ok();
            if pid.is_none() {
                tracing::warn!("Unable to determine current PID, resource monitoring disabled");
            }
            pid
        } else {
            None
        };

        let monitor = Self {
            system: Mutex::new(System::new_with_specifics(RefreshKind::nothing())),
            pid,
            started: Instant::now(),
            peak_rss_mb: AtomicU64::new(0),
        };
        // CPU 使用率需要兩次取樣，先取一次基準
        monitor.sample();
        monitor
    }

    pub fn sample(&self) -> Option<ResourceSnapshot> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let process = system.process(pid)?;
        let rss_mb = process.memory() / 1024 / 1024;
        let peak = self.peak_rss_mb.fetch_max(rss_mb, Ordering::Relaxed).max(rss_mb);

        Some(ResourceSnapshot {
            cpu_percent: process.cpu_usage(),
            rss_mb,
            peak_rss_mb: peak,
            elapsed: self.started.elapsed(),
        })
    }

    pub fn log_phase(&self, phase: &str) {
        if let Some(snapshot) = self.sample() {
            tracing::info!(
                "📊 {} - CPU: {:.1}%, RSS: {}MB, Peak: {}MB",
                phase,
                snapshot.cpu_percent,
                snapshot.rss_mb,
                snapshot.peak_rss_mb
            );
        }
    }

    pub fn log_summary(&self, processed: usize) {
        if let Some(snapshot) = self.sample() {
            tracing::info!(
                "📊 {} records in {:?} ({:.1} records/s), Peak RSS: {}MB",
                processed,
                snapshot.elapsed,
                records_per_second(processed, snapshot.elapsed),
                snapshot.peak_rss_mb
            );
        }
    }
}

// 沒有 sysinfo 時不做任何量測
#[cfg(not(feature = "cli"))]
pub struct ResourceMonitor;

#[cfg(not(feature = "cli"))]
impl ResourceMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn log_phase(&self, _phase: &str) {}

    pub fn log_summary(&self, _processed: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_per_second() {
        assert_eq!(records_per_second(50, Duration::from_secs(2)), 25.0);
        assert_eq!(records_per_second(10, Duration::ZERO), 0.0);
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_disabled_monitor_does_not_sample() {
        let monitor = ResourceMonitor::new(false);
        assert!(monitor.sample().is_none());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_enabled_monitor_tracks_own_process() {
        let monitor = ResourceMonitor::new(true);
        if let Some(snapshot) = monitor.sample() {
            assert!(snapshot.peak_rss_mb >= snapshot.rss_mb);
        }
    }
}
