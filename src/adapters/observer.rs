use crate::domain::model::{JobOutcome, JobStatus, RunState};
use crate::domain::ports::RunObserver;
use crate::utils::monitor::ResourceMonitor;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 以 `tracing` 輸出執行事件的觀察者；啟用監控時在開始與結束附上資源用量
pub struct TracingObserver {
    monitor: ResourceMonitor,
    processed: AtomicUsize,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::with_monitoring(false)
    }

    pub fn with_monitoring(enabled: bool) -> Self {
        Self {
            monitor: ResourceMonitor::new(enabled),
            processed: AtomicUsize::new(0),
        }
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for TracingObserver {
    fn on_state(&self, state: RunState) {
        match state {
            RunState::Pending => tracing::debug!("Batch run pending"),
            RunState::Running => {
                tracing::info!("🚀 Batch run started");
                self.monitor.log_phase("Running");
            }
            RunState::Completed => {
                tracing::info!("✅ Batch run completed");
                self.monitor.log_summary(self.processed());
            }
            RunState::Aborted => {
                tracing::warn!("⚠️ Batch run aborted");
                self.monitor.log_summary(self.processed());
            }
        }
    }

    fn on_outcome(&self, outcome: &JobOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match outcome.status {
            JobStatus::Success => tracing::debug!(
                "#{} line {} -> {} ({}ms)",
                outcome.job_id,
                outcome.line,
                outcome.output_path.as_deref().unwrap_or_default(),
                outcome.duration_ms
            ),
            status => tracing::warn!(
                "#{} line {} {:?}: {}",
                outcome.job_id,
                outcome.line,
                status,
                outcome.detail
            ),
        }
    }

    fn on_fatal(&self, message: &str) {
        tracing::error!("❌ {}", message);
    }
}

/// 不做任何事的觀察者
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(job_id: usize, status: JobStatus) -> JobOutcome {
        JobOutcome {
            job_id,
            line: job_id + 1,
            payload: "ABC".to_string(),
            status,
            reason: None,
            detail: String::new(),
            output_path: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn test_tracing_observer_counts_outcomes() {
        let observer = TracingObserver::new();
        observer.on_state(RunState::Running);
        observer.on_outcome(&outcome(1, JobStatus::Success));
        observer.on_outcome(&outcome(2, JobStatus::IoFailed));
        observer.on_state(RunState::Completed);

        assert_eq!(observer.processed(), 2);
    }
}
