use crate::domain::model::{BatchReport, FailureEntry, JobOutcome, JobStatus, RunState};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// 將逐筆結果彙整為 `BatchReport`。純函數，可重複呼叫。
pub struct ReportBuilder;

impl ReportBuilder {
    pub fn build(
        outcomes: &[JobOutcome],
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> BatchReport {
        let mut counts_by_status = BTreeMap::new();
        for outcome in outcomes {
            *counts_by_status.entry(outcome.status).or_insert(0) += 1;
        }

        let failures: Vec<FailureEntry> = outcomes
            .iter()
            .filter(|o| !o.status.is_success())
            .map(|o| FailureEntry {
                job_id: o.job_id,
                line: o.line,
                payload: o.payload.clone(),
                status: o.status,
                detail: o.detail.clone(),
            })
            .collect();

        let succeeded = counts_by_status.get(&JobStatus::Success).copied().unwrap_or(0);
        let elapsed_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        BatchReport {
            state: RunState::Completed,
            abort_reason: None,
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            counts_by_status,
            failures,
            outcomes: outcomes.to_vec(),
            started_at,
            finished_at,
            elapsed_ms,
        }
    }
}

impl BatchReport {
    /// 標記最終執行狀態
    pub fn with_state(mut self, state: RunState, abort_reason: Option<String>) -> Self {
        self.state = state;
        self.abort_reason = abort_reason;
        self
    }

    pub fn summary(&self) -> String {
        format!(
            "{:?}: total={}, succeeded={}, failed={} ({:.1}% success) in {}ms",
            self.state,
            self.total,
            self.succeeded,
            self.failed,
            self.success_rate(),
            self.elapsed_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ValidationReason;
    use chrono::Duration;

    fn outcome(job_id: usize, status: JobStatus) -> JobOutcome {
        JobOutcome {
            job_id,
            line: job_id + 1,
            payload: format!("p{}", job_id),
            status,
            reason: (status == JobStatus::ValidationFailed).then_some(ValidationReason::MissingPayload),
            detail: if status.is_success() {
                String::new()
            } else {
                format!("{:?}", status)
            },
            output_path: status.is_success().then(|| format!("/out/{}.png", job_id)),
            duration_ms: 3,
        }
    }

    #[test]
    fn test_counts_by_status() {
        let started = Utc::now();
        let finished = started + Duration::milliseconds(1500);
        let outcomes = vec![
            outcome(1, JobStatus::Success),
            outcome(2, JobStatus::ValidationFailed),
            outcome(3, JobStatus::Success),
            outcome(4, JobStatus::EncodeFailed),
            outcome(5, JobStatus::IoFailed),
        ];

        let report = ReportBuilder::build(&outcomes, started, finished);

        assert_eq!(report.total, 5);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 3);
        assert_eq!(report.count(JobStatus::ValidationFailed), 1);
        assert_eq!(report.count(JobStatus::EncodeFailed), 1);
        assert_eq!(report.count(JobStatus::IoFailed), 1);
        assert_eq!(report.elapsed_ms, 1500);
        assert_eq!(report.state, RunState::Completed);

        let failed_ids: Vec<usize> = report.failures.iter().map(|f| f.job_id).collect();
        assert_eq!(failed_ids, vec![2, 4, 5]);
    }

    #[test]
    fn test_build_is_idempotent() {
        let started = Utc::now();
        let finished = started + Duration::milliseconds(10);
        let outcomes = vec![outcome(1, JobStatus::Success), outcome(2, JobStatus::IoFailed)];

        let first = ReportBuilder::build(&outcomes, started, finished);
        let second = ReportBuilder::build(&outcomes, started, finished);

        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_report() {
        let now = Utc::now();
        let report = ReportBuilder::build(&[], now, now);

        assert_eq!(report.total, 0);
        assert_eq!(report.success_rate(), 0.0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_report_serializes_to_json() {
        let now = Utc::now();
        let report = ReportBuilder::build(&[outcome(1, JobStatus::ValidationFailed)], now, now)
            .with_state(RunState::Aborted, Some("cancelled".to_string()));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "ABORTED");
        assert_eq!(json["counts_by_status"]["VALIDATION_FAILED"], 1);
        assert_eq!(json["outcomes"][0]["reason"], "MISSING_PAYLOAD");
    }
}
