use crate::adapters::observer::TracingObserver;
use crate::core::mapper::JobMapper;
use crate::core::reader;
use crate::core::report::ReportBuilder;
use crate::domain::model::{
    BatchReport, BatchRequest, DefaultOptions, EncodingJob, IoFailurePolicy, JobOutcome, JobStatus,
    RunState, RunnerOptions, SourceFormat, SourceSpec, ValidationFailure, ValidationReason,
};
use crate::domain::ports::{Encoder, ImageSink, RunObserver};
use crate::utils::error::{BatchError, Result};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesOrdered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

enum Stop {
    Cancelled,
    Escalated(String),
    Failed(BatchError),
}

/// 批次執行器：讀取 → 驗證 → 編碼 → 寫檔，逐筆隔離失敗。
///
/// 狀態機為 `Pending → Running → {Completed, Aborted}`。來源的結構性
/// 錯誤以 `Err` 回傳；取消或 I/O 升級中止時回傳狀態為 `Aborted` 的部分報告。
/// 中止後不再派送新記錄，已派送的工作會跑完並計入報告。
/// `workers > 1` 時最多同時編碼／寫入 `workers` 筆，但結果仍依輸入順序收集，
/// 檔名衝突處理一律在派送前依序完成。
pub struct BatchRunner<E: Encoder + 'static, S: ImageSink> {
    encoder: Arc<E>,
    sink: S,
    observer: Box<dyn RunObserver>,
    options: RunnerOptions,
    cancel: CancellationToken,
}

impl<E: Encoder + 'static, S: ImageSink> BatchRunner<E, S> {
    pub fn new(encoder: E, sink: S) -> Self {
        Self {
            encoder: Arc::new(encoder),
            sink,
            observer: Box::new(TracingObserver::new()),
            options: RunnerOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: impl RunObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub async fn run_batch(
        &self,
        source_path: impl Into<PathBuf>,
        format: SourceFormat,
        defaults: DefaultOptions,
        destination_dir: impl Into<PathBuf>,
    ) -> Result<BatchReport> {
        let request = BatchRequest {
            source: SourceSpec::new(source_path, format),
            defaults,
            destination_dir: destination_dir.into(),
        };
        self.run(&request).await
    }

    pub async fn run(&self, request: &BatchRequest) -> Result<BatchReport> {
        let started_at = Utc::now();
        let mut state = RunState::Pending;
        self.observer.on_state(state);

        if let Err(e) = self.sink.prepare(&request.destination_dir).await {
            self.observer.on_fatal(&e.to_string());
            return Err(e);
        }

        self.transition(&mut state, RunState::Running);
        tracing::debug!(
            "Reading {} source {} into {}",
            request.source.format,
            request.source.display_path(),
            request.destination_dir.display()
        );

        let workers = self.options.workers.max(1);
        let read_timeout = self.options.timeouts.read;
        let mut records = reader::stream(request.source.clone(), workers * 2);
        let mut mapper = JobMapper::new(request.defaults.clone());
        let mut outcomes: Vec<JobOutcome> = Vec::new();
        let mut in_flight = FuturesOrdered::new();
        let mut exhausted = false;
        let mut next_id = 0;
        let mut stop: Option<Stop> = None;

        loop {
            if stop.is_none() && self.cancel.is_cancelled() {
                stop = Some(Stop::Cancelled);
            }

            while stop.is_none() && !exhausted && in_flight.len() < workers {
                let received = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    received = tokio::time::timeout(read_timeout, records.recv()) => Some(received),
                };
                let Some(received) = received else {
                    stop = Some(Stop::Cancelled);
                    break;
                };

                match received {
                    Err(_) => {
                        stop = Some(Stop::Failed(BatchError::SourceTimeout {
                            path: request.source.display_path(),
                            seconds: read_timeout.as_secs(),
                        }));
                    }
                    Ok(None) => exhausted = true,
                    Ok(Some(Err(err))) => stop = Some(Stop::Failed(err)),
                    Ok(Some(Ok(record))) => {
                        next_id += 1;
                        let payload = mapper.raw_payload(&record);
                        let mapped = mapper.map(next_id, &record);
                        in_flight.push_back(self.execute(
                            next_id,
                            record.line(),
                            payload,
                            mapped,
                            &request.destination_dir,
                        ));
                    }
                }
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };

            self.observer.on_outcome(&outcome);
            if stop.is_none()
                && outcome.status == JobStatus::IoFailed
                && self.options.io_failure_policy == IoFailurePolicy::Abort
            {
                stop = Some(Stop::Escalated(format!(
                    "write failure on record {} escalated: {}",
                    outcome.job_id, outcome.detail
                )));
            }
            outcomes.push(outcome);
        }

        drop(records);

        let abort_reason = match stop {
            None => None,
            Some(Stop::Cancelled) => Some("cancelled".to_string()),
            Some(Stop::Escalated(reason)) => Some(reason),
            Some(Stop::Failed(err)) => {
                return Err(self.fail(&mut state, err, &outcomes, started_at));
            }
        };

        let final_state = if abort_reason.is_some() {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        self.transition(&mut state, final_state);

        Ok(ReportBuilder::build(&outcomes, started_at, Utc::now()).with_state(final_state, abort_reason))
    }

    async fn execute(
        &self,
        id: usize,
        line: usize,
        payload: String,
        mapped: std::result::Result<EncodingJob, ValidationFailure>,
        dir: &Path,
    ) -> JobOutcome {
        let started = Instant::now();
        let outcome = |status: JobStatus, detail: String, output_path: Option<String>| JobOutcome {
            job_id: id,
            line,
            payload: payload.clone(),
            status,
            reason: None,
            detail,
            output_path,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let job = match mapped {
            Ok(job) => job,
            Err(failure) => {
                return JobOutcome {
                    reason: Some(failure.reason),
                    ..outcome(JobStatus::ValidationFailed, failure.to_string(), None)
                };
            }
        };

        let timeouts = self.options.timeouts;
        let encoder = Arc::clone(&self.encoder);
        let task = tokio::task::spawn_blocking(move || {
            let result = encoder.encode(&job);
            (job, result)
        });

        let (job, image) = match tokio::time::timeout(timeouts.encode, task).await {
            Err(_) => {
                return outcome(
                    JobStatus::EncodeFailed,
                    format!("encoding timed out after {:?}", timeouts.encode),
                    None,
                )
            }
            Ok(Err(join_error)) => {
                return outcome(
                    JobStatus::EncodeFailed,
                    format!("encoder task failed: {}", join_error),
                    None,
                )
            }
            Ok(Ok((_, Err(e)))) => return outcome(JobStatus::EncodeFailed, e.to_string(), None),
            Ok(Ok((job, Ok(image)))) => (job, image),
        };

        let write = self
            .sink
            .write_image(dir, &job.options.destination_path, &image.bytes);
        match tokio::time::timeout(timeouts.write, write).await {
            Err(_) => outcome(
                JobStatus::IoFailed,
                format!(
                    "writing {} timed out after {:?}",
                    job.options.destination_path, timeouts.write
                ),
                None,
            ),
            Ok(Err(e)) => outcome(
                JobStatus::IoFailed,
                format!("writing {} failed: {}", job.options.destination_path, e),
                None,
            ),
            Ok(Ok(path)) => {
                let detail = job
                    .renamed_from
                    .as_ref()
                    .map(|original| {
                        format!(
                            "{}: renamed {} -> {}",
                            ValidationReason::DuplicateDestination,
                            original,
                            job.options.destination_path
                        )
                    })
                    .unwrap_or_default();
                outcome(JobStatus::Success, detail, Some(path.display().to_string()))
            }
        }
    }

    fn transition(&self, state: &mut RunState, next: RunState) {
        debug_assert!(
            state.can_transition_to(next),
            "illegal run state transition {:?} -> {:?}",
            state,
            next
        );
        *state = next;
        self.observer.on_state(next);
    }

    /// 結構性錯誤：中止執行；若已有結果則附上部分報告
    fn fail(
        &self,
        state: &mut RunState,
        err: BatchError,
        outcomes: &[JobOutcome],
        started_at: DateTime<Utc>,
    ) -> BatchError {
        self.observer.on_fatal(&err.to_string());
        self.transition(state, RunState::Aborted);

        if outcomes.is_empty() {
            return err;
        }

        let partial = ReportBuilder::build(outcomes, started_at, Utc::now())
            .with_state(RunState::Aborted, Some(err.to_string()));
        BatchError::Interrupted {
            cause: Box::new(err),
            partial: Box::new(partial),
        }
    }
}
