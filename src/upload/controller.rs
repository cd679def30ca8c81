//! Upload orchestration: file upload, status polling, completion.
//!
//! One controller instance owns the whole lifecycle of "the current upload".
//! Status polls run at a fixed cadence and strictly serialized: the next
//! request starts only after the previous one has finished. Starting a new
//! upload (or resetting) invalidates any in-flight poll via a generation
//! counter, so stale responses can never resurface in fresh state.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::types::{JobStatus, ProcessingStatus, UploadAccepted, UploadOptions};
use crate::api::ApiClient;
use crate::auth::session::unix_now;
use crate::config::STATUS_POLL_INTERVAL;
use crate::error::AppError;
use crate::events::{ProcessingCompleted, ProcessingEventBus};

/// Lifecycle phase of the current upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPhase {
    Idle,
    Uploading,
    Polling,
    Completed,
    Failed,
}

/// The job being tracked, merged from the upload acceptance and every
/// subsequent status poll.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub processing_id: String,
    pub file_name: String,
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub current_stage: Option<String>,
    /// Failure reason when the job failed, verbatim from the backend.
    pub message: Option<String>,
    pub result_url: Option<String>,
    pub preview_url: Option<String>,
    pub record_count: Option<u64>,
}

impl ProcessingJob {
    fn from_accepted(accepted: &UploadAccepted) -> Self {
        Self {
            processing_id: accepted.processing_id.clone(),
            file_name: accepted.file_name.clone(),
            status: JobStatus::Queued,
            progress: None,
            current_stage: None,
            message: None,
            result_url: None,
            preview_url: accepted.preview_url.clone(),
            record_count: None,
        }
    }

    fn apply(&mut self, status: &ProcessingStatus) {
        self.status = status.status;
        self.progress = status.progress.or(self.progress);
        self.current_stage = status.current_stage.clone().or(self.current_stage.take());
        self.message = status.message.clone().or(self.message.take());
        self.result_url = status.result_url.clone().or(self.result_url.take());
        self.preview_url = status.preview_url.clone().or(self.preview_url.take());
        self.record_count = status.record_count.or(self.record_count);
    }
}

/// Point-in-time view of the controller for rendering.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSnapshot {
    pub phase: UploadPhase,
    pub job: Option<ProcessingJob>,
    /// 0..=100 while uploading.
    pub upload_progress: u8,
    /// Terminal failure message (upload error or failed job).
    pub error: Option<String>,
    /// Most recent transient poll failure; polling continues past these.
    pub polling_error: Option<String>,
}

struct Inner {
    phase: UploadPhase,
    job: Option<ProcessingJob>,
    upload_progress: u8,
    error: Option<String>,
    polling_error: Option<String>,
    completed_published: bool,
    /// Bumped on every reset; in-flight work from older generations must
    /// discard its results.
    generation: u64,
    cancel: CancellationToken,
}

impl Inner {
    fn new() -> Self {
        Self {
            phase: UploadPhase::Idle,
            job: None,
            upload_progress: 0,
            error: None,
            polling_error: None,
            completed_published: false,
            generation: 0,
            cancel: CancellationToken::new(),
        }
    }
}

pub struct UploadController {
    api: Arc<ApiClient>,
    bus: Arc<ProcessingEventBus>,
    poll_interval: Duration,
    inner: Mutex<Inner>,
}

impl UploadController {
    pub fn new(api: Arc<ApiClient>, bus: Arc<ProcessingEventBus>) -> Arc<Self> {
        Self::with_poll_interval(api, bus, STATUS_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        api: Arc<ApiClient>,
        bus: Arc<ProcessingEventBus>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            bus,
            poll_interval,
            inner: Mutex::new(Inner::new()),
        })
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        let inner = self.inner.lock().unwrap();
        UploadSnapshot {
            phase: inner.phase,
            job: inner.job.clone(),
            upload_progress: inner.upload_progress,
            error: inner.error.clone(),
            polling_error: inner.polling_error.clone(),
        }
    }

    /// Whether the finished result can be downloaded.
    pub fn can_download(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.phase == UploadPhase::Completed
            && inner
                .job
                .as_ref()
                .map(|j| j.result_url.is_some())
                .unwrap_or(false)
    }

    /// Cancels any in-flight upload or poll and returns to `Idle`.
    /// Results of work started before the reset are discarded.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.cancel.cancel();
        inner.cancel = CancellationToken::new();
        inner.generation += 1;
        inner.phase = UploadPhase::Idle;
        inner.job = None;
        inner.upload_progress = 0;
        inner.error = None;
        inner.polling_error = None;
        inner.completed_published = false;
    }

    /// Uploads a CSV and begins polling its processing status.
    ///
    /// Any previous upload is reset first. Returns once the backend has
    /// accepted the file; polling continues in a background task.
    pub async fn start(
        self: &Arc<Self>,
        file_path: &Path,
        options: &UploadOptions,
    ) -> Result<UploadAccepted, AppError> {
        self.reset();
        let generation = {
            let mut inner = self.inner.lock().unwrap();
            inner.phase = UploadPhase::Uploading;
            inner.generation
        };

        let progress_target = Arc::downgrade(self);
        let progress: crate::api::client::ProgressFn = Arc::new(move |pct| {
            if let Some(controller) = progress_target.upgrade() {
                let mut inner = controller.inner.lock().unwrap();
                if inner.generation == generation {
                    inner.upload_progress = pct;
                }
            }
        });

        let accepted = match self
            .api
            .upload_lead_file(file_path, options, Some(progress))
            .await
        {
            Ok(accepted) => accepted,
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                if inner.generation == generation {
                    inner.phase = UploadPhase::Failed;
                    inner.error = Some(e.user_message());
                }
                return Err(e);
            }
        };

        let cancel = {
            let mut inner = self.inner.lock().unwrap();
            if inner.generation != generation {
                // Reset raced the upload; the acceptance belongs to a dead run.
                return Err(AppError::Cancelled);
            }
            inner.phase = UploadPhase::Polling;
            inner.job = Some(ProcessingJob::from_accepted(&accepted));
            inner.cancel.clone()
        };

        info!(
            "[UPLOAD] Accepted {} as {}, polling",
            accepted.file_name, accepted.processing_id
        );
        let controller = self.clone();
        let processing_id = accepted.processing_id.clone();
        tokio::spawn(async move {
            controller.poll_loop(generation, cancel, processing_id).await;
        });

        Ok(accepted)
    }

    /// Fixed-cadence serialized polling. First fetch is immediate; each
    /// subsequent fetch starts `poll_interval` after the previous one
    /// finished, never concurrently with it.
    async fn poll_loop(&self, generation: u64, cancel: CancellationToken, processing_id: String) {
        loop {
            match self.api.status(&processing_id).await {
                Ok(status) => {
                    if self.apply_status(generation, &status) {
                        return;
                    }
                }
                Err(e) => {
                    // Transient: surface it, keep the cadence going.
                    warn!("[UPLOAD] Poll for {} failed: {}", processing_id, e);
                    let mut inner = self.inner.lock().unwrap();
                    if inner.generation != generation {
                        return;
                    }
                    inner.polling_error = Some(e.user_message());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Folds one status response into state. Returns true when polling
    /// should stop (terminal status or stale generation).
    fn apply_status(&self, generation: u64, status: &ProcessingStatus) -> bool {
        let event = {
            let mut inner = self.inner.lock().unwrap();
            if inner.generation != generation {
                return true;
            }
            inner.polling_error = None;
            let Some(job) = inner.job.as_mut() else {
                return true;
            };
            job.apply(status);

            match status.status {
                JobStatus::Completed => {
                    inner.phase = UploadPhase::Completed;
                }
                JobStatus::Failed => {
                    inner.phase = UploadPhase::Failed;
                    inner.error = inner.job.as_ref().and_then(|j| j.message.clone());
                }
                JobStatus::Queued | JobStatus::Processing => return false,
            }

            // Terminal from here. Only the first transition into completed
            // publishes; failures surface through the snapshot instead.
            if status.status != JobStatus::Completed || inner.completed_published {
                None
            } else {
                inner.completed_published = true;
                inner.job.as_ref().map(|job| ProcessingCompleted {
                    processing_id: job.processing_id.clone(),
                    file_name: job.file_name.clone(),
                    status: job.status,
                    result_url: job.result_url.clone(),
                    record_count: job.record_count,
                    completed_at: unix_now(),
                })
            }
        };

        // Listeners run outside our lock; they may read snapshot().
        if let Some(event) = event {
            info!(
                "[UPLOAD] Job {} finished: {}",
                event.processing_id,
                event.status.as_str()
            );
            self.bus.publish(event);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::{AuthStore, TokenGuard};
    use crate::bridge::testing::FakeSessionBridge;
    use crate::bridge::SessionTokens;
    use crate::config::ApiConfig;

    const TEST_POLL: Duration = Duration::from_millis(30);

    async fn api_for(server: &MockServer) -> Arc<ApiClient> {
        let bridge = Arc::new(FakeSessionBridge::default());
        let store = Arc::new(AuthStore::new(bridge.clone()));
        store
            .install_session(SessionTokens {
                access_token: "test-token".into(),
                refresh_token: "test-refresh".into(),
                instance_url: "https://example.my.salesforce.com".into(),
                issued_at: unix_now(),
                expires_in: Some(7200),
            })
            .await
            .unwrap();
        let guard = Arc::new(TokenGuard::new(store, bridge));
        let config = ApiConfig::resolve(Some(&format!("{}/api/v1", server.uri()))).unwrap();
        Arc::new(ApiClient::new(config, guard).unwrap())
    }

    fn csv_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "email,name").unwrap();
        writeln!(file, "a@example.com,Ada").unwrap();
        file.flush().unwrap();
        file
    }

    async fn mount_upload_accepted(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/leads/upload"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "processingId": "proc-1",
                "fileName": "leads.csv"
            })))
            .mount(server)
            .await;
    }

    async fn wait_for(controller: &Arc<UploadController>, pred: impl Fn(&UploadSnapshot) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if pred(&controller.snapshot()) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for state");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn full_lifecycle_publishes_completion_exactly_once() {
        let server = MockServer::start().await;
        mount_upload_accepted(&server).await;
        // Two in-flight polls see "processing", then every poll sees "completed".
        Mock::given(method("GET"))
            .and(path("/api/v1/leads/status/proc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "processing", "progress": 50, "currentStage": "ai-enrichment"
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/leads/status/proc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "completed",
                "resultUrl": "/api/v1/leads/download/proc-1",
                "recordCount": 2
            })))
            .mount(&server)
            .await;

        let bus = ProcessingEventBus::new();
        let events: Arc<StdMutex<Vec<ProcessingCompleted>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = bus.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        let controller =
            UploadController::with_poll_interval(api_for(&server).await, bus, TEST_POLL);
        let file = csv_file();
        let accepted = controller
            .start(file.path(), &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(accepted.processing_id, "proc-1");

        wait_for(&controller, |s| s.phase == UploadPhase::Completed).await;
        // Leave time for any (incorrect) duplicate publication.
        tokio::time::sleep(TEST_POLL * 3).await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1, "completion must publish exactly once");
        assert_eq!(events[0].processing_id, "proc-1");
        assert_eq!(events[0].record_count, Some(2));
        assert!(controller.can_download());
    }

    #[tokio::test]
    async fn failed_job_surfaces_backend_message_verbatim() {
        let server = MockServer::start().await;
        mount_upload_accepted(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/leads/status/proc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "failed",
                "message": "Row 5: invalid email address"
            })))
            .mount(&server)
            .await;

        let bus = ProcessingEventBus::new();
        let controller =
            UploadController::with_poll_interval(api_for(&server).await, bus.clone(), TEST_POLL);
        let file = csv_file();
        controller
            .start(file.path(), &UploadOptions::default())
            .await
            .unwrap();

        wait_for(&controller, |s| s.phase == UploadPhase::Failed).await;
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some("Row 5: invalid email address"));
        assert_eq!(
            snapshot.job.unwrap().message.as_deref(),
            Some("Row 5: invalid email address")
        );
        assert!(!controller.can_download());
        // Failures never publish; the snapshot is the failure surface.
        assert!(bus.recent().is_empty());
    }

    #[tokio::test]
    async fn transient_poll_errors_do_not_stop_polling() {
        let server = MockServer::start().await;
        mount_upload_accepted(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/leads/status/proc-1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("blip"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/leads/status/proc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "completed", "resultUrl": "/x"
            })))
            .mount(&server)
            .await;

        let controller = UploadController::with_poll_interval(
            api_for(&server).await,
            ProcessingEventBus::new(),
            TEST_POLL,
        );
        let file = csv_file();
        controller
            .start(file.path(), &UploadOptions::default())
            .await
            .unwrap();

        wait_for(&controller, |s| s.phase == UploadPhase::Completed).await;
        // The transient error was cleared by the successful poll.
        assert!(controller.snapshot().polling_error.is_none());
    }

    #[tokio::test]
    async fn reset_discards_results_of_inflight_polls() {
        let server = MockServer::start().await;
        mount_upload_accepted(&server).await;
        // Slow status response: the reset lands while this poll is in flight.
        Mock::given(method("GET"))
            .and(path("/api/v1/leads/status/proc-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "completed", "resultUrl": "/x"}))
                    .set_delay(Duration::from_millis(150)),
            )
            .mount(&server)
            .await;

        let bus = ProcessingEventBus::new();
        let controller =
            UploadController::with_poll_interval(api_for(&server).await, bus.clone(), TEST_POLL);
        let file = csv_file();
        controller
            .start(file.path(), &UploadOptions::default())
            .await
            .unwrap();

        controller.reset();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, UploadPhase::Idle);
        assert!(snapshot.job.is_none());
        assert!(bus.recent().is_empty(), "stale poll must not publish");
    }

    #[tokio::test]
    async fn upload_failure_moves_to_failed_phase() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/leads/upload"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"message": "Missing file in upload"})),
            )
            .mount(&server)
            .await;

        let controller = UploadController::with_poll_interval(
            api_for(&server).await,
            ProcessingEventBus::new(),
            TEST_POLL,
        );
        let file = csv_file();
        let err = controller
            .start(file.path(), &UploadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, UploadPhase::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("Missing file in upload"));
    }

    #[tokio::test]
    async fn polls_are_serialized_at_fixed_cadence() {
        let server = MockServer::start().await;
        mount_upload_accepted(&server).await;
        // Each poll takes 40ms; with a 30ms interval, request starts must be
        // at least 70ms apart if polling is serialized.
        Mock::given(method("GET"))
            .and(path("/api/v1/leads/status/proc-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "processing"}))
                    .set_delay(Duration::from_millis(40)),
            )
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/leads/status/proc-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "completed", "resultUrl": "/x"})),
            )
            .mount(&server)
            .await;

        let controller = UploadController::with_poll_interval(
            api_for(&server).await,
            ProcessingEventBus::new(),
            TEST_POLL,
        );
        let file = csv_file();
        let started = Instant::now();
        controller
            .start(file.path(), &UploadOptions::default())
            .await
            .unwrap();
        wait_for(&controller, |s| s.phase == UploadPhase::Completed).await;
        let elapsed = started.elapsed();

        let status_requests = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path().contains("/leads/status/"))
            .count();
        assert_eq!(status_requests, 4);
        // 3 slow polls, each followed by a full interval before the next:
        // serialized polling cannot finish faster than 3 * (40 + 30) ms.
        assert!(
            elapsed >= Duration::from_millis(200),
            "polls overlapped: completed in {:?}",
            elapsed
        );
    }
}
