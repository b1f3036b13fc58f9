use std::sync::Arc;

use tracing::{error, info, warn};

use super::retry::RetryPolicy;
use crate::api::client::JobQueue;
use crate::api::models::{Job, JobStatus, PrintTask, StatusUpdate, UndecodableJob};
use crate::http::state::AgentState;
use crate::printer::{PdfPrinter, PrintError, TicketPrinter};

/// Terminal result of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub result: JobResult,
    /// Whether the backend acknowledged the terminal status
    pub reported: bool,
}

/// Routes jobs to printer drivers and reports their status transitions
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    thermal: Arc<dyn TicketPrinter>,
    regular: Arc<dyn PdfPrinter>,
    agent_id: String,
    retry: RetryPolicy,
    state: Arc<AgentState>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        thermal: Arc<dyn TicketPrinter>,
        regular: Arc<dyn PdfPrinter>,
        agent_id: impl Into<String>,
        retry: RetryPolicy,
        state: Arc<AgentState>,
    ) -> Self {
        Self {
            queue,
            thermal,
            regular,
            agent_id: agent_id.into(),
            retry,
            state,
        }
    }

    /// Process one job end to end
    ///
    /// # Flow
    /// - Malformed jobs are reported FAILED straight away, no I/O
    /// - PRINTING is reported; if that fails the job is reported FAILED
    /// - The driver runs, then COMPLETED or FAILED is reported
    ///
    /// Never returns an error: every failure ends up in the outcome.
    pub async fn dispatch(&self, job: &Job) -> JobOutcome {
        info!(
            "Processing job {} ({:?}) for station {}",
            job.id,
            job.printer_type,
            job.station_name()
        );

        let result = match job.task() {
            Ok(task) => self.run(job, &task).await,
            Err(e) => {
                warn!("Job {} rejected: {}", job.id, e);
                Err(e.to_string())
            }
        };

        let (result, status, error_message) = match result {
            Ok(()) => (JobResult::Completed, JobStatus::Completed, None),
            Err(message) => (
                JobResult::Failed(message.clone()),
                JobStatus::Failed,
                Some(message),
            ),
        };

        match &result {
            JobResult::Completed => {
                self.state.record_completed();
                info!("Job {} completed", job.id);
            }
            JobResult::Failed(message) => {
                self.state.record_failed();
                error!("Job {} failed: {}", job.id, message);
            }
        }

        let reported = self.report(&job.id, status, error_message).await;
        JobOutcome {
            job_id: job.id.clone(),
            result,
            reported,
        }
    }

    /// Fail a pending entry that did not decode; entries without an id can only be logged
    pub async fn reject(&self, entry: &UndecodableJob) -> Option<JobOutcome> {
        let Some(job_id) = entry.id.as_deref() else {
            warn!("Skipping pending entry without an id: {}", entry.reason);
            return None;
        };

        self.state.record_failed();
        error!("Job {} failed: {}", job_id, entry.reason);
        let reported = self
            .report(job_id, JobStatus::Failed, Some(entry.reason.clone()))
            .await;
        Some(JobOutcome {
            job_id: job_id.to_string(),
            result: JobResult::Failed(entry.reason.clone()),
            reported,
        })
    }

    /// PRINTING report plus the driver call; the error string becomes the job's failure reason
    async fn run(&self, job: &Job, task: &PrintTask) -> Result<(), String> {
        self.update(&job.id, JobStatus::Printing, None)
            .await
            .map_err(|e| format!("Failed to mark job as printing: {}", e))?;

        self.execute(&job.id, task).await.map_err(|e| e.to_string())
    }

    async fn execute(&self, job_id: &str, task: &PrintTask) -> Result<(), PrintError> {
        match task {
            PrintTask::Thermal { target, ticket } => {
                info!("Sending job {} to thermal printer {}", job_id, target);
                self.thermal.print_ticket(target, ticket).await
            }
            PrintTask::Regular { target, pdf_url } => {
                info!(
                    "Sending job {} to printer queue {}",
                    job_id, target.printer_name
                );
                self.regular.print_pdf(job_id, target, pdf_url).await
            }
        }
    }

    /// Terminal report; failures after retries leave the backend view stale
    async fn report(&self, job_id: &str, status: JobStatus, error_message: Option<String>) -> bool {
        match self.update(job_id, status, error_message).await {
            Ok(()) => true,
            Err(e) => {
                self.state.record_report_failure();
                error!(
                    "Could not report job {} as {:?}, backend status is stale: {}",
                    job_id, status, e
                );
                false
            }
        }
    }

    async fn update(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<(), crate::api::error::ApiError> {
        let update = StatusUpdate {
            status,
            agent_id: self.agent_id.clone(),
            error_message,
        };
        let what = format!("Status update {:?} for job {}", status, job_id);
        self.retry
            .run(&what, || self.queue.update_status(job_id, &update))
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::api::models::{DocumentData, PendingJob, RegularTarget, ThermalTarget};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory backend recording every status update
    #[derive(Default)]
    pub(crate) struct FakeQueue {
        pub pending: Mutex<Vec<Vec<PendingJob>>>,
        pub updates: Mutex<Vec<(String, JobStatus, Option<String>)>>,
        pub fetches: Mutex<usize>,
        pub fail_fetch: bool,
        /// Statuses whose update call always fails
        pub reject: HashSet<(String, &'static str)>,
    }

    impl FakeQueue {
        pub fn push_jobs(&self, jobs: Vec<Job>) {
            self.push_entries(jobs.into_iter().map(Ok).collect());
        }

        pub fn push_entries(&self, entries: Vec<PendingJob>) {
            self.pending.lock().unwrap().push(entries);
        }

        pub fn statuses(&self, job_id: &str) -> Vec<JobStatus> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _, _)| id == job_id)
                .map(|(_, status, _)| *status)
                .collect()
        }
    }

    fn status_name(status: JobStatus) -> &'static str {
        match status {
            JobStatus::Pending => "PENDING",
            JobStatus::Printing => "PRINTING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    #[async_trait]
    impl JobQueue for FakeQueue {
        async fn fetch_pending(&self, limit: usize) -> Result<Vec<PendingJob>, ApiError> {
            *self.fetches.lock().unwrap() += 1;
            if self.fail_fetch {
                return Err(ApiError::Connect {
                    url: "http://localhost:3000".to_string(),
                    message: "connection refused".to_string(),
                });
            }
            let mut pending = self.pending.lock().unwrap();
            let mut batch = if pending.is_empty() {
                Vec::new()
            } else {
                pending.remove(0)
            };
            batch.truncate(limit);
            Ok(batch)
        }

        async fn update_status(&self, job_id: &str, update: &StatusUpdate) -> Result<(), ApiError> {
            self.updates.lock().unwrap().push((
                job_id.to_string(),
                update.status,
                update.error_message.clone(),
            ));
            if self
                .reject
                .contains(&(job_id.to_string(), status_name(update.status)))
            {
                return Err(ApiError::Timeout {
                    url: format!("http://localhost:3000/api/print/jobs/{}/status", job_id),
                });
            }
            Ok(())
        }
    }

    /// Thermal driver that fails for chosen hosts
    #[derive(Default)]
    pub(crate) struct FakeThermal {
        pub printed: Mutex<Vec<(String, String)>>,
        pub failing_hosts: HashSet<String>,
    }

    #[async_trait]
    impl TicketPrinter for FakeThermal {
        async fn print_ticket(
            &self,
            target: &ThermalTarget,
            ticket: &DocumentData,
        ) -> Result<(), PrintError> {
            if self.failing_hosts.contains(&target.host) {
                return Err(PrintError::Connect {
                    address: target.to_string(),
                    message: "Connection refused (os error 111)".to_string(),
                });
            }
            self.printed
                .lock()
                .unwrap()
                .push((target.to_string(), ticket.order_number.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakePdf {
        pub printed: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl PdfPrinter for FakePdf {
        async fn print_pdf(
            &self,
            job_id: &str,
            target: &RegularTarget,
            pdf_url: &str,
        ) -> Result<(), PrintError> {
            self.printed.lock().unwrap().push((
                job_id.to_string(),
                target.printer_name.clone(),
                pdf_url.to_string(),
            ));
            Ok(())
        }
    }

    pub(crate) fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    pub(crate) fn thermal_job(id: &str, ip: &str) -> Job {
        serde_json::from_value(json!({
            "id": id,
            "kitchenStation": {"name": "Grill"},
            "printerType": "THERMAL",
            "printerIp": ip,
            "documentData": {
                "orderNumber": "42",
                "items": [{"quantity": 2, "name": "Burger", "modifiers": ["no onion"]}]
            }
        }))
        .unwrap()
    }

    pub(crate) fn regular_job(id: &str, pdf_url: &str) -> Job {
        serde_json::from_value(json!({
            "id": id,
            "printerType": "REGULAR",
            "printerIp": "Office",
            "pdfUrl": pdf_url
        }))
        .unwrap()
    }

    struct Harness {
        queue: Arc<FakeQueue>,
        thermal: Arc<FakeThermal>,
        pdf: Arc<FakePdf>,
        state: Arc<AgentState>,
        dispatcher: Dispatcher,
    }

    fn harness(queue: FakeQueue, thermal: FakeThermal) -> Harness {
        let queue = Arc::new(queue);
        let thermal = Arc::new(thermal);
        let pdf = Arc::new(FakePdf::default());
        let state = Arc::new(AgentState::new("agent-test"));
        let dispatcher = Dispatcher::new(
            queue.clone(),
            thermal.clone(),
            pdf.clone(),
            "agent-test",
            fast_retry(),
            state.clone(),
        );
        Harness {
            queue,
            thermal,
            pdf,
            state,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn thermal_job_reports_printing_then_completed() {
        let h = harness(FakeQueue::default(), FakeThermal::default());

        let outcome = h.dispatcher.dispatch(&thermal_job("j1", "10.0.0.5")).await;

        assert_eq!(outcome.result, JobResult::Completed);
        assert!(outcome.reported);
        assert_eq!(
            h.queue.statuses("j1"),
            vec![JobStatus::Printing, JobStatus::Completed]
        );
        assert_eq!(
            *h.thermal.printed.lock().unwrap(),
            vec![("10.0.0.5:9100".to_string(), "42".to_string())]
        );
        assert_eq!(h.state.snapshot().jobs_completed, 1);
    }

    #[tokio::test]
    async fn regular_job_without_pdf_url_fails_without_download() {
        let h = harness(FakeQueue::default(), FakeThermal::default());

        let outcome = h.dispatcher.dispatch(&regular_job("j2", "")).await;

        assert_eq!(
            outcome.result,
            JobResult::Failed("PDF URL is required for regular printer".to_string())
        );
        assert_eq!(h.queue.statuses("j2"), vec![JobStatus::Failed]);
        assert!(h.pdf.printed.lock().unwrap().is_empty());
        let updates = h.queue.updates.lock().unwrap();
        assert_eq!(
            updates[0].2.as_deref(),
            Some("PDF URL is required for regular printer")
        );
    }

    #[tokio::test]
    async fn regular_job_goes_to_pdf_driver() {
        let h = harness(FakeQueue::default(), FakeThermal::default());

        let outcome = h.dispatcher.dispatch(&regular_job("j3", "/pdf/j3")).await;

        assert_eq!(outcome.result, JobResult::Completed);
        assert_eq!(
            *h.pdf.printed.lock().unwrap(),
            vec![("j3".to_string(), "Office".to_string(), "/pdf/j3".to_string())]
        );
        assert_eq!(
            h.queue.statuses("j3"),
            vec![JobStatus::Printing, JobStatus::Completed]
        );
    }

    #[tokio::test]
    async fn driver_error_is_reported_with_message() {
        let thermal = FakeThermal {
            failing_hosts: HashSet::from(["10.0.0.9".to_string()]),
            ..Default::default()
        };
        let h = harness(FakeQueue::default(), thermal);

        let outcome = h.dispatcher.dispatch(&thermal_job("j4", "10.0.0.9")).await;

        let expected =
            "Failed to connect to printer at 10.0.0.9:9100: Connection refused (os error 111)";
        assert_eq!(outcome.result, JobResult::Failed(expected.to_string()));
        let updates = h.queue.updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].1, JobStatus::Failed);
        assert_eq!(updates[1].2.as_deref(), Some(expected));
        assert_eq!(h.state.snapshot().jobs_failed, 1);
    }

    #[tokio::test]
    async fn printing_report_failure_aborts_job() {
        let queue = FakeQueue {
            reject: HashSet::from([("j5".to_string(), "PRINTING")]),
            ..Default::default()
        };
        let h = harness(queue, FakeThermal::default());

        let outcome = h.dispatcher.dispatch(&thermal_job("j5", "10.0.0.5")).await;

        match &outcome.result {
            JobResult::Failed(msg) => assert!(msg.starts_with("Failed to mark job as printing")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(outcome.reported);
        assert!(h.thermal.printed.lock().unwrap().is_empty());
        // One attempt plus two retries, then the terminal report
        assert_eq!(
            h.queue.statuses("j5"),
            vec![
                JobStatus::Printing,
                JobStatus::Printing,
                JobStatus::Printing,
                JobStatus::Failed
            ]
        );
    }

    #[tokio::test]
    async fn failed_terminal_report_is_counted_not_retried_forever() {
        let queue = FakeQueue {
            reject: HashSet::from([("j6".to_string(), "COMPLETED")]),
            ..Default::default()
        };
        let h = harness(queue, FakeThermal::default());

        let outcome = h.dispatcher.dispatch(&thermal_job("j6", "10.0.0.5")).await;

        assert_eq!(outcome.result, JobResult::Completed);
        assert!(!outcome.reported);
        assert_eq!(h.queue.statuses("j6").len(), 1 + 3);
        assert_eq!(h.state.snapshot().report_failures, 1);
    }

    #[tokio::test]
    async fn unsupported_printer_type_is_failed_explicitly() {
        let h = harness(FakeQueue::default(), FakeThermal::default());
        let job: Job = serde_json::from_value(json!({
            "id": "j7",
            "printerType": "LABEL",
            "printerIp": "10.0.0.5"
        }))
        .unwrap();

        let outcome = h.dispatcher.dispatch(&job).await;

        assert_eq!(
            outcome.result,
            JobResult::Failed("Unsupported printer type".to_string())
        );
        assert_eq!(h.queue.statuses("j7"), vec![JobStatus::Failed]);
    }

    #[tokio::test]
    async fn undecodable_job_is_failed_with_reason() {
        let h = harness(FakeQueue::default(), FakeThermal::default());
        let entry = Job::from_value(json!({"id": "j8", "printerIp": "10.0.0.5"})).unwrap_err();

        let outcome = h.dispatcher.reject(&entry).await.unwrap();

        assert_eq!(outcome.job_id, "j8");
        assert!(outcome.reported);
        assert_eq!(h.queue.statuses("j8"), vec![JobStatus::Failed]);
        let updates = h.queue.updates.lock().unwrap();
        assert!(updates[0]
            .2
            .as_deref()
            .unwrap()
            .starts_with("Invalid job payload"));
        assert_eq!(h.state.snapshot().jobs_failed, 1);
    }

    #[tokio::test]
    async fn undecodable_entry_without_id_is_skipped() {
        let h = harness(FakeQueue::default(), FakeThermal::default());
        let entry = Job::from_value(json!({"printerType": 5})).unwrap_err();

        assert_eq!(h.dispatcher.reject(&entry).await, None);
        assert!(h.queue.updates.lock().unwrap().is_empty());
    }
}
