//! Progress tracking for one form pull.
//!
//! [`PullTracker`] turns what the orchestrator reports into status lines,
//! appends them to the form's [`FormStatus`] history and forwards them to an
//! [`EventSink`]. It performs no I/O and makes no decisions.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::form::FormKey;

use super::PullError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Progress,
    Failure,
    Cancelled,
    Completed,
}

/// One status line about one form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub form_id: String,
    pub kind: ProgressKind,
    pub message: String,
    /// HTTP status, for failures the server answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Receiver of progress events.
///
/// Cheaply cloneable; the CLI logs events, tests collect them.
#[derive(Clone)]
pub struct EventSink {
    accept: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

impl EventSink {
    pub fn new<F>(accept: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            accept: Arc::new(accept),
        }
    }

    /// Forward events into an unbounded channel. Events sent after the
    /// receiver is dropped are lost.
    pub fn channel(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self::new(move |event| {
            if let Err(e) = tx.send(event) {
                tracing::debug!("Progress event dropped: {}", e);
            }
        })
    }

    /// Drop every event.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn accept(&self, event: ProgressEvent) {
        (self.accept)(event)
    }
}

/// Status history of one form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormStatus {
    pub form: String,
    pub history: Vec<String>,
}

impl FormStatus {
    pub fn last(&self) -> Option<&str> {
        self.history.last().map(String::as_str)
    }
}

/// Counters of one pull, used to tell "completed" from "completed with errors".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PullSummary {
    pub submissions_downloaded: usize,
    pub submissions_skipped: usize,
    pub submissions_failed: usize,
    pub attachments_downloaded: usize,
    pub attachments_skipped: usize,
    pub attachments_failed: usize,
    pub errors: usize,
    pub cancelled: bool,
}

impl PullSummary {
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

#[derive(Debug, Default)]
struct Counters {
    submissions_total: AtomicUsize,
    submissions_downloaded: AtomicUsize,
    submissions_skipped: AtomicUsize,
    submissions_failed: AtomicUsize,
    form_attachments_total: AtomicUsize,
    form_attachments_done: AtomicUsize,
    attachments_downloaded: AtomicUsize,
    attachments_skipped: AtomicUsize,
    attachments_failed: AtomicUsize,
    errors: AtomicUsize,
    cancellations: AtomicUsize,
}

/// Records the progress of pulling one form.
#[derive(Debug)]
pub struct PullTracker {
    form: FormKey,
    sink: EventSink,
    status: Mutex<FormStatus>,
    counters: Counters,
}

impl PullTracker {
    pub fn new(form: FormKey, sink: EventSink) -> Self {
        let status = FormStatus {
            form: form.name.clone(),
            history: Vec::new(),
        };
        Self {
            form,
            sink,
            status: Mutex::new(status),
            counters: Counters::default(),
        }
    }

    pub fn form(&self) -> &FormKey {
        &self.form
    }

    /// Snapshot of the status history.
    pub fn form_status(&self) -> FormStatus {
        self.status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> PullSummary {
        let c = &self.counters;
        PullSummary {
            submissions_downloaded: c.submissions_downloaded.load(Ordering::SeqCst),
            submissions_skipped: c.submissions_skipped.load(Ordering::SeqCst),
            submissions_failed: c.submissions_failed.load(Ordering::SeqCst),
            attachments_downloaded: c.attachments_downloaded.load(Ordering::SeqCst),
            attachments_skipped: c.attachments_skipped.load(Ordering::SeqCst),
            attachments_failed: c.attachments_failed.load(Ordering::SeqCst),
            errors: c.errors.load(Ordering::SeqCst),
            cancelled: c.cancellations.load(Ordering::SeqCst) > 0,
        }
    }

    fn emit(&self, kind: ProgressKind, message: String, status: Option<u16>) {
        if let Ok(mut form_status) = self.status.lock() {
            form_status.history.push(message.clone());
        }
        self.sink.accept(ProgressEvent {
            timestamp: Utc::now(),
            form_id: self.form.id.clone(),
            kind,
            message,
            status,
        });
    }

    fn progress(&self, message: String) {
        self.emit(ProgressKind::Progress, message, None);
    }

    fn failure(&self, message: String, error: &PullError) {
        self.counters.errors.fetch_add(1, Ordering::SeqCst);
        self.emit(
            ProgressKind::Failure,
            format!("{message}: {}", error.describe()),
            error.status(),
        );
    }

    /// A stage stopped launching work because the runner was cancelled.
    pub fn track_cancellation(&self, stage: &str) {
        self.counters.cancellations.fetch_add(1, Ordering::SeqCst);
        self.emit(
            ProgressKind::Cancelled,
            format!("Operation cancelled while {stage}"),
            None,
        );
    }

    pub fn track_form_downloaded(&self) {
        self.progress("Form definition downloaded".to_string());
    }

    pub fn track_form_error(&self, error: &PullError) {
        self.failure("Error downloading form definition".to_string(), error);
    }

    pub fn track_manifest_error(&self, error: &PullError) {
        self.failure("Error getting form attachment list".to_string(), error);
    }

    pub fn track_pagination_error(&self, error: &PullError) {
        self.failure("Error getting submission ids".to_string(), error);
    }

    /// Result of comparing the manifest against local media.
    pub fn track_form_attachments(&self, to_download: usize, up_to_date: usize) {
        self.counters
            .form_attachments_total
            .store(to_download, Ordering::SeqCst);
        self.counters
            .attachments_skipped
            .fetch_add(up_to_date, Ordering::SeqCst);
        if up_to_date > 0 {
            self.progress(format!(
                "Skipped {up_to_date} form attachments already up to date"
            ));
        }
        if to_download > 0 {
            self.progress(format!("Downloading {to_download} form attachments"));
        }
    }

    pub fn track_form_attachment_downloaded(&self) {
        self.counters
            .attachments_downloaded
            .fetch_add(1, Ordering::SeqCst);
        let done = self.counters.form_attachments_done.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.counters.form_attachments_total.load(Ordering::SeqCst);
        self.progress(format!("Form attachment {done} of {total} downloaded"));
    }

    pub fn track_form_attachment_error(&self, filename: &str, error: &PullError) {
        self.counters.attachments_failed.fetch_add(1, Ordering::SeqCst);
        self.counters
            .form_attachments_done
            .fetch_add(1, Ordering::SeqCst);
        self.failure(format!("Error downloading form attachment {filename}"), error);
    }

    /// Instance ids to download after filtering out the recorded ones.
    pub fn track_submissions(&self, to_download: usize, already_pulled: usize) {
        self.counters
            .submissions_total
            .store(to_download, Ordering::SeqCst);
        self.counters
            .submissions_skipped
            .fetch_add(already_pulled, Ordering::SeqCst);
        self.progress(format!(
            "Downloading {to_download} submissions ({already_pulled} already pulled)"
        ));
    }

    pub fn track_submission_downloaded(&self) {
        let done = self
            .counters
            .submissions_downloaded
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        let total = self.counters.submissions_total.load(Ordering::SeqCst);
        self.progress(format!("Submission {done} of {total} downloaded"));
    }

    pub fn track_submission_error(&self, instance_id: &str, error: &PullError) {
        self.counters.submissions_failed.fetch_add(1, Ordering::SeqCst);
        self.failure(format!("Error downloading submission {instance_id}"), error);
    }

    pub fn track_submission_attachment_downloaded(
        &self,
        instance_id: &str,
        number: usize,
        total: usize,
    ) {
        self.counters
            .attachments_downloaded
            .fetch_add(1, Ordering::SeqCst);
        self.progress(format!(
            "Attachment {number} of {total} of submission {instance_id} downloaded"
        ));
    }

    pub fn track_submission_attachment_error(
        &self,
        instance_id: &str,
        filename: &str,
        error: &PullError,
    ) {
        self.counters.attachments_failed.fetch_add(1, Ordering::SeqCst);
        self.failure(
            format!("Error downloading attachment {filename} of submission {instance_id}"),
            error,
        );
    }

    /// Recording a downloaded submission in the index failed.
    pub fn track_index_error(&self, instance_id: &str, error: &PullError) {
        self.counters.submissions_failed.fetch_add(1, Ordering::SeqCst);
        self.failure(format!("Error recording submission {instance_id}"), error);
    }

    /// The pull could not continue.
    pub fn track_failure(&self, error: &PullError) {
        self.failure("Pull failed".to_string(), error);
    }

    pub fn track_end(&self) {
        let summary = self.summary();
        let message = if summary.cancelled {
            "Partial pull: cancelled".to_string()
        } else if summary.has_errors() {
            format!("Pull complete with {} errors", summary.errors)
        } else {
            "Pull complete".to_string()
        };
        self.emit(ProgressKind::Completed, message, None);
    }
}
