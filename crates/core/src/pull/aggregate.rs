//! Pull of one form from an Aggregate server.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::attachment::{self, Attachment};
use crate::config::PullConfig;
use crate::cursor::Cursor;
use crate::form::{FormKey, SubmissionKeyGenerator};
use crate::http::{Http, Request, Response};
use crate::index::InstanceIndex;
use crate::instance_ids::{InstanceIdBatch, InstanceIdBatchGetter};
use crate::job::{Job, RunnerStatus};
use crate::server::AggregateServer;
use crate::storage::{self, FormLayout};

use super::submission::{parse_submission, DownloadedSubmission};
use super::tracker::{EventSink, PullSummary, PullTracker};
use super::PullError;

/// Tuning of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOptions {
    pub page_size: u32,
    pub include_incomplete: bool,
    /// Concurrent downloads of submissions and attachments.
    pub max_parallel_downloads: usize,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            include_incomplete: false,
            max_parallel_downloads: 8,
        }
    }
}

impl From<&PullConfig> for PullOptions {
    fn from(config: &PullConfig) -> Self {
        Self {
            page_size: config.page_size,
            include_incomplete: config.include_incomplete,
            max_parallel_downloads: config.max_parallel_downloads,
        }
    }
}

/// Terminal output of one pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    pub form: FormKey,
    /// Most advanced of the start cursor and every id page retrieved; the
    /// next pull resumes from here.
    pub last_cursor: Cursor,
    pub summary: PullSummary,
}

/// How one submission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmissionOutcome {
    Recorded,
    Failed,
    /// Cancelled before it, or some of its attachments, started.
    NotStarted,
}

/// Pulls forms and their submissions into local storage.
#[derive(Clone)]
pub struct PullFromAggregate {
    http: Arc<dyn Http>,
    server: AggregateServer,
    index: Arc<dyn InstanceIndex>,
    storage_root: PathBuf,
    options: PullOptions,
    sink: EventSink,
}

impl std::fmt::Debug for PullFromAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullFromAggregate")
            .field("server", &self.server)
            .field("storage_root", &self.storage_root)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PullFromAggregate {
    pub fn new(
        http: Arc<dyn Http>,
        server: AggregateServer,
        index: Arc<dyn InstanceIndex>,
        storage_root: impl Into<PathBuf>,
        options: PullOptions,
        sink: EventSink,
    ) -> Self {
        Self {
            http,
            server,
            index,
            storage_root: storage_root.into(),
            options,
            sink,
        }
    }

    /// Local layout of `form` under this puller's storage root.
    pub fn layout(&self, form: &FormKey) -> FormLayout {
        FormLayout::new(&self.storage_root, form)
    }

    /// Build the job graph pulling `form`, resuming after `start`.
    ///
    /// Form definition, id pages and form attachment list are fetched in
    /// parallel; then form attachments and unseen submissions are
    /// downloaded. The job fails only if the form definition or the id
    /// pages could not be fetched.
    pub fn pull(&self, form: FormKey, start: Cursor) -> Job<PullResult> {
        let ctx = Arc::new(PullContext {
            http: Arc::clone(&self.http),
            server: self.server.clone(),
            index: Arc::clone(&self.index),
            layout: self.layout(&form),
            options: self.options.clone(),
            tracker: PullTracker::new(form.clone(), self.sink.clone()),
            downloads: Semaphore::new(self.options.max_parallel_downloads.max(1)),
            start: start.clone(),
            form,
        });

        let form_job = {
            let ctx = Arc::clone(&ctx);
            let on_cancel = Arc::clone(&ctx);
            Job::supply(move |status| async move { Ok(ctx.download_form(&status).await) }).on_cancel(move || {
                on_cancel.tracker.track_cancellation("downloading the form definition");
                None
            })
        };
        let batches_job = {
            let ctx = Arc::clone(&ctx);
            let on_cancel = Arc::clone(&ctx);
            Job::supply(move |status| async move {
                ctx.get_instance_id_batches(start, &status)
                    .await
                    .map_err(|e| {
                        ctx.tracker.track_pagination_error(&e);
                        anyhow::Error::from(e)
                    })
            })
            .on_cancel(move || {
                on_cancel.tracker.track_cancellation("getting submission ids");
                Vec::new()
            })
        };
        let attachments_job = {
            let ctx = Arc::clone(&ctx);
            let on_cancel = Arc::clone(&ctx);
            Job::supply(move |status| async move { Ok(ctx.get_form_attachments(&status).await) })
                .on_cancel(
                move || {
                    on_cancel.tracker.track_cancellation("getting form attachments");
                    Vec::new()
                },
            )
        };

        Job::all_of3(form_job, batches_job, attachments_job).then_apply(
            move |status, (form_xml, batches, attachments)| async move {
                ctx.finish(&status, form_xml, batches, attachments)
                    .await
                    .map_err(anyhow::Error::from)
            },
        )
    }
}

/// Everything one pull needs, shared by its jobs.
struct PullContext {
    http: Arc<dyn Http>,
    server: AggregateServer,
    index: Arc<dyn InstanceIndex>,
    layout: FormLayout,
    options: PullOptions,
    tracker: PullTracker,
    downloads: Semaphore,
    /// Cursor the pull resumed from; the result never goes behind it.
    start: Cursor,
    form: FormKey,
}

impl PullContext {
    /// Execute `request` on a download slot, failing on any non-success status.
    ///
    /// The request is not sent if the runner was cancelled while waiting for
    /// the slot.
    async fn fetch(&self, status: &RunnerStatus, request: Request) -> Result<Response, PullError> {
        let _slot = self.downloads.acquire().await.ok();
        if status.is_cancelled() {
            return Err(PullError::Cancelled);
        }
        Ok(self.http.execute(request).await?.error_for_status()?)
    }

    async fn download_form(&self, status: &RunnerStatus) -> Option<String> {
        match self.try_download_form(status).await {
            Ok(form_xml) => {
                self.tracker.track_form_downloaded();
                Some(form_xml)
            }
            Err(PullError::Cancelled) => {
                self.tracker
                    .track_cancellation("downloading the form definition");
                None
            }
            Err(e) => {
                warn!(form_id = %self.form.id, error = %e, "Form definition download failed");
                self.tracker.track_form_error(&e);
                None
            }
        }
    }

    async fn try_download_form(&self, status: &RunnerStatus) -> Result<String, PullError> {
        let response = self
            .fetch(status, self.server.form_xml(&self.form.id))
            .await?;
        let form_xml = response.text();
        storage::write_file(&self.layout.form_file(), form_xml.as_bytes()).await?;
        Ok(form_xml)
    }

    /// Manifest entries whose local copy is missing or stale.
    async fn get_form_attachments(&self, status: &RunnerStatus) -> Vec<Attachment> {
        let listed = match self.fetch_manifest(status).await {
            Ok(listed) => listed,
            Err(PullError::Cancelled) => {
                self.tracker.track_cancellation("getting form attachments");
                return Vec::new();
            }
            Err(e) => {
                warn!(form_id = %self.form.id, error = %e, "Manifest download failed");
                self.tracker.track_manifest_error(&e);
                return Vec::new();
            }
        };

        let media_dir = self.layout.media_dir();
        let total = listed.len();
        let mut stale = Vec::with_capacity(total);
        for attachment in listed {
            if attachment.needs_update(&media_dir).await {
                stale.push(attachment);
            }
        }
        self.tracker.track_form_attachments(stale.len(), total - stale.len());
        stale
    }

    async fn fetch_manifest(&self, status: &RunnerStatus) -> Result<Vec<Attachment>, PullError> {
        let response = self
            .fetch(status, self.server.manifest(&self.form.id))
            .await?;
        Ok(attachment::parse_manifest(&response.text())?)
    }

    async fn get_instance_id_batches(
        &self,
        start: Cursor,
        status: &RunnerStatus,
    ) -> Result<Vec<InstanceIdBatch>, PullError> {
        let mut getter = InstanceIdBatchGetter::start(
            Arc::clone(&self.http),
            self.server.clone(),
            self.form.id.clone(),
            start,
            self.options.page_size,
            self.options.include_incomplete,
        )
        .await?;

        let mut batches = Vec::new();
        while getter.has_next() {
            if status.is_cancelled() {
                self.tracker.track_cancellation("getting submission ids");
                break;
            }
            if let Some(batch) = getter.next().await? {
                batches.push(batch);
            }
        }
        debug!(
            form_id = %self.form.id,
            batches = batches.len(),
            ids = batches.iter().map(InstanceIdBatch::len).sum::<usize>(),
            "Instance id pages retrieved"
        );
        Ok(batches)
    }

    /// Join stage: download form attachments and submissions, then pick the
    /// resumption cursor.
    async fn finish(
        &self,
        status: &RunnerStatus,
        form_xml: Option<String>,
        batches: Vec<InstanceIdBatch>,
        form_attachments: Vec<Attachment>,
    ) -> Result<PullResult, PullError> {
        let last_cursor = Cursor::max(
            std::iter::once(self.start.clone()).chain(batches.iter().map(|b| b.cursor().clone())),
        );

        self.download_form_attachments(status, form_attachments).await;

        if status.is_cancelled() {
            if !self.tracker.summary().cancelled {
                self.tracker.track_cancellation("downloading submissions");
            }
            self.tracker.track_end();
            return Ok(self.result(last_cursor));
        }

        // The download failure itself was already tracked.
        let Some(form_xml) = form_xml else {
            return Err(PullError::FormUnavailable {
                form_id: self.form.id.clone(),
            });
        };
        let keys = match SubmissionKeyGenerator::from_form_xml(&form_xml) {
            Ok(keys) => keys,
            Err(e) => {
                let error = PullError::from(e);
                self.tracker.track_failure(&error);
                return Err(error);
            }
        };

        self.download_submissions(status, &keys, batches).await;
        self.tracker.track_end();

        let result = self.result(last_cursor);
        info!(
            form_id = %self.form.id,
            cursor = %result.last_cursor,
            downloaded = result.summary.submissions_downloaded,
            skipped = result.summary.submissions_skipped,
            errors = result.summary.errors,
            cancelled = result.summary.cancelled,
            "Pull finished"
        );
        Ok(result)
    }

    fn result(&self, last_cursor: Cursor) -> PullResult {
        PullResult {
            form: self.form.clone(),
            last_cursor,
            summary: self.tracker.summary(),
        }
    }

    async fn download_form_attachments(&self, status: &RunnerStatus, attachments: Vec<Attachment>) {
        if attachments.is_empty() {
            return;
        }
        let media_dir = self.layout.media_dir();
        let started: Vec<bool> = stream::iter(attachments)
            .map(|attachment| {
                let media_dir = media_dir.as_path();
                async move {
                    if status.is_cancelled() {
                        return false;
                    }
                    match self.download_attachment(status, &attachment, media_dir).await {
                        Ok(()) => self.tracker.track_form_attachment_downloaded(),
                        Err(PullError::Cancelled) => return false,
                        Err(e) => {
                            warn!(filename = %attachment.filename, error = %e, "Form attachment download failed");
                            self.tracker.track_form_attachment_error(&attachment.filename, &e);
                        }
                    }
                    true
                }
            })
            .buffer_unordered(self.options.max_parallel_downloads.max(1))
            .collect()
            .await;

        if started.iter().any(|s| !s) {
            self.tracker.track_cancellation("downloading form attachments");
        }
    }

    async fn download_attachment(
        &self,
        status: &RunnerStatus,
        attachment: &Attachment,
        dir: &Path,
    ) -> Result<(), PullError> {
        let path = attachment.local_path(dir)?;
        let response = self
            .fetch(status, self.server.download(&attachment.download_url))
            .await?;
        storage::write_file(&path, response.body()).await?;
        Ok(())
    }

    async fn download_submissions(
        &self,
        status: &RunnerStatus,
        keys: &SubmissionKeyGenerator,
        batches: Vec<InstanceIdBatch>,
    ) {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        let mut already_pulled = 0;
        for id in batches.into_iter().flat_map(|b| b.into_parts().0) {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.index.has(&id) {
                Ok(true) => already_pulled += 1,
                Ok(false) => pending.push(id),
                Err(e) => {
                    let error = PullError::from(e);
                    self.tracker.track_submission_error(&id, &error);
                }
            }
        }
        self.tracker.track_submissions(pending.len(), already_pulled);

        let outcomes: Vec<SubmissionOutcome> = stream::iter(pending)
            .map(|id| async move { self.pull_submission(status, keys, id).await })
            .buffer_unordered(self.options.max_parallel_downloads.max(1))
            .collect()
            .await;

        if outcomes.contains(&SubmissionOutcome::NotStarted) {
            self.tracker.track_cancellation("downloading submissions");
        }
        let failed = outcomes
            .iter()
            .filter(|o| **o == SubmissionOutcome::Failed)
            .count();
        debug!(form_id = %self.form.id, total = outcomes.len(), failed, "Submissions processed");
    }

    async fn pull_submission(
        &self,
        status: &RunnerStatus,
        keys: &SubmissionKeyGenerator,
        instance_id: String,
    ) -> SubmissionOutcome {
        if status.is_cancelled() {
            return SubmissionOutcome::NotStarted;
        }

        let submission = match self.download_submission(status, keys, &instance_id).await {
            Ok(submission) => submission,
            Err(PullError::Cancelled) => return SubmissionOutcome::NotStarted,
            Err(e) => {
                warn!(instance_id = %instance_id, error = %e, "Submission download failed");
                self.tracker.track_submission_error(&instance_id, &e);
                return SubmissionOutcome::Failed;
            }
        };
        self.tracker.track_submission_downloaded();

        if !self.download_submission_attachments(status, &submission).await {
            return SubmissionOutcome::NotStarted;
        }

        let instance_dir = self.layout.instance_dir(&instance_id);
        match self.index.put(&instance_id, &instance_dir) {
            Ok(()) => SubmissionOutcome::Recorded,
            Err(e) => {
                let error = PullError::from(e);
                self.tracker.track_index_error(&instance_id, &error);
                SubmissionOutcome::Failed
            }
        }
    }

    async fn download_submission(
        &self,
        status: &RunnerStatus,
        keys: &SubmissionKeyGenerator,
        instance_id: &str,
    ) -> Result<DownloadedSubmission, PullError> {
        let key = keys.build_key(instance_id);
        let response = self.fetch(status, self.server.submission(&key)).await?;
        let submission = parse_submission(&response.text(), instance_id)?;
        storage::write_file(
            &self.layout.submission_file(instance_id),
            submission.xml.as_bytes(),
        )
        .await?;
        Ok(submission)
    }

    /// Download every attachment of a submission; submissions never change
    /// once created, so nothing is hash-checked. Returns false if
    /// cancellation kept some attachment from starting.
    async fn download_submission_attachments(
        &self,
        status: &RunnerStatus,
        submission: &DownloadedSubmission,
    ) -> bool {
        let total = submission.attachments.len();
        if total == 0 {
            return true;
        }
        let instance_dir = self.layout.instance_dir(&submission.instance_id);
        let started: Vec<bool> = stream::iter(submission.attachments.clone().into_iter().enumerate())
            .map(|(i, attachment)| {
                let instance_dir = instance_dir.as_path();
                async move {
                    if status.is_cancelled() {
                        return false;
                    }
                    match self.download_attachment(status, &attachment, instance_dir).await {
                        Ok(()) => self.tracker.track_submission_attachment_downloaded(
                            &submission.instance_id,
                            i + 1,
                            total,
                        ),
                        Err(PullError::Cancelled) => return false,
                        Err(e) => {
                            warn!(
                                instance_id = %submission.instance_id,
                                filename = %attachment.filename,
                                error = %e,
                                "Submission attachment download failed"
                            );
                            self.tracker.track_submission_attachment_error(
                                &submission.instance_id,
                                &attachment.filename,
                                &e,
                            );
                        }
                    }
                    true
                }
            })
            .buffer_unordered(self.options.max_parallel_downloads.max(1))
            .collect()
            .await;
        started.iter().all(|s| *s)
    }
}
