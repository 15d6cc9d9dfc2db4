//! Runs a single translation attempt under a lease.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn};

use crate::broadcast::ProgressEvent;
use crate::error::JobError;
use crate::jobs::lease::ATTEMPT_LIMIT_MESSAGE;
use crate::jobs::model::{joined_glosses, reconstruct, Lease, ParagraphOutline, Segment};
use crate::jobs::{AcquireOutcome, JobStore, LeaseManager};
use crate::provider::{ProviderItem, Translator};
use crate::sanitize;

use super::progress::ProgressReporter;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub lease_ttl: Duration,
    pub renew_interval: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            renew_interval: Duration::from_secs(10),
        }
    }
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Transient failure; the job is `pending` again.
    Requeued,
    Failed,
    /// Another worker owns the job, or it is already finished.
    Skipped,
    /// The job was deleted or the lease was lost mid-attempt.
    Aborted,
}

/// Tracks (paragraph, segment) order of the provider stream.
#[derive(Default)]
struct StreamCursor {
    outline: Option<Vec<ParagraphOutline>>,
    last: Option<(usize, usize)>,
    segments: usize,
}

impl StreamCursor {
    /// Accepts the next segment key or explains why it is out of order.
    fn advance(&mut self, key: (usize, usize)) -> Result<bool, JobError> {
        let in_order = match self.last {
            None => key.1 == 0,
            Some((p, s)) => (key.0 == p && key.1 == s + 1) || (key.0 > p && key.1 == 0),
        };
        if !in_order {
            return Err(JobError::UpstreamTransient(format!(
                "malformed provider output: segment {}:{} after {:?}",
                key.0, key.1, self.last
            )));
        }
        let new_paragraph = self.last.map(|(p, _)| p != key.0).unwrap_or(true);
        self.last = Some(key);
        self.segments += 1;
        Ok(new_paragraph)
    }
}

pub struct JobRunner {
    store: JobStore,
    leases: LeaseManager,
    translator: Arc<dyn Translator>,
    progress: Arc<dyn ProgressReporter>,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        store: JobStore,
        leases: LeaseManager,
        translator: Arc<dyn Translator>,
        progress: Arc<dyn ProgressReporter>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            leases,
            translator,
            progress,
            settings,
        }
    }

    /// Acquires the job's lease for `token` and runs one attempt.
    pub fn run(&self, job_id: &str, token: &str) -> RunOutcome {
        let span = info_span!(
            "translate_job",
            job_id = %job_id,
            attempt = tracing::field::Empty
        )
        .entered();

        let lease = match self.leases.acquire(job_id, token, self.settings.lease_ttl) {
            Ok(AcquireOutcome::Acquired(lease)) => lease,
            Ok(AcquireOutcome::AlreadyLeased) => {
                debug!("Translation already leased or finished");
                return RunOutcome::Skipped;
            }
            Ok(AcquireOutcome::Exhausted) => {
                self.progress
                    .report(job_id, ProgressEvent::error(ATTEMPT_LIMIT_MESSAGE));
                return RunOutcome::Failed;
            }
            Err(JobError::NotFound(_)) => return RunOutcome::Skipped,
            Err(e) => {
                warn!(error = %e, "Failed to acquire lease");
                return RunOutcome::Skipped;
            }
        };
        span.record("attempt", lease.attempts);

        match self.attempt(job_id, token) {
            Ok(()) => {
                info!("Translation completed");
                RunOutcome::Completed
            }
            Err(e) => self.settle(job_id, token, &lease, e),
        }
    }

    fn attempt(&self, job_id: &str, token: &str) -> Result<(), JobError> {
        let job = self.store.get_job(job_id)?;
        debug!(
            chars = job.input_text.chars().count(),
            text_hash = %sanitize::hash_text(&job.input_text),
            "Starting provider stream"
        );

        let stream = self.translator.translate(&job.input_text)?;
        let mut cursor = StreamCursor::default();
        let mut full_translation: Option<String> = None;
        let mut last_renewal = Instant::now();

        for item in stream {
            // The job may have been deleted while the provider was working.
            if !self.store.exists(job_id)? {
                return Err(JobError::NotFound(job_id.to_string()));
            }
            if last_renewal.elapsed() >= self.settings.renew_interval {
                self.leases.renew(job_id, token, self.settings.lease_ttl)?;
                last_renewal = Instant::now();
            }

            match item? {
                ProviderItem::Outline(outline) => {
                    if cursor.segments > 0 {
                        return Err(JobError::UpstreamTransient(
                            "malformed provider output: outline after segments".to_string(),
                        ));
                    }
                    let total = self.store.begin_output(job_id, token, &outline)?;
                    self.progress
                        .report(job_id, ProgressEvent::start(job_id, total, &outline));
                    cursor.outline = Some(outline);
                }
                ProviderItem::Segment(segment) => {
                    self.append(job_id, token, &mut cursor, &segment)?;
                }
                ProviderItem::FullTranslation(text) => full_translation = Some(text),
            }
        }

        let paragraphs = self.store.paragraphs(job_id)?;
        if cursor.segments == 0 {
            return Err(JobError::UpstreamStructural(
                "provider returned no segments".to_string(),
            ));
        }
        if reconstruct(&paragraphs) != job.input_text {
            return Err(JobError::UpstreamStructural(
                "segments do not reconstruct the input text".to_string(),
            ));
        }

        let full = full_translation
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| joined_glosses(&paragraphs));
        self.store.complete_job(job_id, token, &full)?;
        self.progress
            .report(job_id, ProgressEvent::complete(&paragraphs, &full));
        Ok(())
    }

    fn append(
        &self,
        job_id: &str,
        token: &str,
        cursor: &mut StreamCursor,
        segment: &Segment,
    ) -> Result<(), JobError> {
        let new_paragraph = cursor.advance((segment.paragraph_index, segment.segment_index))?;
        if new_paragraph {
            let shape = cursor
                .outline
                .as_ref()
                .and_then(|o| o.get(segment.paragraph_index));
            self.store.append_paragraph(
                job_id,
                token,
                segment.paragraph_index,
                shape.map(|p| p.indent.as_str()).unwrap_or(""),
                shape.map(|p| p.separator.as_str()).unwrap_or(""),
            )?;
        }
        let outcome = self.store.append_segment(job_id, token, segment)?;
        self.progress.report(
            job_id,
            ProgressEvent::progress(outcome.progress, outcome.total, segment),
        );
        Ok(())
    }

    /// Decides between abort, retry and terminal failure.
    fn settle(&self, job_id: &str, token: &str, lease: &Lease, err: JobError) -> RunOutcome {
        match err {
            JobError::NotFound(_) => {
                info!("Translation deleted during processing, abandoning attempt");
                RunOutcome::Aborted
            }
            JobError::LeaseLost(_) => {
                warn!("Lease lost during processing, abandoning attempt");
                RunOutcome::Aborted
            }
            e if e.is_retryable() && lease.attempts < self.leases.max_attempts() => {
                let message = sanitize::truncate_message(&e.to_string());
                warn!(error = %message, "Transient failure, requeueing");
                match self.store.requeue_job(job_id, token, &message) {
                    Ok(()) => RunOutcome::Requeued,
                    Err(JobError::NotFound(_) | JobError::LeaseLost(_)) => RunOutcome::Aborted,
                    Err(e) => {
                        warn!(error = %e, "Failed to requeue translation");
                        RunOutcome::Requeued
                    }
                }
            }
            e => {
                let message = sanitize::truncate_message(&e.to_string());
                warn!(error = %message, "Translation failed");
                match self.store.fail_job(job_id, token, &message) {
                    Ok(()) => {
                        self.progress.report(job_id, ProgressEvent::error(&*message));
                        RunOutcome::Failed
                    }
                    Err(JobError::NotFound(_) | JobError::LeaseLost(_)) => RunOutcome::Aborted,
                    Err(e) => {
                        warn!(error = %e, "Failed to mark translation failed");
                        RunOutcome::Failed
                    }
                }
            }
        }
    }
}
