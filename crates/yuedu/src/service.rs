//! Submission and query façade for the transport layer.

use crate::broadcast::ProgressBus;
use crate::error::JobError;
use crate::jobs::{Job, JobFilter, JobId, JobPage, JobStatus, JobStore, SourceKind};
use crate::stream::{ProgressStream, StreamHandler};
use crate::worker::PoolHandle;

#[derive(Clone)]
pub struct TranslationService {
    store: JobStore,
    bus: ProgressBus,
    streams: StreamHandler,
    pool: Option<PoolHandle>,
}

impl TranslationService {
    pub fn new(store: JobStore, bus: ProgressBus) -> Self {
        Self {
            streams: StreamHandler::new(store.clone(), bus.clone()),
            store,
            bus,
            pool: None,
        }
    }

    /// Submitted jobs are handed to `pool` right away instead of waiting
    /// for its next poll.
    pub fn with_pool(mut self, pool: PoolHandle) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn submit(&self, text: &str, source_kind: SourceKind) -> Result<JobId, JobError> {
        let id = self.store.create_job(text, source_kind)?;
        if let Some(pool) = &self.pool {
            // The job is persisted either way; the poller picks it up later.
            if let Err(e) = pool.notify(&id) {
                log::warn!("Could not dispatch translation {}: {}", id, e);
            }
        }
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Job, JobError> {
        self.store.get_job(id)
    }

    pub fn status(&self, id: &str) -> Result<JobStatus, JobError> {
        self.store.job_status(id)
    }

    pub fn list(&self, filter: &JobFilter) -> Result<JobPage, JobError> {
        self.store.list_jobs_filtered(filter)
    }

    /// Deletes the job and disconnects its live subscribers.
    pub fn delete(&self, id: &str) -> Result<bool, JobError> {
        let removed = self.store.delete_job(id)?;
        if removed {
            self.bus.close(id);
        }
        Ok(removed)
    }

    pub fn stream(&self, id: &str) -> ProgressStream {
        self.streams.open(id)
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }
}
