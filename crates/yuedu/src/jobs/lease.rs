//! Lease manager: exclusive, expiring ownership of a job by one worker.
//!
//! State machine: `pending → processing → {completed | failed}`. A
//! `processing` lease whose expiry passed may be taken over; every take-over
//! counts as a new attempt.

use std::time::Duration;

use chrono::Utc;

use crate::db::{format_timestamp, lease_repo, now_timestamp, translation_repo, Database};
use crate::error::JobError;
use crate::jobs::model::{JobId, JobState, Lease};

/// Terminal error recorded when a job runs out of attempts.
pub const ATTEMPT_LIMIT_MESSAGE: &str = "attempt limit reached";

#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired(Lease),
    /// Owned by another live lease, or no longer claimable.
    AlreadyLeased,
    /// Claimable but out of attempts; the job was marked failed.
    Exhausted,
}

#[derive(Clone)]
pub struct LeaseManager {
    db: Database,
    max_attempts: u32,
}

fn expiry(ttl: Duration) -> (String, String) {
    let now = Utc::now();
    let until = now + chrono::Duration::milliseconds(ttl.as_millis().min(i64::MAX as u128) as i64);
    (format_timestamp(now), format_timestamp(until))
}

impl LeaseManager {
    pub fn new(db: Database, max_attempts: u32) -> Self {
        Self { db, max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Claims the job for `token` for `ttl`.
    pub fn acquire(&self, id: &str, token: &str, ttl: Duration) -> Result<AcquireOutcome, JobError> {
        let (now, until) = expiry(ttl);
        let max_attempts = self.max_attempts;

        let outcome = self.db.with_tx(|tx| -> Result<AcquireOutcome, JobError> {
            let status = translation_repo::status_of(tx, id)?
                .ok_or_else(|| JobError::NotFound(id.to_string()))?;
            let state = JobState::parse(&status, id);
            if state.is_terminal() {
                if lease_repo::settle(tx, id, state.as_str(), &now)? > 0 {
                    log::warn!("Lease row of finished translation {} was still open", id);
                }
                return Ok(AcquireOutcome::AlreadyLeased);
            }

            if lease_repo::try_claim(tx, id, token, &until, &now, max_attempts)? == 1 {
                // Rolls the claim back if the translation refuses the transition.
                if translation_repo::mark_processing(tx, id, &now)? == 0 {
                    return Err(JobError::Conflict {
                        id: id.to_string(),
                        from: status,
                        to: "processing",
                    });
                }
                let row = lease_repo::find(tx, id)?
                    .ok_or_else(|| JobError::NotFound(id.to_string()))?;
                return Ok(AcquireOutcome::Acquired(Lease::from(row)));
            }

            if lease_repo::exhaust(tx, id, ATTEMPT_LIMIT_MESSAGE, &now, max_attempts)? == 1 {
                translation_repo::mark_failed(tx, id, ATTEMPT_LIMIT_MESSAGE, &now)?;
                return Ok(AcquireOutcome::Exhausted);
            }

            Ok(AcquireOutcome::AlreadyLeased)
        })?;

        match &outcome {
            AcquireOutcome::Acquired(lease) => {
                log::debug!("Lease on {} acquired (attempt {})", id, lease.attempts)
            }
            AcquireOutcome::Exhausted => {
                log::warn!("Translation {} exhausted its {} attempts", id, max_attempts)
            }
            AcquireOutcome::AlreadyLeased => {}
        }
        Ok(outcome)
    }

    /// Extends the lease and stamps the heartbeat.
    pub fn renew(&self, id: &str, token: &str, ttl: Duration) -> Result<(), JobError> {
        let (now, until) = expiry(ttl);
        self.db.with_tx(|tx| -> Result<(), JobError> {
            if lease_repo::renew(tx, id, token, &until, &now)? == 1 {
                return Ok(());
            }
            match lease_repo::find(tx, id)? {
                Some(_) => Err(JobError::LeaseLost(id.to_string())),
                None => Err(JobError::NotFound(id.to_string())),
            }
        })
    }

    /// Gives up ownership, moving the lease to `state`.
    pub fn release(
        &self,
        id: &str,
        token: &str,
        state: JobState,
        last_error: Option<&str>,
    ) -> Result<(), JobError> {
        if state == JobState::Processing {
            return Err(JobError::Conflict {
                id: id.to_string(),
                from: JobState::Processing.to_string(),
                to: "processing",
            });
        }
        let now = now_timestamp();
        let last_error = last_error.map(crate::sanitize::truncate_message);
        self.db.with_tx(|tx| -> Result<(), JobError> {
            if lease_repo::release(tx, id, token, state.as_str(), last_error.as_deref(), &now)? == 1 {
                return Ok(());
            }
            match lease_repo::find(tx, id)? {
                Some(_) => Err(JobError::LeaseLost(id.to_string())),
                None => Err(JobError::NotFound(id.to_string())),
            }
        })
    }

    /// Pending or stale jobs, oldest first.
    pub fn claimable(&self, limit: u32) -> Result<Vec<JobId>, JobError> {
        let now = now_timestamp();
        Ok(self
            .db
            .with_conn(|conn| lease_repo::list_claimable(conn, &now, limit))?)
    }

    pub fn get(&self, id: &str) -> Result<Lease, JobError> {
        self.db
            .with_conn(|conn| lease_repo::find(conn, id))?
            .map(Lease::from)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }
}
