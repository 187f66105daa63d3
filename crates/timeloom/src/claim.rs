//! Claim Engine: the distributed lease protocol (§4.4). One [`ClaimEngine`]
//! runs repeated worker sessions, each identified by a fresh worker id and
//! a captured instant, against the shared [`JobStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::registry::{ClaimedJob, TypeRegistry};
use crate::schedule;
use crate::store::{claimed_permits, prune_and_claim, DeleteSelector, JobRecord, JobStore, StoreError};
use crate::worker_id::{create_worker_id, encode_expired_threshold};

pub struct ClaimEngine<S: JobStore> {
    store: Arc<S>,
    registry: Arc<TypeRegistry>,
}

impl<S: JobStore> ClaimEngine<S> {
    pub fn new(store: Arc<S>, registry: Arc<TypeRegistry>) -> Self {
        Self { store, registry }
    }

    /// Run one worker session: claim, execute, reschedule, release — looped
    /// under a single worker id and captured `now` until Step A finds
    /// nothing claimable.
    ///
    /// `only_id`, when set, requests a targeted scan of a single job and
    /// fails with [`SchedulerError::NotFound`] if that job is not
    /// claimable right now.
    pub async fn run_session(&self, only_id: Option<&str>) -> Result<()> {
        let worker_id = create_worker_id();
        let now = Utc::now();
        let mut claimed_once = false;

        loop {
            let Some(record) = self.select_candidate(&worker_id, now, only_id).await? else {
                if only_id.is_some() && !claimed_once {
                    return Err(SchedulerError::NotFound(only_id.unwrap().to_string()));
                }
                debug!(worker_id, "scan found nothing claimable, session done");
                return Ok(());
            };

            match self.claim(&record, &worker_id, now).await? {
                true => {
                    claimed_once = true;
                    self.run_and_reschedule(record, &worker_id, now).await?;
                }
                false => {
                    debug!(worker_id, job_id = record.id, "lost claim race, retrying scan");
                    continue;
                }
            }
        }
    }

    /// Step A: idle candidate first, falling back to an expired candidate.
    async fn select_candidate(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        only_id: Option<&str>,
    ) -> Result<Option<JobRecord>> {
        let registered_types = self.registry.registered_types();
        if registered_types.is_empty() {
            return Ok(None);
        }

        if let Some(record) = self
            .store
            .find_idle_candidate(&registered_types, worker_id, now, only_id)
            .await
            .map_err(store_err)?
        {
            return Ok(Some(record));
        }

        let type_thresholds: Vec<(String, String)> = self
            .registry
            .lock_durations()
            .into_iter()
            .map(|(job_type, lock_duration)| {
                (job_type, encode_expired_threshold(now - lock_duration))
            })
            .collect();

        self.store
            .find_expired_candidate(&type_thresholds, worker_id, now, only_id)
            .await
            .map_err(store_err)
    }

    /// Step B: conditional claim with stale-lease pruning.
    async fn claim(&self, record: &JobRecord, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let lock_duration = self
            .registry
            .lock_duration(&record.job.job_type)
            .expect("candidate selection only returns registered types");
        let expired_threshold = encode_expired_threshold(now - lock_duration);

        let new_workers = prune_and_claim(&record.workers, &expired_threshold, worker_id);
        let new_permits = claimed_permits(record.permits, record.workers.len(), new_workers.len());

        self.store
            .try_claim(
                &record.id,
                record.permits,
                &record.workers,
                new_permits,
                &new_workers,
            )
            .await
            .map_err(store_err)
    }

    /// Steps C, D, E for an already-claimed record.
    async fn run_and_reschedule(
        &self,
        record: JobRecord,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let job_type = record.job.job_type.clone();
        let job_id = record.id.clone();
        let fired_at = record.due.unwrap_or(now);

        // Step C: invoke the handler. A failure is logged, never aborts
        // Step D — partial-failure semantics favor liveness.
        if let Some(handler) = self.registry.handler(&job_type) {
            let claimed = ClaimedJob {
                id: record.job.id.clone(),
                job_type: job_type.clone(),
                data: record.job.data.clone(),
                worker_id: worker_id.to_string(),
            };
            if let Err(e) = handler.handle(claimed).await {
                let wrapped = SchedulerError::Handler(e);
                error!(worker_id, job_id, job_type, error = %wrapped, "handler failed");
            } else {
                info!(worker_id, job_id, job_type, "handler completed");
            }
        } else {
            warn!(worker_id, job_id, job_type, "no handler registered at claim time");
        }

        // Step D: reschedule or remove.
        let completion = Utc::now();
        let next = schedule::next_on_update(record.job.schedule.as_deref(), fired_at, completion)?;

        match next.due {
            None => {
                self.store
                    .remove_exhausted(&job_id, &job_type)
                    .await
                    .map_err(store_err)?;
                debug!(worker_id, job_id, job_type, "schedule exhausted, removed");
                // Schedule is gone; there is no permit bookkeeping left to do.
                return Ok(());
            }
            Some(due_new) => {
                self.store
                    .try_reschedule(
                        &job_id,
                        &job_type,
                        next.schedule.as_deref(),
                        due_new,
                        completion,
                    )
                    .await
                    .map_err(store_err)?;
            }
        }

        // Step E: release the permit, no-op if the lease was already reclaimed.
        self.store
            .release_permit(&job_id, &job_type, worker_id)
            .await
            .map_err(store_err)?;

        Ok(())
    }
}

fn store_err(e: StoreError) -> SchedulerError {
    match e {
        StoreError::DuplicateKey(k) => SchedulerError::DuplicateKey(k),
        StoreError::Backend(e) => SchedulerError::Store(e),
    }
}

/// Build the `DeleteSelector` for `unschedule`, validating at least one
/// field is present (§6, §7 `InvalidArguments`).
pub fn delete_selector(id: Option<String>, job_type: Option<String>) -> Result<DeleteSelector> {
    if id.is_none() && job_type.is_none() {
        return Err(SchedulerError::InvalidArguments);
    }
    Ok(DeleteSelector { id, job_type })
}
