//! In-memory `JobStore` and fixtures for testing schedulers without a real
//! database. Implements the exact same CAS semantics as `timeloom-postgres`
//! so the same test suite exercises both backends.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use timeloom::{DeleteSelector, JobRecord, JobStore, StoreError, StoreResult, TypeThreshold};

/// Single-process `JobStore` backed by a `Mutex<HashMap>`. Suitable for
/// tests and demos; multiple [`InMemoryJobStore`] instances sharing state
/// (for multi-node scenarios) should wrap the same `Arc<InMemoryJobStore>`.
#[derive(Default)]
pub struct InMemoryJobStore {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record currently stored, for assertions in tests.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, record: JobRecord) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.id)
            || records
                .values()
                .any(|r| r.job.job_type == record.job.job_type && r.job.id == record.job.id)
        {
            return Err(StoreError::DuplicateKey(record.id));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<JobRecord>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn delete(&self, selector: DeleteSelector) -> StoreResult<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| {
            let id_matches = selector.id.as_deref().map(|id| r.id == id).unwrap_or(true);
            let type_matches = selector
                .job_type
                .as_deref()
                .map(|t| r.job.job_type == t)
                .unwrap_or(true);
            !(id_matches && type_matches)
        });
        Ok((before - records.len()) as u64)
    }

    async fn find_idle_candidate(
        &self,
        registered_types: &[String],
        worker_id: &str,
        now: DateTime<Utc>,
        only_id: Option<&str>,
    ) -> StoreResult<Option<JobRecord>> {
        let records = self.records.lock().unwrap();
        let mut candidates: Vec<&JobRecord> = records
            .values()
            .filter(|r| only_id.map(|id| r.id == id).unwrap_or(true))
            .filter(|r| registered_types.iter().any(|t| t == &r.job.job_type))
            .filter(|r| r.due.map(|due| due <= now).unwrap_or(false))
            .filter(|r| r.permits == timeloom::UNLIMITED || r.permits > 0)
            .filter(|r| !r.workers.iter().any(|w| w == worker_id))
            .collect();
        candidates.sort_by(|a, b| a.job.priority.cmp(&b.job.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(candidates.into_iter().next().cloned())
    }

    async fn find_expired_candidate(
        &self,
        type_thresholds: &[TypeThreshold],
        worker_id: &str,
        now: DateTime<Utc>,
        only_id: Option<&str>,
    ) -> StoreResult<Option<JobRecord>> {
        let records = self.records.lock().unwrap();
        let mut candidates: Vec<&JobRecord> = records
            .values()
            .filter(|r| only_id.map(|id| r.id == id).unwrap_or(true))
            .filter(|r| r.due.map(|due| due <= now).unwrap_or(false))
            .filter(|r| r.permits == 0)
            .filter(|r| !r.workers.iter().any(|w| w == worker_id))
            .filter(|r| {
                type_thresholds
                    .iter()
                    .find(|(t, _)| t == &r.job.job_type)
                    .map(|(_, threshold)| r.workers.iter().any(|w| w.as_str() <= threshold.as_str()))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort_by(|a, b| a.job.priority.cmp(&b.job.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(candidates.into_iter().next().cloned())
    }

    async fn try_claim(
        &self,
        id: &str,
        prev_permits: i64,
        prev_workers: &[String],
        new_permits: i64,
        new_workers: &[String],
    ) -> StoreResult<bool> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(id) else {
            return Ok(false);
        };
        if record.permits != prev_permits || record.workers.as_slice() != prev_workers {
            return Ok(false);
        }
        record.permits = new_permits;
        record.workers = new_workers.iter().cloned().collect();
        record.meta.updated = Utc::now();
        Ok(true)
    }

    async fn try_reschedule(
        &self,
        id: &str,
        job_type: &str,
        new_schedule: Option<&str>,
        new_due: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(id) else {
            return Ok(false);
        };
        if record.job.job_type != job_type {
            return Ok(false);
        }
        if let Some(due) = record.due {
            if due > new_due {
                return Ok(false);
            }
        }
        record.due = Some(new_due);
        if let Some(schedule) = new_schedule {
            record.job.schedule = Some(schedule.to_string());
        }
        record.completed = Some(completed_at);
        record.meta.updated = Utc::now();
        Ok(true)
    }

    async fn remove_exhausted(&self, id: &str, job_type: &str) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap();
        if records.get(id).is_some_and(|r| r.job.job_type == job_type) {
            records.remove(id);
        }
        Ok(())
    }

    async fn release_permit(&self, id: &str, job_type: &str, worker_id: &str) -> StoreResult<()> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(id) else {
            return Ok(());
        };
        if record.job.job_type != job_type {
            return Ok(());
        }
        let before = record.workers.len();
        record.workers.retain(|w| w != worker_id);
        if record.workers.len() < before && record.permits != timeloom::UNLIMITED {
            record.permits += 1;
        }
        record.meta.updated = Utc::now();
        Ok(())
    }
}
