//! Persistence Contract: the abstract interface to the document store that
//! backs the Claim Engine's conditional-update protocol. See §4.6.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

/// `-1` in `job.concurrency`/`permits` means "unlimited".
pub const UNLIMITED: i64 = -1;

/// Inline storage for the common case of a handful of concurrent workers
/// per job; spills to the heap past that.
pub type WorkerIds = SmallVec<[String; 4]>;

/// The fields under `job` in a job record (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFields {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub schedule: Option<String>,
    pub priority: i64,
    pub concurrency: i64,
    pub data: Value,
}

/// Audit timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Meta {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// One document in the job collection (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    /// Stable hash of `job.id`; primary key.
    pub id: String,
    pub job: JobFields,
    pub due: Option<DateTime<Utc>>,
    pub permits: i64,
    pub workers: WorkerIds,
    pub completed: Option<DateTime<Utc>>,
    pub meta: Meta,
}

/// A selector for `unschedule` / bulk deletes: at least one of `id`,
/// `job_type` must be set.
#[derive(Debug, Clone, Default)]
pub struct DeleteSelector {
    pub id: Option<String>,
    pub job_type: Option<String>,
}

/// `(job_type, encode_expired_threshold(now - lock_duration))` used to build
/// the OR'd expired-candidate clause in Step A.2.
pub type TypeThreshold = (String, String);

/// Errors from the store that are not part of the CAS protocol (i.e. not a
/// "someone else won the race" outcome, which is represented as `Ok(false)`
/// or `Ok(None)` instead).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Abstract interface to the document store (§4.6).
///
/// Implementations must provide the full-value conditional updates the
/// Claim Engine depends on: `try_claim`, `try_reschedule`, and
/// `release_permit` all compare-and-swap against an exact prior value of
/// `permits`/`workers`/`due`, returning `Ok(false)` (not an error) when the
/// predicate does not match because another node won the race.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomic insert with duplicate detection on `id` or `(job.type, job.id)`.
    async fn insert(&self, record: JobRecord) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<JobRecord>>;

    /// Delete matching records; returns the number removed. At least one of
    /// `selector.id`/`selector.job_type` must be set (enforced by the
    /// caller, not the store).
    async fn delete(&self, selector: DeleteSelector) -> StoreResult<u64>;

    /// Step A.1: any due, registered-type job with a free permit that `W`
    /// does not already hold. Sorted by `(job.priority, id)` ascending.
    async fn find_idle_candidate(
        &self,
        registered_types: &[String],
        worker_id: &str,
        now: DateTime<Utc>,
        only_id: Option<&str>,
    ) -> StoreResult<Option<JobRecord>>;

    /// Step A.2: any due, fully-permitted job of a registered type holding
    /// at least one expired lease, per the type's lock duration. Sorted by
    /// `(job.priority, id)` ascending.
    async fn find_expired_candidate(
        &self,
        type_thresholds: &[TypeThreshold],
        worker_id: &str,
        now: DateTime<Utc>,
        only_id: Option<&str>,
    ) -> StoreResult<Option<JobRecord>>;

    /// Step B: claim `id`, replacing `workers`/`permits` if their current
    /// value still matches `prev_workers`/`prev_permits`. `Ok(false)` means
    /// another node won the race.
    async fn try_claim(
        &self,
        id: &str,
        prev_permits: i64,
        prev_workers: &[String],
        new_permits: i64,
        new_workers: &[String],
    ) -> StoreResult<bool>;

    /// Step D: reschedule or leave alone, guarded by `due <= new_due` so a
    /// stale worker cannot clobber a fresher reschedule.
    async fn try_reschedule(
        &self,
        id: &str,
        job_type: &str,
        new_schedule: Option<&str>,
        new_due: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Step D when the schedule is exhausted: remove the record outright.
    async fn remove_exhausted(&self, id: &str, job_type: &str) -> StoreResult<()>;

    /// Step E: drop `worker_id` from `workers` and restore one permit
    /// (unless unlimited). A no-op if `worker_id` is no longer present.
    async fn release_permit(&self, id: &str, job_type: &str, worker_id: &str) -> StoreResult<()>;
}

/// Compute the `workers` set after pruning leases at or before
/// `expired_threshold` and appending `worker_id` — the Step B update
/// payload shared by every `JobStore` implementation.
pub fn prune_and_claim(
    workers: &[String],
    expired_threshold: &str,
    worker_id: &str,
) -> WorkerIds {
    let mut next: WorkerIds = workers
        .iter()
        .filter(|w| w.as_str() > expired_threshold)
        .cloned()
        .collect();
    next.push(worker_id.to_string());
    next
}

/// Compute the new `permits` value for a Step B claim: unlimited stays
/// unlimited; otherwise permits gained back from pruned expired workers,
/// minus one charged to the new claim.
pub fn claimed_permits(prev_permits: i64, prev_worker_count: usize, new_worker_count: usize) -> i64 {
    if prev_permits == UNLIMITED {
        return UNLIMITED;
    }
    prev_permits + (prev_worker_count as i64 - new_worker_count as i64)
}
