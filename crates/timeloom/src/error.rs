//! Error surface for the scheduler's public API and internals.

use thiserror::Error;

/// Errors surfaced by [`crate::Scheduler`] and its collaborators.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `schedule()` was called with a job missing a required field.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// `unschedule()` was called without an `id` or `type` selector.
    #[error("invalid arguments: unschedule requires an id, a type, or both")]
    InvalidArguments,

    /// `getJob` or a targeted scan found no matching record.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Insert collided with an existing `(job.type, job.id)` or `id`.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The job's `schedule` string could not be parsed.
    #[error("invalid schedule {schedule:?}: {reason}")]
    InvalidSchedule { schedule: String, reason: String },

    /// The persistence layer returned an error outside the CAS protocol.
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),

    /// The registered handler returned an error while executing a claimed job.
    ///
    /// Logged by the Claim Engine; never aborts Step D.
    #[error("handler error: {0}")]
    Handler(#[source] anyhow::Error),
}

/// Whether an error is safe to return to an external caller verbatim.
///
/// Handler and store errors may embed caller-supplied job data or
/// connection internals, so they are redacted; the named public kinds are
/// always safe since they never echo arbitrary payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeErrorCategory {
    Public,
    Internal,
}

/// Extension trait categorizing an error for logging/response purposes.
pub trait Categorizable {
    fn category(&self) -> SafeErrorCategory;
}

impl Categorizable for SchedulerError {
    fn category(&self) -> SafeErrorCategory {
        match self {
            SchedulerError::InvalidJob(_)
            | SchedulerError::InvalidArguments
            | SchedulerError::NotFound(_)
            | SchedulerError::DuplicateKey(_)
            | SchedulerError::InvalidSchedule { .. } => SafeErrorCategory::Public,
            SchedulerError::Store(_) | SchedulerError::Handler(_) => SafeErrorCategory::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
