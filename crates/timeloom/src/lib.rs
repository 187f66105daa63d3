//! # Timeloom
//!
//! A distributed, database-backed job scheduler. Many cooperating node
//! processes share one job collection through a [`JobStore`]; no node holds
//! authority over another, and no node needs a lock beyond the conditional
//! updates the store already guarantees.
//!
//! ## Core Concepts
//!
//! - **Job** — a document: `job.{id,type,schedule,priority,concurrency,data}`
//!   plus scheduler-owned fields `due`, `permits`, `workers`, `completed`.
//! - **Schedule** — an ISO 8601 string: a bare instant, `R[n]/DURATION`
//!   (repeat from "now"), or `R[n]/START/DURATION` (repeat from `START`).
//! - **Claim** — a lease a worker holds on a job while it runs the handler,
//!   recorded as that worker's id in `job.workers` and a decremented permit.
//! - **Scan** — the act of asking the store for the next claimable job.
//!
//! ## Architecture
//!
//! ```text
//! schedule() ──insert──► JobStore (shared collection)
//!                              ▲
//!                              │ conditional updates (CAS)
//!                              │
//! ScanScheduler ──SCAN event──► ClaimEngine
//!   │                             │
//!   │  idle-rearm                 ├─ A: select candidate (idle, then expired)
//!   │  concurrency-many           ├─ B: try_claim (CAS on permits + workers)
//!   │  worker sessions            ├─ C: execute registered JobHandler
//!   │                             ├─ D: try_reschedule / remove_exhausted
//!   └─────────────────────────────┴─ E: release_permit
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Claims are conditional** — Step B only succeeds if the prior
//!    `permits`/`workers` still match what the claiming node last read.
//! 2. **Leases expire lexically** — a worker id's time component is
//!    compared as a string against an encoded threshold, no clock-reads
//!    of other nodes required.
//! 3. **Reschedule is monotonic** — Step D is guarded by `due <= due_new`,
//!    so a stale worker can never move `due` backwards.
//! 4. **Drift does not compound** — a schedule with an explicit `START` is
//!    rewritten to anchor at "now" on each run, so a job dormant for many
//!    periods never replays a backlog.
//! 5. **Handler failure does not block rescheduling** — Step C errors are
//!    logged; Steps D and E always run.
//!
//! ## What This Is Not
//!
//! Timeloom is **not**:
//! - An in-memory scheduler (durability is the store's job)
//! - A DAG/workflow engine (jobs do not depend on each other)
//! - An exactly-once executor (handlers must be idempotent)
//!
//! Timeloom **is**:
//! > A lease protocol over a shared document store, turning any store that
//! > can do a conditional update into a distributed job scheduler.

mod claim;
mod scan;

pub mod config;
pub mod error;
pub mod id;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod worker_id;

// Re-export error types
pub use error::{Categorizable, Result, SafeErrorCategory, SchedulerError};

// Re-export configuration
pub use config::{BootstrapJob, SchedulerConfig, SchedulerConfigBuilder};

// Re-export id generation
pub use id::{hash_job_id, JobIdGenerator, UuidJobIdGenerator};

// Re-export the type registry (policy-light handler registration)
pub use registry::{ClaimedJob, DefineOptions, JobHandler, TypeRegistry};

// Re-export the schedule calculator
pub use schedule::{next_on_insert, next_on_update, NextDue};

// Re-export the persistence contract
pub use store::{
    claimed_permits, prune_and_claim, DeleteSelector, JobFields, JobRecord, JobStore, Meta,
    StoreError, StoreResult, TypeThreshold, WorkerIds, UNLIMITED,
};

// Re-export worker identity helpers
pub use worker_id::{create_worker_id, encode_expired_threshold};

// Re-export the scan scheduler (event-driven SCAN queue)
pub use scan::{ScanEvent, ScanHandle, ScanScheduler};

// Re-export the top-level facade (primary entry point)
pub use scheduler::{JobSpec, Scheduler};

// Re-export commonly used external types
pub use async_trait::async_trait;
