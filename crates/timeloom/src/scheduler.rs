//! Top-level facade wiring config, registry, store, and the Scan Scheduler
//! into the public API (§6).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::info;

use crate::claim::delete_selector;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::id::{JobIdGenerator, UuidJobIdGenerator};
use crate::id::hash_job_id;
use crate::registry::{DefineOptions, JobHandler, TypeRegistry};
use crate::scan::{ScanHandle, ScanScheduler};
use crate::schedule;
use crate::store::{JobFields, JobRecord, JobStore, Meta, StoreError};

/// A job submission accepted by [`Scheduler::schedule`]. `id` is optional;
/// when absent one is generated via the configured [`JobIdGenerator`].
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: Option<String>,
    pub job_type: String,
    pub schedule: Option<String>,
    pub priority: Option<i64>,
    pub concurrency: Option<i64>,
    pub data: Value,
    /// When true and the computed `due` is already in the past, signal a
    /// targeted scan immediately instead of waiting for the next idle
    /// rearm (§6).
    pub immediate: bool,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            id: None,
            job_type: String::new(),
            schedule: None,
            priority: None,
            concurrency: None,
            data: Value::Null,
            immediate: true,
        }
    }
}

/// The scheduler facade. Construct with [`Scheduler::new`], call `define`
/// for every job type this node can execute, then `run` to start scanning.
pub struct Scheduler<S: JobStore> {
    store: Arc<S>,
    registry: Arc<TypeRegistry>,
    config: SchedulerConfig,
    id_generator: Arc<dyn JobIdGenerator>,
    scan_handle: std::sync::Mutex<Option<ScanHandle>>,
}

impl<S: JobStore + 'static> Scheduler<S> {
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> Self {
        let default_lock_duration = Duration::milliseconds(config.lock_duration_ms);
        let global_defaults = serde_json::json!({
            "priority": config.default_priority,
            "concurrency": config.default_concurrency,
        });
        Self {
            store,
            registry: Arc::new(TypeRegistry::new(default_lock_duration, global_defaults)),
            config,
            id_generator: Arc::new(UuidJobIdGenerator),
            scan_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn with_id_generator(mut self, generator: Arc<dyn JobIdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    /// Register a handler for `job_type` (§4.3).
    pub fn define(&self, job_type: impl Into<String>, options: DefineOptions, handler: impl JobHandler + 'static) {
        self.registry.define(job_type, options, handler);
    }

    pub fn generate_job_id(&self) -> String {
        self.id_generator.generate()
    }

    /// Insert or look up-and-signal a job (§6).
    ///
    /// `schedule()` is idempotent on `(job.type, job.id)`: a duplicate insert
    /// surfaces as [`SchedulerError::DuplicateKey`], matching §7.
    pub async fn schedule(&self, spec: JobSpec) -> Result<JobRecord> {
        if spec.job_type.is_empty() {
            return Err(SchedulerError::InvalidJob("job.type is required".into()));
        }

        let immediate = spec.immediate;
        let external_id = spec.id.unwrap_or_else(|| self.generate_job_id());
        let type_defaults = self.registry.defaults(&spec.job_type).unwrap_or_default();

        let priority = spec
            .priority
            .or_else(|| type_defaults.get("priority").and_then(|v| v.as_i64()))
            .unwrap_or(self.config.default_priority);
        let concurrency = spec
            .concurrency
            .or_else(|| type_defaults.get("concurrency").and_then(|v| v.as_i64()))
            .unwrap_or(self.config.default_concurrency);

        let now = Utc::now();
        let next = schedule::next_on_insert(spec.schedule.as_deref(), now)?;

        let record = JobRecord {
            id: hash_job_id(&spec.job_type, &external_id),
            job: JobFields {
                id: external_id,
                job_type: spec.job_type,
                schedule: spec.schedule,
                priority,
                concurrency,
                data: spec.data,
            },
            due: next.due,
            permits: concurrency,
            workers: Default::default(),
            completed: None,
            meta: Meta {
                created: now,
                updated: now,
            },
        };

        self.store.insert(record.clone()).await.map_err(store_err)?;

        let due_now = record.due.is_some_and(|due| due <= now);
        if immediate && due_now {
            if let Some(scan_handle) = self.scan_handle.lock().unwrap().as_ref() {
                scan_handle.signal_job(record.id.clone());
            }
        }

        Ok(record)
    }

    /// Remove job(s) matching `id` and/or `job_type` (§6).
    pub async fn unschedule(&self, id: Option<String>, job_type: Option<String>) -> Result<u64> {
        let selector = delete_selector(id, job_type)?;
        self.store.delete(selector).await.map_err(store_err)
    }

    pub async fn get_job(&self, id: &str) -> Result<JobRecord> {
        self.store
            .get(id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    pub fn encode_expired_threshold(&self, t: DateTime<Utc>) -> String {
        crate::worker_id::encode_expired_threshold(t)
    }

    pub fn create_worker_id(&self) -> String {
        crate::worker_id::create_worker_id()
    }

    /// Run the Scan Scheduler until `stop` fires. Spawns `concurrency`
    /// concurrent worker sessions and rearms on idle (§4.5).
    pub async fn run(&self, stop: oneshot::Receiver<()>) -> Result<()> {
        let scanner = ScanScheduler::new(
            self.store.clone(),
            self.registry.clone(),
            self.config.concurrency,
            StdDuration::from_millis(self.config.idle_time_ms.max(0) as u64),
        );
        *self.scan_handle.lock().unwrap() = Some(scanner.handle());
        info!(concurrency = self.config.concurrency, "scheduler starting scan loop");
        scanner.run(stop).await
    }

    /// Schedule every job listed in the config's `jobs` table, ignoring
    /// `DuplicateKey` so this is safe to call on every node at startup.
    pub async fn bootstrap(&self) -> Result<()> {
        for job in self.config.jobs.clone() {
            let spec = JobSpec {
                id: job.id,
                job_type: job.job_type,
                schedule: job.schedule,
                priority: job.priority,
                concurrency: job.concurrency,
                data: job.data,
                ..Default::default()
            };
            match self.schedule(spec).await {
                Ok(_) | Err(SchedulerError::DuplicateKey(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn store_err(e: StoreError) -> SchedulerError {
    match e {
        StoreError::DuplicateKey(k) => SchedulerError::DuplicateKey(k),
        StoreError::Backend(e) => SchedulerError::Store(e),
    }
}
