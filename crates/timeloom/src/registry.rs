//! Type Registry: process-local mapping from job type name to its handler,
//! lock duration, and default field values.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use serde_json::Value;

/// A job handed to a registered handler once claimed.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// External job id (`job.id`).
    pub id: String,
    /// Registered type name (`job.type`).
    pub job_type: String,
    /// Opaque payload (`job.data`), merged with type/global defaults.
    pub data: Value,
    /// The worker id that currently holds the permit.
    pub worker_id: String,
}

/// A registered job handler.
///
/// Implementations should treat failures as retryable by default: the
/// Claim Engine logs the error and proceeds to Step D regardless.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: ClaimedJob) -> anyhow::Result<()>;
}

/// Options accepted by [`TypeRegistry::define`].
#[derive(Debug, Clone, Default)]
pub struct DefineOptions {
    /// Per-type lock duration; falls back to the registry's configured
    /// default when absent.
    pub lock_duration: Option<Duration>,
    /// Default field values, shallow-merged under the global defaults.
    pub defaults: Option<Value>,
}

struct TypeEntry {
    handler: Arc<dyn JobHandler>,
    lock_duration: Duration,
    defaults: Value,
}

/// Process-local registry of job types eligible for execution on this node.
///
/// Not thread-safe against concurrent `define` and Claim Engine reads on the
/// *same* type; callers should register all types before the first scan.
pub struct TypeRegistry {
    entries: DashMap<String, TypeEntry>,
    default_lock_duration: Duration,
    global_defaults: Value,
}

impl TypeRegistry {
    pub fn new(default_lock_duration: Duration, global_defaults: Value) -> Self {
        Self {
            entries: DashMap::new(),
            default_lock_duration,
            global_defaults,
        }
    }

    /// Register (or redefine) a handler for `job_type`. A later call for the
    /// same type wins over an earlier one.
    pub fn define(
        &self,
        job_type: impl Into<String>,
        options: DefineOptions,
        handler: impl JobHandler + 'static,
    ) {
        let lock_duration = options.lock_duration.unwrap_or(self.default_lock_duration);
        let defaults = merge_defaults(&self.global_defaults, options.defaults.as_ref());

        self.entries.insert(
            job_type.into(),
            TypeEntry {
                handler: Arc::new(handler),
                lock_duration,
                defaults,
            },
        );
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.entries.contains_key(job_type)
    }

    pub fn lock_duration(&self, job_type: &str) -> Option<Duration> {
        self.entries.get(job_type).map(|e| e.lock_duration)
    }

    pub fn defaults(&self, job_type: &str) -> Option<Value> {
        self.entries.get(job_type).map(|e| e.defaults.clone())
    }

    pub fn handler(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.entries.get(job_type).map(|e| e.handler.clone())
    }

    /// Snapshot of `(job_type, lock_duration)` for every registered type, in
    /// no particular order — used by the Claim Engine's expired-candidate
    /// query (§4.4 Step A.2).
    pub fn lock_durations(&self) -> Vec<(String, Duration)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().lock_duration))
            .collect()
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

fn merge_defaults(global: &Value, type_specific: Option<&Value>) -> Value {
    let mut merged = global.clone();
    if let (Some(Value::Object(merged_map)), Some(Value::Object(type_map))) =
        (merged.as_object().map(|_| &mut merged), type_specific)
    {
        if let Value::Object(m) = merged_map {
            for (k, v) in type_map {
                m.insert(k.clone(), v.clone());
            }
        }
    }
    merged
}
