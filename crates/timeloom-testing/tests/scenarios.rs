//! End-to-end scenarios against the in-memory store, exercising `Scheduler`
//! the way a real node process would be driven.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde_json::json;
use timeloom::{ClaimedJob, DefineOptions, JobHandler, JobSpec, Scheduler, SchedulerConfig};
use timeloom_testing::InMemoryJobStore;
use tokio::sync::oneshot;

struct CountingHandler(Arc<AtomicUsize>);

#[async_trait]
impl JobHandler for CountingHandler {
    async fn handle(&self, _job: ClaimedJob) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracks the high-water mark of concurrently-running handler invocations,
/// to verify mutual exclusion across independent `Scheduler` instances
/// sharing one store (S2/S3).
struct OverlapHandler {
    concurrent: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    hold: Duration,
}

#[async_trait]
impl JobHandler for OverlapHandler {
    async fn handle(&self, _job: ClaimedJob) -> anyhow::Result<()> {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts total invocations and the high-water mark of concurrently-running
/// handler invocations, while sleeping past the caller's lock duration so a
/// second node's expired-candidate path (Step A.2) gets a chance to reclaim
/// the lease mid-flight (S3).
struct ReclaimHandler {
    invocations: Arc<AtomicUsize>,
    concurrent: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    hold: Duration,
}

#[async_trait]
impl JobHandler for ReclaimHandler {
    async fn handle(&self, _job: ClaimedJob) -> anyhow::Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn run_for<S: timeloom::JobStore + 'static>(scheduler: Arc<Scheduler<S>>, duration: Duration) {
    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(async move { scheduler.run(stop_rx).await });
    tokio::time::sleep(duration).await;
    let _ = stop_tx.send(());
    let _ = handle.await;
}

#[tokio::test(flavor = "multi_thread")]
async fn s1_recurring_job_runs_and_reschedules_into_the_future() {
    let store = Arc::new(InMemoryJobStore::new());
    let config = SchedulerConfig::builder().concurrency(1).idle_time_ms(50).build();
    let scheduler = Arc::new(Scheduler::new(store.clone(), config));

    let count = Arc::new(AtomicUsize::new(0));
    scheduler.define(
        "digest:send",
        DefineOptions::default(),
        CountingHandler(count.clone()),
    );

    scheduler
        .schedule(JobSpec {
            job_type: "digest:send".to_string(),
            schedule: Some("R/PT1M".to_string()),
            data: json!({}),
            ..Default::default()
        })
        .await
        .unwrap();

    run_for(scheduler, Duration::from_millis(300)).await;

    assert!(count.load(Ordering::SeqCst) >= 1);
    let record = store.snapshot().into_iter().next().expect("record retained");
    assert!(record.due.unwrap() > chrono::Utc::now());
}

#[tokio::test(flavor = "multi_thread")]
async fn s4_future_instant_is_not_claimed_early() {
    let store = Arc::new(InMemoryJobStore::new());
    let config = SchedulerConfig::builder().concurrency(1).idle_time_ms(50).build();
    let scheduler = Arc::new(Scheduler::new(store.clone(), config));

    let count = Arc::new(AtomicUsize::new(0));
    scheduler.define("far:future", DefineOptions::default(), CountingHandler(count.clone()));

    scheduler
        .schedule(JobSpec {
            job_type: "far:future".to_string(),
            schedule: Some("2099-01-01T00:00:00Z".to_string()),
            data: json!({}),
            ..Default::default()
        })
        .await
        .unwrap();

    run_for(scheduler, Duration::from_millis(200)).await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn s5_finite_repeat_exhausts_and_is_removed() {
    let store = Arc::new(InMemoryJobStore::new());
    let config = SchedulerConfig::builder().concurrency(1).idle_time_ms(20).build();
    let scheduler = Arc::new(Scheduler::new(store.clone(), config));

    let count = Arc::new(AtomicUsize::new(0));
    scheduler.define("burst:three", DefineOptions::default(), CountingHandler(count.clone()));

    scheduler
        .schedule(JobSpec {
            job_type: "burst:three".to_string(),
            schedule: Some("R3/PT0.01S".to_string()),
            data: json!({}),
            ..Default::default()
        })
        .await
        .unwrap();

    run_for(scheduler, Duration::from_millis(500)).await;

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn s6_unschedule_by_type_only_removes_matching_jobs() {
    let store = Arc::new(InMemoryJobStore::new());
    let config = SchedulerConfig::default();
    let scheduler = Arc::new(Scheduler::new(store.clone(), config));

    scheduler
        .schedule(JobSpec {
            job_type: "alerts:email".to_string(),
            schedule: Some("2099-01-01T00:00:00Z".to_string()),
            data: json!({}),
            ..Default::default()
        })
        .await
        .unwrap();
    scheduler
        .schedule(JobSpec {
            job_type: "alerts:sms".to_string(),
            schedule: Some("2099-01-01T00:00:00Z".to_string()),
            data: json!({}),
            ..Default::default()
        })
        .await
        .unwrap();

    let removed = scheduler
        .unschedule(None, Some("alerts:email".to_string()))
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.snapshot()[0].job.job_type, "alerts:sms");
}

#[tokio::test(flavor = "multi_thread")]
async fn s2_two_nodes_never_run_a_concurrency_one_job_simultaneously() {
    let store = Arc::new(InMemoryJobStore::new());

    let concurrent = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let config_a = SchedulerConfig::builder().concurrency(2).idle_time_ms(10).build();
    let scheduler_a = Arc::new(Scheduler::new(store.clone(), config_a));
    scheduler_a.define(
        "locked:job",
        DefineOptions::default(),
        OverlapHandler {
            concurrent: concurrent.clone(),
            peak: peak.clone(),
            hold: Duration::from_millis(30),
        },
    );

    let config_b = SchedulerConfig::builder().concurrency(2).idle_time_ms(10).build();
    let scheduler_b = Arc::new(Scheduler::new(store.clone(), config_b));
    scheduler_b.define(
        "locked:job",
        DefineOptions::default(),
        OverlapHandler {
            concurrent: concurrent.clone(),
            peak: peak.clone(),
            hold: Duration::from_millis(30),
        },
    );

    scheduler_a
        .schedule(JobSpec {
            id: Some("singleton".to_string()),
            job_type: "locked:job".to_string(),
            schedule: Some("R/PT0.02S".to_string()),
            concurrency: Some(1),
            data: json!({}),
            ..Default::default()
        })
        .await
        .unwrap();

    let (stop_a_tx, stop_a_rx) = oneshot::channel();
    let (stop_b_tx, stop_b_rx) = oneshot::channel();
    let handle_a = tokio::spawn({
        let scheduler_a = scheduler_a.clone();
        async move { scheduler_a.run(stop_a_rx).await }
    });
    let handle_b = tokio::spawn({
        let scheduler_b = scheduler_b.clone();
        async move { scheduler_b.run(stop_b_rx).await }
    });

    tokio::time::sleep(Duration::from_millis(400)).await;
    let _ = stop_a_tx.send(());
    let _ = stop_b_tx.send(());
    let _ = handle_a.await;
    let _ = handle_b.await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

/// S3: a worker's handler runs past `lockDuration` while still in flight; a
/// second node's expired-candidate path (Step A.2) reclaims the lease and
/// runs the same job again before the first handler returns.
#[tokio::test(flavor = "multi_thread")]
async fn s3_second_node_reclaims_an_expired_lease_mid_flight() {
    let store = Arc::new(InMemoryJobStore::new());

    let invocations = Arc::new(AtomicUsize::new(0));
    let concurrent = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    // Handler holds the lease far longer than the lock duration below, so a
    // second scan is guaranteed to observe it as expired before it returns.
    let hold = Duration::from_millis(250);

    let lock_options = DefineOptions {
        lock_duration: Some(ChronoDuration::milliseconds(30)),
        defaults: None,
    };

    let config_a = SchedulerConfig::builder().concurrency(1).idle_time_ms(10).build();
    let scheduler_a = Arc::new(Scheduler::new(store.clone(), config_a));
    scheduler_a.define(
        "leaky:lease",
        lock_options.clone(),
        ReclaimHandler {
            invocations: invocations.clone(),
            concurrent: concurrent.clone(),
            peak: peak.clone(),
            hold,
        },
    );

    let config_b = SchedulerConfig::builder().concurrency(1).idle_time_ms(10).build();
    let scheduler_b = Arc::new(Scheduler::new(store.clone(), config_b));
    scheduler_b.define(
        "leaky:lease",
        lock_options,
        ReclaimHandler {
            invocations: invocations.clone(),
            concurrent: concurrent.clone(),
            peak: peak.clone(),
            hold,
        },
    );

    scheduler_a
        .schedule(JobSpec {
            id: Some("leaky-job".to_string()),
            job_type: "leaky:lease".to_string(),
            concurrency: Some(1),
            data: json!({}),
            ..Default::default()
        })
        .await
        .unwrap();

    let (stop_a_tx, stop_a_rx) = oneshot::channel();
    let (stop_b_tx, stop_b_rx) = oneshot::channel();
    let handle_a = tokio::spawn({
        let scheduler_a = scheduler_a.clone();
        async move { scheduler_a.run(stop_a_rx).await }
    });
    let handle_b = tokio::spawn({
        let scheduler_b = scheduler_b.clone();
        async move { scheduler_b.run(stop_b_rx).await }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    let _ = stop_a_tx.send(());
    let _ = stop_b_tx.send(());
    let _ = handle_a.await;
    let _ = handle_b.await;

    // The one-shot job ran twice: once claimed outright, once more after a
    // second node reclaimed it as expired while the first handler was still
    // sleeping — and for a window both handlers were genuinely concurrent.
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert!(store.is_empty());
}
