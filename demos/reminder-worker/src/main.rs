//! # Reminder Worker
//!
//! Shows a minimal node process: define a handler, schedule a recurring
//! reminder, and run the scan loop until a few have fired.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use timeloom::{ClaimedJob, DefineOptions, JobHandler, JobSpec, SchedulerConfig};
use timeloom_testing::InMemoryJobStore;
use tokio::sync::oneshot;

struct PrintReminder;

#[async_trait]
impl JobHandler for PrintReminder {
    async fn handle(&self, job: ClaimedJob) -> Result<()> {
        println!("[{}] reminder fired: {}", job.worker_id, job.data);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(InMemoryJobStore::new());
    let config = SchedulerConfig::builder().concurrency(2).idle_time_ms(500).build();
    let scheduler = Arc::new(timeloom::Scheduler::new(store, config));

    scheduler.define("reminder:send", DefineOptions::default(), PrintReminder);

    scheduler
        .schedule(JobSpec {
            id: Some("daily-standup".to_string()),
            job_type: "reminder:send".to_string(),
            schedule: Some("R/PT2S".to_string()),
            priority: None,
            concurrency: None,
            data: serde_json::json!({"message": "standup in 5 minutes"}),
            immediate: true,
        })
        .await?;

    let (stop_tx, stop_rx) = oneshot::channel();
    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(stop_rx).await })
    };

    tokio::time::sleep(Duration::from_secs(7)).await;
    let _ = stop_tx.send(());
    runner.await??;

    Ok(())
}
