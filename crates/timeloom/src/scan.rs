//! Scan Scheduler: drives `concurrency`-many concurrent worker sessions off
//! an event-driven `SCAN` queue, with idle-rearm so the system keeps polling
//! even when nothing currently signals work (§4.5).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::claim::ClaimEngine;
use crate::error::Result;
use crate::registry::TypeRegistry;
use crate::store::JobStore;

/// A request to (re)scan, optionally targeted at a single job id.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Rescan the whole due set.
    General,
    /// Rescan only this job; errors with `NotFound` if it isn't claimable.
    Targeted(String),
}

/// Handle used to push scan events into a running [`ScanScheduler`] from
/// `schedule()`/`unschedule()` or any other part of the process.
#[derive(Clone)]
pub struct ScanHandle {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl ScanHandle {
    pub fn signal(&self) {
        let _ = self.tx.send(ScanEvent::General);
    }

    pub fn signal_job(&self, id: impl Into<String>) {
        let _ = self.tx.send(ScanEvent::Targeted(id.into()));
    }
}

pub struct ScanScheduler<S: JobStore> {
    engine: Arc<ClaimEngine<S>>,
    concurrency: usize,
    idle_time: StdDuration,
    rx: mpsc::UnboundedReceiver<ScanEvent>,
    handle: ScanHandle,
}

impl<S: JobStore + 'static> ScanScheduler<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<TypeRegistry>,
        concurrency: usize,
        idle_time: StdDuration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            engine: Arc::new(ClaimEngine::new(store, registry)),
            concurrency: concurrency.max(1),
            idle_time,
            rx,
            handle: ScanHandle { tx },
        }
    }

    pub fn handle(&self) -> ScanHandle {
        self.handle.clone()
    }

    /// Run the scan loop until `stop` resolves.
    ///
    /// On start, `concurrency` initial `General` scans are enqueued so the
    /// node picks up any work already due without waiting for an external
    /// signal. Every `idle_time` with no pending event, another `General`
    /// scan is rearmed so nothing permanently idles out.
    pub async fn run(mut self, mut stop: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
        for _ in 0..self.concurrency {
            self.handle.signal();
        }

        let mut sessions = FuturesUnordered::new();

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => {
                    debug!("scan scheduler stopping");
                    break;
                }

                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.spawn_session(&mut sessions, event),
                        None => break,
                    }
                }

                Some(result) = sessions.next(), if !sessions.is_empty() => {
                    self.handle_session_result(result);
                }

                _ = tokio::time::sleep(self.idle_time), if sessions.len() < self.concurrency => {
                    self.handle.signal();
                }
            }
        }

        while let Some(result) = sessions.next().await {
            self.handle_session_result(result);
        }

        Ok(())
    }

    fn spawn_session(
        &self,
        sessions: &mut FuturesUnordered<tokio::task::JoinHandle<Result<()>>>,
        event: ScanEvent,
    ) {
        let engine = self.engine.clone();
        sessions.push(tokio::spawn(async move {
            match event {
                ScanEvent::General => engine.run_session(None).await,
                ScanEvent::Targeted(id) => engine.run_session(Some(&id)).await,
            }
        }));
    }

    fn handle_session_result(&self, result: std::result::Result<Result<()>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "worker session ended with an error"),
            Err(e) => warn!(error = %e, "worker session task panicked"),
        }
    }
}
