//! Long-running reconciliation loop.
//!
//! A dispatcher pulls events off the watch channel and routes each one to a
//! shard worker chosen by hashing its path. Every shard handles its queue one
//! event at a time: reconcile on the blocking pool, then deliver the alert.
//! Events for a path therefore reconcile and alert in arrival order, while a
//! slow sink only stalls the shard it sits on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use warden_core::reconciler::partition_for;
use warden_core::{AlertSink, FsEvent, Outcome, Reconciler};

/// Sizing for the shard workers.
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// Counters reported when [`Monitor::run`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub events: u64,
    pub alerts: u64,
    pub unchanged: u64,
    pub ignored: u64,
    pub read_failures: u64,
    pub delivery_failures: u64,
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    alerts: AtomicU64,
    unchanged: AtomicU64,
    ignored: AtomicU64,
    read_failures: AtomicU64,
    delivery_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MonitorStats {
        MonitorStats {
            events: self.events.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Dispatcher plus shard workers around one [`Reconciler`] and one sink.
pub struct Monitor {
    reconciler: Arc<Reconciler>,
    sink: Arc<dyn AlertSink>,
    options: MonitorOptions,
}

impl Monitor {
    /// Nothing runs until [`Monitor::run`] is awaited.
    pub fn new(
        reconciler: Arc<Reconciler>,
        sink: Arc<dyn AlertSink>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            reconciler,
            sink,
            options,
        }
    }

    /// Consume `events` until the channel closes or `shutdown` flips to true.
    ///
    /// On shutdown no further events are taken from `events`; anything already
    /// handed to a shard is reconciled and delivered before this returns.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<FsEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> MonitorStats {
        let counters = Arc::new(Counters::default());
        let workers = self.options.workers.max(1);
        let capacity = self.options.queue_capacity.max(1);

        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for shard in 0..workers {
            let (tx, rx) = mpsc::channel(capacity);
            shards.push(tx);
            handles.push(spawn_shard(
                shard,
                rx,
                self.reconciler.clone(),
                self.sink.clone(),
                counters.clone(),
            ));
        }
        info!(workers, tracked = self.reconciler.tracked(), "monitor started");

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("monitor shutting down");
                            break;
                        }
                    }
                    next = events.recv() => {
                        let Some(event) = next else {
                            debug!("event stream closed");
                            break;
                        };
                        let shard = partition_for(event.path(), workers);
                        trace!(shard, ?event, "dispatching");
                        // a full shard queue must not hold off shutdown
                        tokio::select! {
                            biased;
                            _ = shutdown_requested(&mut shutdown) => {
                                info!(shard, "monitor shutting down; shard queue was full");
                                break;
                            }
                            sent = shards[shard].send(event) => {
                                if sent.is_err() {
                                    error!(shard, "shard worker exited unexpectedly");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        drop(shards);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "shard worker panicked");
            }
        }

        let stats = counters.snapshot();
        info!(
            events = stats.events,
            alerts = stats.alerts,
            unchanged = stats.unchanged,
            ignored = stats.ignored,
            read_failures = stats.read_failures,
            delivery_failures = stats.delivery_failures,
            "monitor stopped"
        );
        stats
    }
}

/// Resolves once `shutdown` holds true or its sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn spawn_shard(
    shard: usize,
    mut rx: mpsc::Receiver<FsEvent>,
    reconciler: Arc<Reconciler>,
    sink: Arc<dyn AlertSink>,
    counters: Arc<Counters>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            counters.events.fetch_add(1, Ordering::Relaxed);

            let worker = reconciler.clone();
            let outcome = match tokio::task::spawn_blocking(move || worker.reconcile(&event)).await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(shard, error = %e, "reconcile task failed");
                    continue;
                }
            };

            match outcome {
                Outcome::Alert(alert) => {
                    counters.alerts.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = sink.notify(&alert).await {
                        counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            alert_id = %alert.id,
                            path = %alert.path.display(),
                            error = %e,
                            "alert delivery failed"
                        );
                    }
                }
                Outcome::Unchanged => {
                    counters.unchanged.fetch_add(1, Ordering::Relaxed);
                }
                Outcome::Ignored => {
                    counters.ignored.fetch_add(1, Ordering::Relaxed);
                }
                Outcome::ReadFailed { path, error } => {
                    counters.read_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %path.display(), error = %error, "cannot fingerprint file; baseline kept");
                }
            }
        }
        debug!(shard, "shard drained");
    })
}
