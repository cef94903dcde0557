//!
//! Periodic refresh loop
//! ---------------------
//! One long-lived background task that runs a discovery cycle on a fixed
//! interval and installs the result into the cache. The loop is
//! supervised: a failing or panicking cycle is logged within that
//! iteration's scope and the loop unconditionally proceeds to the next
//! tick, keeping the previous snapshot in place. The inter-cycle wait is
//! cancellable, and shutdown gives an in-flight cycle a bounded grace
//! period before abandoning it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::aggregate::Aggregator;
use crate::cache::SnapshotCache;

pub struct RefreshLoop {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Start the refresh loop. The first cycle runs immediately so the cache
/// is populated as soon as discovery allows.
pub fn start(aggregator: Arc<Aggregator>, cache: Arc<SnapshotCache>, interval: Duration) -> RefreshLoop {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        info!(target: "opensight::refresh", "refresh loop started, interval {}s", interval.as_secs());
        loop {
            run_cycle(&aggregator, &cache).await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!(target: "opensight::refresh", "refresh loop stopped");
    });
    RefreshLoop { handle, shutdown }
}

/// One supervised cycle: any failure is confined to this iteration and the
/// previous snapshot stays in place.
async fn run_cycle(aggregator: &Aggregator, cache: &SnapshotCache) {
    let cycle = async {
        let snapshot = aggregator.collect().await;
        let count = snapshot.records.len();
        cache.replace(snapshot);
        count
    };
    match AssertUnwindSafe(cycle).catch_unwind().await {
        Ok(count) => {
            info!(target: "opensight::refresh", "cache refreshed: {} open files", count);
        }
        Err(_) => {
            error!(target: "opensight::refresh", "refresh cycle panicked, keeping previous snapshot");
        }
    }
}

impl RefreshLoop {
    /// Signal shutdown and wait at most `grace` for the in-flight cycle;
    /// after that the task is abandoned so process exit is never blocked.
    pub async fn stop(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        match tokio::time::timeout(grace, self.handle).await {
            Ok(_) => {}
            Err(_) => {
                warn!(target: "opensight::refresh", "refresh loop did not stop within {}s, abandoning it", grace.as_secs());
            }
        }
    }
}
