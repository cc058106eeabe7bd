//! Periodic seat refresh
//!
//! [`SeatPoller`] runs seat/status refresh passes for one term until asked to
//! stop. Shutdown is only observed between passes: a pass that has started
//! always runs to completion, so no course transaction is cut short.

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::models::Term;
use crate::reconcile::Reconciler;
use crate::utils::format_elapsed;

/// Sender/receiver pair used to request shutdown
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve on Ctrl-C, or SIGTERM on unix
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received, finishing current pass");
}

/// Repeats seat refresh passes with a fixed sleep between them
pub struct SeatPoller {
    reconciler: Arc<Reconciler>,
    term: Term,
    interval: Duration,
}

impl SeatPoller {
    pub fn new(reconciler: Arc<Reconciler>, term: Term, interval: Duration) -> Self {
        Self {
            reconciler,
            term,
            interval,
        }
    }

    /// Loop until `shutdown` flips to `true`. Returns the number of completed
    /// passes. A failed pass is logged and the loop carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut passes = 0usize;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.reconciler.refresh_seats(self.term).await {
                Ok(summary) => {
                    tracing::info!(
                        term = %self.term,
                        pass = passes + 1,
                        updated = summary.sections.updated,
                        errors = summary.errors(),
                        elapsed = %format_elapsed(summary.elapsed),
                        "Seat pass finished"
                    );
                }
                Err(e) => {
                    tracing::warn!(term = %self.term, pass = passes + 1, error = %e, "Seat pass failed");
                }
            }
            passes += 1;

            let next = Local::now()
                + chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::zero());
            tracing::debug!(next = %next.format("%H:%M:%S"), "Sleeping until next seat pass");

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again, so stop too
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(term = %self.term, passes, "Seat poller stopped");
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::ReconcileOptions;
    use crate::storage::{SnapshotStore, SqliteSnapshotStore};
    use crate::upstream::HttpUpstreamClient;
    use crate::config::{PipelineConfig, UpstreamConfig};

    fn poller(interval: Duration) -> SeatPoller {
        let upstream = HttpUpstreamClient::new(
            &UpstreamConfig::default(),
            &PipelineConfig::default(),
            "unused".to_string(),
        )
        .unwrap();
        let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::in_memory().unwrap());
        let reconciler = Reconciler::new(Arc::new(upstream), store, ReconcileOptions::default());
        SeatPoller::new(Arc::new(reconciler), "1252".parse().unwrap(), interval)
    }

    #[tokio::test]
    async fn test_stops_before_first_pass_when_already_shut_down() {
        let (tx, rx) = shutdown_channel();
        tx.send(true).unwrap();
        assert_eq!(poller(Duration::from_millis(10)).run(rx).await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let (tx, rx) = shutdown_channel();
        let poller = poller(Duration::from_secs(3600));

        let handle = tokio::spawn(async move { poller.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let passes = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(passes, 1);
    }
}
