//! Reservation sweeper
//!
//! Background task that periodically force-refunds reservations nobody
//! resolved (the process crashed between reserve and commit/refund) and prunes
//! old resolved records. The first pass runs immediately on spawn.

use crate::error::LedgerError;
use crate::ledger::{QuotaLedger, ReconcileReport};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Periodic reconciliation of stale reservations
#[derive(Clone)]
pub struct ReservationSweeper {
    ledger: Arc<QuotaLedger>,
    interval: Duration,
    max_age: Duration,
    retention: Duration,
}

impl ReservationSweeper {
    pub fn new(ledger: Arc<QuotaLedger>, interval: Duration, max_age: Duration, retention: Duration) -> Self {
        Self {
            ledger,
            interval,
            max_age,
            retention,
        }
    }

    /// Run one reconciliation pass now
    pub fn sweep_once(&self) -> Result<ReconcileReport, LedgerError> {
        self.ledger
            .reconcile(to_chrono(self.max_age), to_chrono(self.retention))
    }

    /// Start the sweep loop on the current runtime
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_ms = self.interval.as_millis() as u64,
                max_age_ms = self.max_age.as_millis() as u64,
                "Reservation sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep_once() {
                            Ok(report) => debug!(
                                refunded = report.refunded.len(),
                                pruned = report.pruned,
                                "Sweep finished"
                            ),
                            Err(e) => error!(error = %e, reconcile = true, "Reservation sweep failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Reservation sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running sweeper
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for it
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

pub(crate) fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365 * 100))
}
