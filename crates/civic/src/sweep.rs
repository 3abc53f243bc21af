//! Periodic status sweep.
//!
//! On every tick the sweep runs two batch updates, in this order:
//!
//! 1. `Pending` issues created at least `dispatch_after` ago become `Sent to Authority`.
//! 2. `Sent to Authority` issues created at least `resolve_after` ago become `Resolved`.
//!
//! Age is always measured from creation, so an issue old enough for both
//! thresholds takes both steps in a single tick. A failed tick is logged and
//! dropped; the next tick selects the same eligible issues again.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::domain::Status;
use crate::storage::IssueStore;

/// Number of issues moved by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sent_to_authority: u64,
    pub resolved: u64,
}

/// Advances issue status by age.
pub struct Sweeper<S: IssueStore> {
    storage: S,
    config: SweepConfig,
}

impl<S: IssueStore> Sweeper<S> {
    pub fn new(storage: S, config: SweepConfig) -> Self {
        Self { storage, config }
    }

    /// Run one sweep as of `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<SweepReport> {
        let sent_to_authority = self
            .storage
            .advance_status(
                Status::Pending,
                Status::SentToAuthority,
                cutoff(now, self.config.dispatch_after()),
            )
            .await?;

        let resolved = self
            .storage
            .advance_status(
                Status::SentToAuthority,
                Status::Resolved,
                cutoff(now, self.config.resolve_after()),
            )
            .await?;

        Ok(SweepReport {
            sent_to_authority,
            resolved,
        })
    }

    /// Run the sweep every `interval` until `shutdown` turns true or its sender is dropped.
    ///
    /// The first sweep runs one full interval after spawning.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.interval();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = period.as_secs(), "Status sweep started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_once(Utc::now()).await {
                            Ok(report) => debug!(
                                sent_to_authority = report.sent_to_authority,
                                resolved = report.resolved,
                                "Status sweep finished"
                            ),
                            Err(e) => warn!("Status sweep failed: {:#}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Status sweep stopped");
        })
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
