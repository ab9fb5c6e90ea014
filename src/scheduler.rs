//! Fixed-interval driver for scheduled refresh cycles.
//!
//! Ticks are aligned to the wall clock: with a one hour interval the cycle
//! fires at the top of each hour regardless of when the process started.
//! A cycle runs inline in the loop, so ticks never overlap each other; a tick
//! that finds a request-triggered cycle in progress is skipped and the next
//! tick is the retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::RefreshError;
use crate::refresh::{RefreshService, RefreshTrigger};

/// Delay from `now` until the next multiple of `interval` since the Unix epoch.
///
/// Exactly on a boundary counts as "just fired", so the result is a full
/// interval rather than zero.
pub fn next_aligned_delay(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1);
    let now_ms = now.timestamp_millis().max(0) as u128;
    let remainder = now_ms % interval_ms;
    let wait_ms = interval_ms - remainder;
    Duration::from_millis(wait_ms.min(u64::MAX as u128) as u64)
}

/// Smallest gap allowed between two scheduled ticks.
const MIN_TICK_GAP: Duration = Duration::from_secs(1);

/// Like [`next_aligned_delay`], but a boundary that lands within
/// [`MIN_TICK_GAP`] of `last_tick` belongs to that tick and is skipped.
///
/// A timer that wakes a hair early would otherwise fire once just before the
/// boundary and again on it.
pub fn next_tick_delay(
    now: DateTime<Utc>,
    interval: Duration,
    last_tick: Option<DateTime<Utc>>,
) -> Duration {
    let delay = next_aligned_delay(now, interval);
    let Some(last_tick) = last_tick else {
        return delay;
    };
    let boundary_ms = now.timestamp_millis() as i128 + delay.as_millis() as i128;
    let gap_ms = boundary_ms - last_tick.timestamp_millis() as i128;
    if gap_ms < MIN_TICK_GAP.as_millis() as i128 {
        delay + interval
    } else {
        delay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    RunNow,
    Shutdown,
}

/// Outcome of one scheduled tick, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickResult {
    Completed { fetched: usize, history_appended: usize },
    Skipped,
    Failed(String),
}

pub struct Scheduler {
    service: Arc<RefreshService>,
    interval: Duration,
    run_on_start: bool,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(service: Arc<RefreshService>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            run_on_start: false,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one scheduled cycle. Failures are logged here and never propagate.
    pub async fn tick(&self, reason: &str) -> TickResult {
        match self.service.refresh(RefreshTrigger::Scheduled).await {
            Ok(outcome) => {
                info!(
                    reason,
                    fetched = outcome.count(),
                    history_appended = outcome.persistence.history_appended,
                    complete = outcome.persistence.is_complete(),
                    "scheduled refresh finished"
                );
                TickResult::Completed {
                    fetched: outcome.count(),
                    history_appended: outcome.persistence.history_appended,
                }
            }
            Err(RefreshError::CycleInProgress) => TickResult::Skipped,
            Err(err) => {
                warn!(reason, error = %err, "scheduled refresh failed; waiting for next tick");
                TickResult::Failed(err.to_string())
            }
        }
    }

    /// Spawn the loop onto the runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(cmd_rx));
        SchedulerHandle { cmd_tx, task }
    }

    pub async fn run(self, mut cmd_rx: UnboundedReceiver<SchedulerCommand>) {
        if self.run_on_start {
            self.tick("startup").await;
        }

        let mut last_tick: Option<DateTime<Utc>> = None;
        loop {
            let delay = next_tick_delay(self.clock.now(), self.interval, last_tick);
            info!(delay_secs = delay.as_secs(), "next scheduled refresh");

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);

            tokio::select! {
                _ = &mut sleep => {
                    last_tick = Some(self.clock.now());
                    self.tick("scheduled").await;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::RunNow) => {
                            self.tick("manual").await;
                        }
                        Some(SchedulerCommand::Shutdown) | None => {
                            info!("scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

pub struct SchedulerHandle {
    cmd_tx: UnboundedSender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn run_now(&self) {
        let _ = self.cmd_tx.send(SchedulerCommand::RunNow);
    }

    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(SchedulerCommand::Shutdown);
        if let Err(err) = self.task.await {
            warn!(error = %err, "scheduler task ended abnormally");
        }
    }
}
