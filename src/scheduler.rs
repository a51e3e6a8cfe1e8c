//! # Poll scheduler and lifecycle controller
//!
//! [`Canary`] owns one run from start to finish: it anchors the clock, picks
//! the detector for the configured mode, drives it on a fixed-rate timer, and
//! stops everything when the run budget is spent or a shutdown signal
//! arrives.
//!
//! Both loops are single-flight: the next tick is not awaited until the
//! current poll has finished. If a poll overruns its period, one overdue poll
//! starts as soon as it returns and the schedule then realigns to the next
//! whole period; the other missed ticks are dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::{CanaryConfig, CanaryMode, ScheduleConfig};
use crate::context::CanaryContext;
use crate::detector::{
    FragmentContinuityDetector, FragmentSnapshot, PollOutcome, Signal,
    TimeToFirstFragmentDetector,
};
use crate::metrics::{MetricEmitter, MetricsSink};
use crate::storage::StorageService;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mode: CanaryMode,
    /// Detector invocations that reached the storage service.
    pub polls: u64,
    /// Polls that produced a signal.
    pub emitted: u64,
    /// Polls absorbed as no-ops after a collaborator failure.
    pub failed: u64,
    /// Whether the latency detector fired. Always false for continuity runs.
    pub fired: bool,
    pub elapsed: Duration,
    /// The run ended on a shutdown signal before its budget was spent.
    pub interrupted: bool,
}

#[derive(Debug, Default)]
struct PollStats {
    polls: u64,
    emitted: u64,
    failed: u64,
    fired: bool,
}

impl PollStats {
    fn record(&mut self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Done => return,
            PollOutcome::Emitted(Signal::TimeToFirstFragment(_)) => {
                self.emitted += 1;
                self.fired = true;
            }
            PollOutcome::Emitted(_) => self.emitted += 1,
            PollOutcome::Failed => self.failed += 1,
            PollOutcome::NoData => {}
        }
        self.polls += 1;
    }
}

/// One canary run.
pub struct Canary {
    ctx: Arc<CanaryContext>,
    mode: CanaryMode,
    schedule: ScheduleConfig,
    storage: Arc<dyn StorageService>,
    emitter: MetricEmitter,
}

impl Canary {
    /// Anchor the run clock now and wire up the collaborators.
    ///
    /// Schedule values outside what [`CanaryConfig::load`] accepts are clamped
    /// rather than trusted, so hand-built configs cannot panic the timers.
    pub fn new(
        config: &CanaryConfig,
        storage: Arc<dyn StorageService>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let ctx = Arc::new(CanaryContext::start(config));
        let schedule = config.schedule.clamped();
        let emitter = MetricEmitter::new(
            Arc::clone(&ctx),
            config.namespace.clone(),
            sink,
            schedule.call_timeout,
        );
        Self {
            ctx,
            mode: config.mode,
            schedule,
            storage,
            emitter,
        }
    }

    pub fn context(&self) -> &CanaryContext {
        &self.ctx
    }

    /// Run until the budget is spent.
    pub async fn run(self) -> RunReport {
        self.run_until(std::future::pending()).await
    }

    /// Run until the budget is spent or `shutdown` resolves, whichever is first.
    ///
    /// Dropping out of the polling loop cancels any poll in flight; nothing is
    /// emitted after this returns.
    pub async fn run_until<S>(self, shutdown: S) -> RunReport
    where
        S: Future<Output = ()>,
    {
        let deadline = self.ctx.deadline();
        info!(
            mode = %self.mode,
            stream = %self.ctx.stream_name,
            label = %self.ctx.canary_label,
            region = %self.ctx.region,
            run_duration_secs = self.ctx.run_duration.as_secs(),
            "canary started"
        );

        tokio::pin!(shutdown);
        let mut stats = PollStats::default();
        let mut interrupted = false;

        {
            let polling = self.poll_loop(&mut stats);
            tokio::select! {
                _ = polling => {}
                _ = sleep_until(deadline) => {
                    info!("run budget spent, stopping polling");
                }
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping polling");
                    interrupted = true;
                }
            }
        }

        // A fired latency detector leaves the loop early; the run itself
        // still lasts the full budget.
        if !interrupted && Instant::now() < deadline {
            debug!("polling finished early, idling until the run budget is spent");
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = &mut shutdown => {
                    info!("shutdown requested while idle");
                    interrupted = true;
                }
            }
        }

        let report = RunReport {
            mode: self.mode,
            polls: stats.polls,
            emitted: stats.emitted,
            failed: stats.failed,
            fired: stats.fired,
            elapsed: self.ctx.elapsed(),
            interrupted,
        };
        info!(
            mode = %report.mode,
            polls = report.polls,
            emitted = report.emitted,
            failed = report.failed,
            fired = report.fired,
            elapsed_ms = report.elapsed.as_millis() as u64,
            interrupted = report.interrupted,
            "canary finished"
        );
        report
    }

    async fn poll_loop(&self, stats: &mut PollStats) {
        match self.mode {
            CanaryMode::FragmentContinuity => self.run_continuity(stats).await,
            CanaryMode::TimeToFirstFragment => self.run_first_fragment(stats).await,
        }
    }

    /// Never returns; the caller's deadline ends it.
    async fn run_continuity(&self, stats: &mut PollStats) {
        let detector = FragmentContinuityDetector::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.storage),
            self.emitter.clone(),
            self.schedule.call_timeout,
        );
        let first = self.ctx.started_at + self.schedule.initial_delay;
        info!(
            initial_delay_ms = self.schedule.initial_delay.as_millis() as u64,
            interval_ms = self.schedule.continuity_interval.as_millis() as u64,
            "fragment continuity polling scheduled"
        );

        let mut ticker = interval_at(first, self.schedule.continuity_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut snapshot = FragmentSnapshot::default();
        loop {
            ticker.tick().await;
            let (next, outcome) = detector.poll(snapshot).await;
            snapshot = next;
            stats.record(&outcome);
        }
    }

    /// Returns as soon as the detector fires.
    async fn run_first_fragment(&self, stats: &mut PollStats) {
        let mut detector = TimeToFirstFragmentDetector::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.storage),
            self.emitter.clone(),
            self.schedule.call_timeout,
            self.schedule.read_timeout,
        );
        info!(
            interval_ms = self.schedule.first_fragment_interval.as_millis() as u64,
            read_timeout_ms = self.schedule.read_timeout.as_millis() as u64,
            "time-to-first-fragment polling scheduled"
        );

        let mut ticker =
            interval_at(self.ctx.started_at, self.schedule.first_fragment_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let outcome = detector.poll().await;
            stats.record(&outcome);
            if detector.has_fired() {
                info!("first fragment seen, latency polling stopped");
                return;
            }
        }
    }
}
