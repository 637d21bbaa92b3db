//! Background refresh of due feeds.
//!
//! The scheduler wakes up every tick, recomputes which enabled feeds are due
//! from their persisted `last_refreshed_at`, and runs the refresh action for
//! each of them in turn:
//! - a feed that was never refreshed is due
//! - otherwise it is due once `refresh_interval_hours` have elapsed (inclusive)
//! - every refresh runs under a timeout; a failure only affects that feed
//!
//! Nothing is kept in memory between ticks, so a restart loses no schedule.

use std::sync::Arc;
use std::time::Duration;

use calfeed_providers::BoxFuture;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::ServerResult;
use crate::models::Feed;
use crate::registry::FeedRegistry;
use crate::signals::ShutdownSignal;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub tick_interval: Duration,
    /// Upper bound on one feed's refresh action.
    pub refresh_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Creates a new scheduler config with the given tick interval.
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            ..Default::default()
        }
    }

    /// Builder: set refresh timeout.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }
}

/// Work performed for a due feed before its timestamp is recorded.
pub trait RefreshAction: Send + Sync {
    fn refresh<'a>(&'a self, feed: &'a Feed) -> BoxFuture<'a, ServerResult<()>>;
}

/// Records the refresh without fetching anything. Feeds are rendered on
/// demand, so the timestamp is the only state a refresh changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampOnly;

impl RefreshAction for TimestampOnly {
    fn refresh<'a>(&'a self, _feed: &'a Feed) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Returns true if `feed` should be refreshed at `now`.
pub fn is_due(feed: &Feed, now: DateTime<Utc>) -> bool {
    match feed.last_refreshed_at {
        None => true,
        Some(last) => {
            let interval = chrono::Duration::hours(i64::from(feed.refresh_interval_hours));
            now >= last + interval
        }
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Enabled feeds looked at.
    pub checked: usize,
    /// Feeds refreshed and touched.
    pub refreshed: Vec<i64>,
    /// Feeds whose refresh failed or timed out, with the reason.
    pub failed: Vec<(i64, String)>,
}

/// Commands that can be sent to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run a tick now.
    TickNow,
    /// Stop the scheduler.
    Stop,
}

/// Counters exposed to the rest of the process.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Completed ticks.
    pub ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

/// Shared scheduler state.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

/// The refresh loop.
pub struct RefreshScheduler {
    config: SchedulerConfig,
    registry: FeedRegistry,
    action: Arc<dyn RefreshAction>,
    state: SharedSchedulerState,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl RefreshScheduler {
    /// Creates a scheduler with the timestamp-only refresh action.
    pub fn new(config: SchedulerConfig, registry: FeedRegistry) -> Self {
        Self::with_action(config, registry, Arc::new(TimestampOnly))
    }

    pub fn with_action(
        config: SchedulerConfig,
        registry: FeedRegistry,
        action: Arc<dyn RefreshAction>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            config,
            registry,
            action,
            state: SharedSchedulerState::default(),
            command_tx,
            command_rx,
        }
    }

    /// Returns a handle for sending commands to the scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
            state: self.state.clone(),
        }
    }

    /// Runs ticks until `shutdown` fires or a `Stop` command arrives.
    ///
    /// The first tick runs immediately. A tick in progress is always
    /// finished before the loop exits.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            timeout_secs = self.config.refresh_timeout.as_secs(),
            "Scheduler started"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = shutdown.wait();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Scheduler stopping on shutdown");
                    break;
                }
                cmd = self.command_rx.recv() => match cmd {
                    Some(SchedulerCommand::TickNow) => {
                        debug!("Received TickNow command");
                        self.tick().await;
                    }
                    Some(SchedulerCommand::Stop) | None => {
                        info!("Scheduler stopping");
                        break;
                    }
                },
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let now = Utc::now();
        let report = self.tick_at(now).await;
        let mut state = self.state.write().await;
        state.ticks += 1;
        state.last_tick = Some(now);
        state.last_report = Some(report);
    }

    /// Evaluates every enabled feed at `now` and refreshes the due ones.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let feeds = match self.registry.list_enabled() {
            Ok(feeds) => feeds,
            Err(e) => {
                warn!(error = %e, "Could not load feeds for refresh");
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            checked: feeds.len(),
            ..Default::default()
        };

        for feed in feeds.iter().filter(|feed| is_due(feed, now)) {
            match self.refresh_one(feed, now).await {
                Ok(()) => {
                    debug!(feed_id = feed.id, name = %feed.name, "Feed refreshed");
                    report.refreshed.push(feed.id);
                }
                Err(reason) => {
                    warn!(feed_id = feed.id, name = %feed.name, error = %reason, "Feed refresh failed");
                    report.failed.push((feed.id, reason));
                }
            }
        }

        if !report.refreshed.is_empty() || !report.failed.is_empty() {
            info!(
                checked = report.checked,
                refreshed = report.refreshed.len(),
                failed = report.failed.len(),
                "Refresh tick finished"
            );
        }
        report
    }

    async fn refresh_one(&self, feed: &Feed, now: DateTime<Utc>) -> Result<(), String> {
        match tokio::time::timeout(self.config.refresh_timeout, self.action.refresh(feed)).await {
            Ok(Ok(())) => self
                .registry
                .touch_refreshed_at(feed.id, now)
                .map_err(|e| e.to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}s",
                self.config.refresh_timeout.as_secs()
            )),
        }
    }
}

/// Handle for sending commands to a running scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: SharedSchedulerState,
}

impl SchedulerHandle {
    /// Requests an immediate tick.
    pub async fn tick_now(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::TickNow).await
    }

    /// Stops the scheduler.
    pub async fn stop(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Stop).await
    }

    /// Returns a snapshot of the scheduler state.
    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }
}
