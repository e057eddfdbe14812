//! Background data workers and their supervisor.
//!
//! Each worker runs as its own tokio task, polls one [`DataProvider`] source at its own
//! cadence and publishes [`Envelope`]s into a dedicated [`LatestWinsQueue`]. Workers share
//! nothing with the display loop except that queue and the [`StatusBoard`].

use crate::{
    config::{Category, ChangeSet, TickerConfig},
    provider::DataProvider,
    queue::LatestWinsQueue,
    types::{Envelope, WorkerMessage},
};
use futures::future::join_all;
use std::{collections::BTreeMap, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

pub mod market;
pub mod scoreboard;
pub mod status;
pub mod weather;

pub use status::{StatusBoard, WorkerStatus};

/// Default bound on each join while stopping a worker.
pub const JOIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerKind {
    Market,
    Weather,
    Scoreboard,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [WorkerKind::Market, WorkerKind::Weather, WorkerKind::Scoreboard];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Market => "market",
            WorkerKind::Weather => "weather",
            WorkerKind::Scoreboard => "scoreboard",
        }
    }

    /// Capacity of the worker's queue. The scoreboard publishes several messages per cycle.
    pub fn queue_capacity(&self) -> usize {
        match self {
            WorkerKind::Market => 10,
            WorkerKind::Weather => 5,
            WorkerKind::Scoreboard => 20,
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
struct WorkerHandle {
    task: JoinHandle<()>,
    stop: watch::Sender<bool>,
    queue: LatestWinsQueue<Envelope>,
}

/// Cache resets the display loop owes after a config diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffOutcome {
    pub reset_cursors: bool,
    pub reset_weather: bool,
    pub clear_scoreboard: bool,
}

/// Owns the worker tasks: start, targeted restart on config change, drain, shutdown.
///
/// Every method except [`shutdown`](Self::shutdown) is synchronous and non-blocking so it can
/// be called from the frame loop. A restarted worker gets a fresh queue; anything its
/// predecessor pushes while winding down lands in the discarded queue. A worker that dies is
/// not respawned, its cache simply stops advancing.
#[derive(Debug)]
pub struct WorkerSupervisor {
    provider: DataProvider,
    status: StatusBoard,
    handles: BTreeMap<WorkerKind, WorkerHandle>,
    generations: BTreeMap<WorkerKind, u64>,
    grace: Duration,
}

impl WorkerSupervisor {
    pub fn new(provider: DataProvider, status: StatusBoard) -> Self {
        Self {
            provider,
            status,
            handles: BTreeMap::new(),
            generations: BTreeMap::new(),
            grace: JOIN_GRACE,
        }
    }

    pub fn with_grace(self, grace: Duration) -> Self {
        Self { grace, ..self }
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Spawn every worker the config enables.
    pub fn start(&mut self, config: &TickerConfig) {
        self.spawn(WorkerKind::Market, config);
        self.spawn(WorkerKind::Weather, config);
        if config.scoreboard_enabled {
            self.spawn(WorkerKind::Scoreboard, config);
        }
    }

    /// Spawn `kind`, retiring any running instance first.
    pub fn spawn(&mut self, kind: WorkerKind, config: &TickerConfig) {
        self.retire(kind);

        let queue = LatestWinsQueue::new(kind.queue_capacity());
        let (stop_tx, stop_rx) = watch::channel(false);
        let status = self.status.clone();

        let task = match kind {
            WorkerKind::Market => tokio::spawn(market::run(
                market::MarketSettings::from_config(config),
                self.provider.market.clone(),
                queue.clone(),
                status,
                stop_rx,
            )),
            WorkerKind::Weather => tokio::spawn(weather::run(
                weather::WeatherSettings::from_config(config),
                self.provider.weather.clone(),
                queue.clone(),
                status,
                stop_rx,
            )),
            WorkerKind::Scoreboard => tokio::spawn(scoreboard::run(
                scoreboard::ScoreboardSettings::from_config(config),
                self.provider.scoreboard.clone(),
                queue.clone(),
                status,
                stop_rx,
            )),
        };

        let generation = self.generations.entry(kind).or_default();
        *generation += 1;
        info!(worker = %kind, generation = *generation, "worker spawned");

        self.handles.insert(
            kind,
            WorkerHandle {
                task,
                stop: stop_tx,
                queue,
            },
        );
    }

    /// Signal `kind` to stop and reap it in the background: bounded join, then abort.
    pub fn stop(&mut self, kind: WorkerKind) {
        if self.retire(kind) {
            info!(worker = %kind, "worker stopped");
        }
    }

    fn retire(&mut self, kind: WorkerKind) -> bool {
        let Some(WorkerHandle { mut task, stop, .. }) = self.handles.remove(&kind) else {
            return false;
        };
        let _ = stop.send(true);

        let grace = self.grace;
        tokio::spawn(async move {
            if timeout(grace, &mut task).await.is_err() {
                warn!(worker = %kind, "worker ignored stop signal, aborting");
                task.abort();
                let _ = timeout(grace, task).await;
            }
            drop(stop);
        });
        true
    }

    /// Restart the workers whose config category changed and report the caches to reset.
    pub fn on_config_diff(&mut self, changes: &ChangeSet, config: &TickerConfig) -> DiffOutcome {
        let mut outcome = DiffOutcome::default();

        if changes.contains(Category::Markets) {
            info!("market settings changed, restarting market worker");
            self.spawn(WorkerKind::Market, config);
            outcome.reset_cursors = true;
        }
        if changes.contains(Category::Weather) {
            info!("weather settings changed, restarting weather worker");
            self.spawn(WorkerKind::Weather, config);
            outcome.reset_weather = true;
        }
        if changes.contains(Category::Scoreboard) {
            if config.scoreboard_enabled {
                info!("scoreboard settings changed, restarting scoreboard worker");
                self.spawn(WorkerKind::Scoreboard, config);
            } else {
                self.stop(WorkerKind::Scoreboard);
            }
            outcome.clear_scoreboard = true;
        }

        outcome
    }

    /// Take every pending message from every queue, oldest first per worker.
    ///
    /// Never blocks. Malformed envelopes are dropped.
    pub fn drain_nonblocking(&self) -> Vec<WorkerMessage> {
        self.handles
            .iter()
            .flat_map(|(kind, handle)| handle.queue.drain().into_iter().map(move |envelope| (*kind, envelope)))
            .filter_map(|(kind, envelope)| {
                let message = envelope.parse();
                if message.is_none() {
                    debug!(worker = %kind, message_type = %envelope.kind, "discarding malformed message");
                }
                message
            })
            .collect()
    }

    pub fn is_running(&self, kind: WorkerKind) -> bool {
        self.handles
            .get(&kind)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Number of times `kind` has been spawned.
    pub fn generation(&self, kind: WorkerKind) -> u64 {
        self.generations.get(&kind).copied().unwrap_or_default()
    }

    /// Stop every worker: signal, bounded join, abort stragglers, bounded join again.
    ///
    /// Completes within roughly twice the grace period whatever the workers do.
    pub async fn shutdown(&mut self) {
        let started = tokio::time::Instant::now();
        let handles = std::mem::take(&mut self.handles);

        let mut tasks = handles
            .into_iter()
            .map(|(kind, handle)| {
                let _ = handle.stop.send(true);
                (kind, handle.task)
            })
            .collect::<Vec<_>>();

        if timeout(self.grace, join_all(tasks.iter_mut().map(|(_, task)| task)))
            .await
            .is_err()
        {
            for (kind, task) in tasks.iter().filter(|(_, task)| !task.is_finished()) {
                warn!(worker = %kind, "worker did not stop in time, aborting");
                task.abort();
            }
            let _ = timeout(self.grace, join_all(tasks.iter_mut().map(|(_, task)| task))).await;
        }

        info!(elapsed = ?started.elapsed(), "workers shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ConfigKey,
        types::{ScoreboardStatus, WeatherSnapshot},
    };
    use serde_json::json;
    use std::collections::BTreeSet;
    use tokio::time::Instant;

    fn supervisor() -> WorkerSupervisor {
        WorkerSupervisor::new(DataProvider::demo(), StatusBoard::in_memory()).with_grace(Duration::from_millis(50))
    }

    fn changes(keys: &[ConfigKey]) -> ChangeSet {
        ChangeSet {
            keys: keys.iter().copied().collect(),
            categories: keys
                .iter()
                .flat_map(|key| key.categories().iter().copied())
                .collect::<BTreeSet<_>>(),
        }
    }

    fn idle_handle(stop_aware: bool) -> (WorkerHandle, LatestWinsQueue<Envelope>) {
        let queue = LatestWinsQueue::new(10);
        let (stop, mut stop_rx) = watch::channel(false);
        let task = if stop_aware {
            tokio::spawn(async move {
                let _ = stop_rx.changed().await;
            })
        } else {
            tokio::spawn(std::future::pending::<()>())
        };
        let handle = WorkerHandle {
            task,
            stop,
            queue: queue.clone(),
        };
        (handle, queue)
    }

    #[tokio::test]
    async fn test_markets_change_restarts_only_market_worker() {
        let mut supervisor = supervisor();
        let config = TickerConfig::default();
        supervisor.start(&config);

        for kind in WorkerKind::ALL {
            assert_eq!(supervisor.generation(kind), 1, "{kind}");
        }

        let outcome = supervisor.on_config_diff(&changes(&[ConfigKey::TickersTop]), &config);

        assert_eq!(outcome, DiffOutcome {
            reset_cursors: true,
            reset_weather: false,
            clear_scoreboard: false,
        });
        assert_eq!(supervisor.generation(WorkerKind::Market), 2);
        assert_eq!(supervisor.generation(WorkerKind::Weather), 1);
        assert_eq!(supervisor.generation(WorkerKind::Scoreboard), 1);
        assert!(supervisor.is_running(WorkerKind::Market));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabling_scoreboard_stops_worker() {
        let mut supervisor = supervisor();
        let mut config = TickerConfig::default();
        supervisor.start(&config);
        assert!(supervisor.is_running(WorkerKind::Scoreboard));

        config.scoreboard_enabled = false;
        let outcome = supervisor.on_config_diff(&changes(&[ConfigKey::ScoreboardEnabled]), &config);

        assert!(outcome.clear_scoreboard);
        assert!(!supervisor.is_running(WorkerKind::Scoreboard));
        assert_eq!(supervisor.generation(WorkerKind::Scoreboard), 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_drain_folds_every_message_and_skips_malformed() {
        let mut supervisor = supervisor();
        let (handle, queue) = idle_handle(true);
        supervisor.handles.insert(WorkerKind::Scoreboard, handle);

        queue.push(Envelope::new("scoreboard_status", &ScoreboardStatus { game_today: false }));
        queue.push(Envelope {
            kind: "scoreboard".to_string(),
            payload: json!({ "league": "MLB" }),
        });
        queue.push(Envelope::new("weather", &WeatherSnapshot::inactive()));
        queue.push(Envelope::new("scoreboard_status", &ScoreboardStatus { game_today: true }));

        let messages = supervisor.drain_nonblocking();
        assert_eq!(messages, vec![
            WorkerMessage::ScoreboardStatus(ScoreboardStatus { game_today: false }),
            WorkerMessage::Weather(WeatherSnapshot::inactive()),
            WorkerMessage::ScoreboardStatus(ScoreboardStatus { game_today: true }),
        ]);
        assert!(supervisor.drain_nonblocking().is_empty());

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_bounded_when_worker_ignores_stop() {
        let mut supervisor = supervisor();
        let (stubborn, _) = idle_handle(false);
        let (polite, _) = idle_handle(true);
        supervisor.handles.insert(WorkerKind::Weather, stubborn);
        supervisor.handles.insert(WorkerKind::Market, polite);

        let started = Instant::now();
        supervisor.shutdown().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!supervisor.is_running(WorkerKind::Weather));
        assert!(!supervisor.is_running(WorkerKind::Market));
    }
}
