//! Score-change alerts.
//!
//! [`ScoreDeltaDetector`] compares consecutive scoreboard snapshots and emits [`ScoreEvent`]s,
//! which wait in the bounded [`ScoreAlertQueue`]. One [`ScoreAlert`] at a time is active and
//! flashes through the configured colour list for a fixed number of laps.
//! [`GoalFlash`] is the smaller in-scoreboard variant that flashes the scoring side's score.

use crate::{
    config::TickerConfig,
    render::{Rgb, parse_color},
    types::{League, ScoreboardCache},
};
use chrono::{Duration, NaiveDateTime, Timelike};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// A detected score change waiting to be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEvent {
    pub league: League,
    pub team: String,
    pub score: u32,
}

/// The alert currently flashing on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreAlert {
    pub league: League,
    pub team: String,
    pub score: u32,
    pub cycles_remaining: u32,
    pub flash_index: usize,
    pub next_flash_deadline: NaiveDateTime,
}

impl ScoreAlert {
    pub fn new(event: ScoreEvent, cycles: u32, flash: Duration, now: NaiveDateTime) -> Self {
        Self {
            league: event.league,
            team: event.team,
            score: event.score,
            cycles_remaining: cycles.max(1),
            flash_index: 0,
            next_flash_deadline: now + flash,
        }
    }

    /// Step to the next colour once the flash deadline passes. Wrapping back to the first
    /// colour completes one cycle.
    pub fn advance(&mut self, now: NaiveDateTime, flash: Duration, colors: usize) {
        if self.is_done() || now < self.next_flash_deadline {
            return;
        }
        self.flash_index = (self.flash_index + 1) % colors.max(1);
        self.next_flash_deadline = now + flash;
        if self.flash_index == 0 {
            self.cycles_remaining -= 1;
        }
    }

    pub fn is_done(&self) -> bool {
        self.cycles_remaining == 0
    }

    /// `"<TEAM>  <SCORE>"`
    pub fn text(&self) -> String {
        format!("{}  {}", self.team, self.score)
    }

    pub fn color(&self, palette: &[Rgb]) -> Rgb {
        palette
            .get(self.flash_index)
            .copied()
            .unwrap_or(Rgb::WHITE)
    }
}

/// Bounded FIFO of pending alerts plus the single active one.
#[derive(Debug, Clone)]
pub struct ScoreAlertQueue {
    pending: VecDeque<ScoreEvent>,
    capacity: usize,
    active: Option<ScoreAlert>,
}

impl Default for ScoreAlertQueue {
    fn default() -> Self {
        Self::new(4)
    }
}

impl ScoreAlertQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity: capacity.max(1),
            active: None,
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.pending.len() > self.capacity {
            self.pending.pop_front();
        }
    }

    /// Queue `event`, evicting the oldest pending alert when full. Never blocks.
    pub fn push(&mut self, event: ScoreEvent) -> bool {
        let mut evicted = false;
        while self.pending.len() >= self.capacity {
            self.pending.pop_front();
            evicted = true;
        }
        info!(league = %event.league, team = %event.team, score = event.score, "score alert queued");
        self.pending.push_back(event);
        evicted
    }

    pub fn pending(&self) -> impl Iterator<Item = &ScoreEvent> {
        self.pending.iter()
    }

    pub fn active(&self) -> Option<&ScoreAlert> {
        self.active.as_ref()
    }

    /// Whether an alert is active or waiting.
    pub fn is_busy(&self) -> bool {
        self.active.is_some() || !self.pending.is_empty()
    }

    /// Activate the next pending alert if none is active.
    pub fn promote(&mut self, cycles: u32, flash: Duration, now: NaiveDateTime) -> Option<&ScoreAlert> {
        if self.active.is_none() {
            if let Some(event) = self.pending.pop_front() {
                info!(team = %event.team, score = event.score, "score alert started");
                self.active = Some(ScoreAlert::new(event, cycles, flash, now));
            }
        }
        self.active.as_ref()
    }

    /// Advance the active alert's flash and return its current text and colour.
    pub fn frame(&mut self, palette: &[Rgb], flash: Duration, now: NaiveDateTime) -> Option<(String, Rgb)> {
        let alert = self.active.as_mut()?;
        alert.advance(now, flash, palette.len());
        Some((alert.text(), alert.color(palette)))
    }

    /// Drop the active alert once its cycle budget is spent. Returns `true` if one retired.
    pub fn retire_finished(&mut self) -> bool {
        if self.active.as_ref().is_some_and(ScoreAlert::is_done) {
            info!("score alert finished");
            self.active = None;
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.active = None;
    }
}

/// Resolve the configured flash colour names.
pub fn flash_palette(config: &TickerConfig) -> Vec<Rgb> {
    config
        .score_alerts_flash_colors
        .iter()
        .map(|name| parse_color(name))
        .collect()
}

/// Detects score increases between consecutive scoreboard snapshots.
#[derive(Debug, Clone, Default)]
pub struct ScoreDeltaDetector {
    last: HashMap<(League, String), (u32, u32)>,
}

impl ScoreDeltaDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `cache` with the previous observation and return new score events.
    ///
    /// The first sighting of a game only records its baseline. Only LIVE games alert; NHL on
    /// any increase, NFL only on a jump of at least the touchdown delta.
    pub fn detect(&mut self, cache: &ScoreboardCache, config: &TickerConfig) -> Vec<ScoreEvent> {
        let mut events = Vec::new();

        for (league, game) in cache.games() {
            let key = (league, game.id.clone());
            let current = (game.home.score, game.away.score);
            let Some((prev_home, prev_away)) = self.last.insert(key, current) else {
                continue;
            };
            if !game.is_live() {
                continue;
            }

            let delta_home = current.0.saturating_sub(prev_home);
            let delta_away = current.1.saturating_sub(prev_away);
            let threshold = match league {
                League::Nhl if config.score_alerts_nhl => 1,
                League::Nfl if config.score_alerts_nfl => config.score_alerts_nfl_td_delta_min.max(1),
                _ => continue,
            };

            let scored = if delta_home >= threshold {
                Some((&game.home.code, current.0))
            } else if delta_away >= threshold {
                Some((&game.away.code, current.1))
            } else {
                None
            };
            let Some((team, score)) = scored else {
                continue;
            };

            let team = team.to_uppercase();
            if config.score_alerts_my_teams_only
                && !config.my_teams(league).iter().any(|mine| mine == &team)
            {
                debug!(%league, %team, "ignoring score change for other team");
                continue;
            }
            events.push(ScoreEvent { league, team, score });
        }

        events
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

/// Emits a synthetic score event every `SCORE_ALERTS_TEST_INTERVAL_SEC` when test alerts are on.
#[derive(Debug, Clone, Default)]
pub struct TestAlertGenerator {
    last: Option<NaiveDateTime>,
}

impl TestAlertGenerator {
    pub fn poll(&mut self, config: &TickerConfig, now: NaiveDateTime) -> Option<ScoreEvent> {
        if !config.score_alerts_test || !config.score_alerts_enabled {
            return None;
        }
        let interval = config.score_alerts_test_interval_sec.max(1) as i64;
        if self
            .last
            .is_some_and(|last| (now - last).num_seconds() < interval)
        {
            return None;
        }
        self.last = Some(now);

        let seconds_of_day = i64::from(now.num_seconds_from_midnight());
        let score = 2 + ((seconds_of_day / interval) % 10) as u32;
        Some(ScoreEvent {
            league: League::parse(&config.score_alerts_test_league).unwrap_or(League::Nhl),
            team: config.score_alerts_test_team.to_uppercase(),
            score,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

/// Flashes the scoring side's score on the full-height scoreboard.
#[derive(Debug, Clone, Default)]
pub struct GoalFlash {
    side: Option<Side>,
    cycles_left: u32,
    flash_index: usize,
    next_flash_deadline: Option<NaiveDateTime>,
    last_scores: HashMap<String, (u32, u32)>,
}

impl GoalFlash {
    pub const PALETTE: [Rgb; 3] = [
        Rgb { r: 255, g: 0, b: 0 },
        Rgb { r: 255, g: 255, b: 255 },
        Rgb { r: 0, g: 0, b: 255 },
    ];
    pub const CYCLES: u32 = 4;
    pub const FLASH_MS: i64 = 250;

    /// Start flashing when a live game's score went up since the last observation.
    pub fn observe(&mut self, cache: &ScoreboardCache, now: NaiveDateTime) {
        for (_, game) in cache.games() {
            if game.id.is_empty() || !game.is_live() {
                continue;
            }
            let current = (game.home.score, game.away.score);
            let (prev_home, prev_away) = self.last_scores.insert(game.id.clone(), current).unwrap_or(current);

            if current.0 > prev_home {
                info!(team = %game.home.code, score = current.0, "goal flash (home)");
                self.start(Side::Home, now);
            } else if current.1 > prev_away {
                info!(team = %game.away.code, score = current.1, "goal flash (away)");
                self.start(Side::Away, now);
            }
        }
    }

    pub fn start(&mut self, side: Side, now: NaiveDateTime) {
        self.side = Some(side);
        self.cycles_left = Self::CYCLES;
        self.flash_index = 0;
        self.next_flash_deadline = Some(now + Duration::milliseconds(Self::FLASH_MS));
    }

    /// Flashing side and its current colour, advancing the animation. `None` when idle.
    pub fn frame(&mut self, now: NaiveDateTime) -> Option<(Side, Rgb)> {
        let side = self.side?;
        if self.next_flash_deadline.is_some_and(|deadline| now >= deadline) {
            self.flash_index = (self.flash_index + 1) % Self::PALETTE.len();
            self.next_flash_deadline = Some(now + Duration::milliseconds(Self::FLASH_MS));
            if self.flash_index == 0 {
                self.cycles_left = self.cycles_left.saturating_sub(1);
                if self.cycles_left == 0 {
                    self.side = None;
                    return None;
                }
            }
        }
        Some((side, Self::PALETTE[self.flash_index]))
    }

    pub fn is_flashing(&self, side: Side) -> bool {
        self.side == Some(side)
    }
}
