//! Normalised data snapshots exchanged between workers and the display loop.
//!
//! Workers publish [`Envelope`]s; the display loop parses them into [`WorkerMessage`]s by
//! `type` and folds them into the local caches defined here.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Queue message envelope: `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Envelope {
    /// Message type: "market", "weather", "scoreboard" or "scoreboard_status"
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload (deserialised based on `kind`)
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: &str, payload: &T) -> Self {
        Self {
            kind: kind.to_string(),
            payload: serde_json::to_value(payload).unwrap_or_default(),
        }
    }

    /// Parse the payload according to `kind`. Unknown kinds and malformed payloads yield `None`.
    pub fn parse(&self) -> Option<WorkerMessage> {
        let payload = self.payload.clone();
        match self.kind.as_str() {
            "market" => serde_json::from_value(payload).ok().map(WorkerMessage::Market),
            "weather" => serde_json::from_value(payload).ok().map(WorkerMessage::Weather),
            "scoreboard" => serde_json::from_value(payload)
                .ok()
                .map(WorkerMessage::Scoreboard),
            "scoreboard_status" => serde_json::from_value(payload)
                .ok()
                .map(WorkerMessage::ScoreboardStatus),
            _ => None,
        }
    }
}

/// Typed worker message.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Market(MarketUpdate),
    Weather(WeatherSnapshot),
    Scoreboard(ScoreboardSnapshot),
    ScoreboardStatus(ScoreboardStatus),
}

// ============================================================================
// Markets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketState {
    Regular,
    Closed,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Outcome of one market fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Every symbol fetched
    Ok,
    /// Some symbols fetched
    Partial,
    /// No symbol fetched and at least one request failed
    Error,
    /// Nothing to fetch, or nothing came back
    #[default]
    NoData,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Ok => "ok",
            FetchStatus::Partial => "partial",
            FetchStatus::Error => "error",
            FetchStatus::NoData => "no_data",
        }
    }

    /// Whether any data arrived.
    pub fn any_ok(&self) -> bool {
        matches!(self, FetchStatus::Ok | FetchStatus::Partial)
    }
}

/// Last and previous close for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Quote {
    pub last: f64,
    pub previous_close: f64,
    pub percent_change: f64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Build a quote, computing the percent change. Returns `None` for a zero previous close.
    pub fn new(last: f64, previous_close: f64, timestamp: DateTime<Utc>) -> Option<Self> {
        if previous_close == 0.0 || !last.is_finite() || !previous_close.is_finite() {
            return None;
        }
        Some(Self {
            last,
            previous_close,
            percent_change: (last - previous_close) / previous_close * 100.0,
            timestamp,
        })
    }
}

/// Payload of a "market" message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MarketUpdate {
    pub status: FetchStatus,
    pub market_state: MarketState,
    pub quotes: HashMap<String, Quote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Display-side view of the latest market data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketCache {
    pub quotes: HashMap<String, Quote>,
    pub state: MarketState,
    pub last_result_ok: bool,
    pub last_success: Option<NaiveDateTime>,
}

impl MarketCache {
    /// Replace the cache with `update`, observed at `now`.
    pub fn apply(&mut self, update: MarketUpdate, now: NaiveDateTime) {
        self.quotes = update.quotes;
        self.state = update.market_state;
        self.last_result_ok = update.status.any_ok();
        if self.last_result_ok {
            self.last_success = Some(now);
        }
    }

    /// Whether the last fetch succeeded within `fresh_sec` seconds of `now`.
    pub fn is_fresh(&self, now: NaiveDateTime, fresh_sec: u64) -> bool {
        match self.last_success {
            Some(at) if self.last_result_ok => (now - at).num_seconds() <= fresh_sec as i64,
            _ => false,
        }
    }
}

// ============================================================================
// Weather
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    #[serde(alias = "")]
    None,
    Statement,
    Watch,
    Advisory,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Statement => "statement",
            Severity::Watch => "watch",
            Severity::Advisory => "advisory",
            Severity::Warning => "warning",
        }
    }

    /// Severities that get an on-screen banner.
    pub fn is_displayed(&self) -> bool {
        matches!(self, Severity::Watch | Severity::Advisory | Severity::Warning)
    }
}

/// Payload of a "weather" message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct WeatherSnapshot {
    pub active: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
}

impl WeatherSnapshot {
    pub fn inactive() -> Self {
        Self::default()
    }
}

// ============================================================================
// Scoreboard
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum League {
    Nhl,
    Nfl,
}

impl League {
    pub const ALL: [League; 2] = [League::Nhl, League::Nfl];

    pub fn as_str(&self) -> &'static str {
        match self {
            League::Nhl => "NHL",
            League::Nfl => "NFL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NHL" => Some(League::Nhl),
            "NFL" => Some(League::Nfl),
            _ => None,
        }
    }

    /// Nominal game length in minutes, used to expire FINAL games.
    pub fn game_minutes(&self) -> i64 {
        match self {
            League::Nhl => 150,
            League::Nfl => 180,
        }
    }

    /// Word shown on a score alert.
    pub fn score_word(&self) -> &'static str {
        match self {
            League::Nhl => "GOAL",
            League::Nfl => "TOUCHDOWN",
        }
    }
}

impl std::fmt::Display for League {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GamePhase {
    Pregame,
    Live,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TeamScore {
    pub code: String,
    #[serde(default)]
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GameState {
    pub id: String,
    pub state: GamePhase,
    pub home: TeamScore,
    pub away: TeamScore,
    #[serde(default)]
    pub clock: String,
    #[serde(default)]
    pub period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes_until_start: Option<i64>,
}

impl GameState {
    pub fn is_live(&self) -> bool {
        self.state == GamePhase::Live
    }

    /// Whether either side is one of `teams`.
    pub fn involves(&self, teams: &[String]) -> bool {
        teams
            .iter()
            .any(|team| team.eq_ignore_ascii_case(&self.home.code) || team.eq_ignore_ascii_case(&self.away.code))
    }
}

/// Payload of a "scoreboard" message: the filtered games of one league.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScoreboardSnapshot {
    pub league: League,
    pub games: Vec<GameState>,
}

/// Payload of a "scoreboard_status" message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ScoreboardStatus {
    pub game_today: bool,
}

/// Latest scoreboard snapshot per league.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreboardCache {
    pub leagues: BTreeMap<League, ScoreboardSnapshot>,
    pub game_today: bool,
}

impl ScoreboardCache {
    pub fn apply(&mut self, snapshot: ScoreboardSnapshot) {
        self.leagues.insert(snapshot.league, snapshot);
    }

    pub fn clear(&mut self) {
        self.leagues.clear();
        self.game_today = false;
    }

    pub fn games(&self) -> impl Iterator<Item = (League, &GameState)> {
        self.leagues
            .values()
            .flat_map(|snapshot| snapshot.games.iter().map(move |game| (snapshot.league, game)))
    }

    pub fn any_live(&self) -> bool {
        self.games().any(|(_, game)| game.is_live())
    }

    pub fn any_games(&self) -> bool {
        self.games().next().is_some()
    }

    /// First live game, NHL before NFL.
    pub fn first_live(&self) -> Option<(League, &GameState)> {
        self.games().find(|(_, game)| game.is_live())
    }
}
