//! Typed sign configuration.
//!
//! The on-disk document is a flat JSON object with SCREAMING_SNAKE_CASE keys. Every key the
//! engine understands is listed in [`ConfigKey`], together with the hot-reload
//! [`Category`]s a change to that key belongs to. [`TickerConfig`] is the typed snapshot the
//! rest of the engine reads; it is replaced wholesale by the [`ConfigStore`] on reload.

use crate::error::ConfigError;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

pub mod store;

pub use store::{ChangeSet, ConfigStore};

/// Upper bound for refresh intervals, sticky timers and delays.
pub const MAX_INTERVAL_SEC: u64 = 24 * 60 * 60;

/// Upper bound for `TIME_PREROLL_SEC`.
pub const MAX_PREROLL_SEC: u64 = 60 * 60;

/// Upper bound for `OVERRIDE_DURATION_MIN`: one week.
pub const MAX_OVERRIDE_MIN: u64 = 7 * 24 * 60;

pub const MAX_FLASH_MS: u64 = 10_000;

/// Upper bound for the scoreboard pregame and postgame windows.
pub const MAX_GAME_WINDOW_MIN: i64 = 24 * 60;

/// Hot-reload category of a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Layout,
    Dim,
    Markets,
    Weather,
    Scoreboard,
    Override,
    Message,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Layout => "layout",
            Category::Dim => "dim",
            Category::Markets => "markets",
            Category::Weather => "weather",
            Category::Scoreboard => "scoreboard",
            Category::Override => "override",
            Category::Message => "message",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

macro_rules! config_keys {
    ($($variant:ident => $name:literal [$($category:ident),*]),* $(,)?) => {
        /// Every configuration key understood by the engine.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ConfigKey {
            $($variant),*
        }

        impl ConfigKey {
            pub const ALL: &'static [ConfigKey] = &[$(ConfigKey::$variant),*];

            /// Document name of the key.
            pub fn name(&self) -> &'static str {
                match self {
                    $(ConfigKey::$variant => $name),*
                }
            }

            /// Hot-reload categories a change to this key belongs to (possibly none).
            pub fn categories(&self) -> &'static [Category] {
                match self {
                    $(ConfigKey::$variant => &[$(Category::$category),*]),*
                }
            }
        }
    };
}

config_keys! {
    // Layout
    ModelName => "MODEL_NAME" [Layout],
    Width => "W" [Layout],
    Height => "H" [Layout],
    Layout => "LAYOUT" [Layout],
    TickerTz => "TICKER_TZ" [Dim],

    // Frame pacing & scroll speed
    Fps => "FPS" [],
    PpsTop => "PPS_TOP" [],
    PpsBot => "PPS_BOT" [],
    PpsSingle => "PPS_SINGLE" [],
    RefreshSec => "REFRESH_SEC" [Markets],
    FreshSec => "FRESH_SEC" [],

    // Clock
    Clock24h => "CLOCK_24H" [Override],
    ClockShowSeconds => "CLOCK_SHOW_SECONDS" [Override],
    ClockBlinkColon => "CLOCK_BLINK_COLON" [Override],
    ClockColor => "CLOCK_COLOR" [Override],
    ClockDateShow => "CLOCK_DATE_SHOW" [Override],
    ClockDateFmt => "CLOCK_DATE_FMT" [Override],
    ClockDateColor => "CLOCK_DATE_COLOR" [Override],

    // Preroll
    TimePrerollEnabled => "TIME_PREROLL_ENABLED" [],
    TimePrerollSec => "TIME_PREROLL_SEC" [],
    PrerollStyle => "PREROLL_STYLE" [],
    PrerollColor => "PREROLL_COLOR" [],
    PrerollPps => "PREROLL_PPS" [],

    // Market schedule (exchange time)
    MarketOpen => "MARKET_OPEN" [],
    MarketClose => "MARKET_CLOSE" [],

    // Maintenance
    MaintenanceMode => "MAINTENANCE_MODE" [],
    MaintenanceText => "MAINTENANCE_TEXT" [],
    MaintenanceScroll => "MAINTENANCE_SCROLL" [],
    MaintenancePps => "MAINTENANCE_PPS" [],

    // Weather
    WeatherRssUrl => "WEATHER_RSS_URL" [Weather],
    WeatherRefreshSec => "WEATHER_REFRESH_SEC" [Weather],
    WeatherAnnounceSec => "WEATHER_ANNOUNCE_SEC" [Weather],
    WeatherTimeout => "WEATHER_TIMEOUT" [Weather],
    WeatherIncludeWatch => "WEATHER_INCLUDE_WATCH" [Weather],
    WeatherForceActive => "WEATHER_FORCE_ACTIVE" [Weather],
    WeatherForceText => "WEATHER_FORCE_TEXT" [Weather],
    WeatherTestDelay => "WEATHER_TEST_DELAY" [Weather],
    WeatherWarningEveryNScrolls => "WEATHER_WARNING_EVERY_N_SCROLLS" [Weather],
    WeatherWarningColor => "WEATHER_WARNING_COLOR" [Weather],
    WeatherAdvisoryEveryNScrolls => "WEATHER_ADVISORY_EVERY_N_SCROLLS" [Weather],
    WeatherAdvisoryColor => "WEATHER_ADVISORY_COLOR" [Weather],
    WeatherStickySec => "WEATHER_STICKY_SEC" [Weather],
    WeatherTestStickyTotal => "WEATHER_TEST_STICKY_TOTAL" [Weather],
    WeatherRepeatSec => "WEATHER_REPEAT_SEC" [Weather],

    // Message injector
    InjectMessage => "INJECT_MESSAGE" [Message],
    MessageEvery => "MESSAGE_EVERY" [Message],
    MessageRow => "MESSAGE_ROW" [Message],
    MessageColor => "MESSAGE_COLOR" [Message],
    MessageTestForce => "MESSAGE_TEST_FORCE" [Message],

    // Night mode & dimming
    NightModeEnabled => "NIGHT_MODE_ENABLED" [Dim],
    NightModeStart => "NIGHT_MODE_START" [Dim],
    NightModeEnd => "NIGHT_MODE_END" [Dim],
    NightModeDimPct => "NIGHT_MODE_DIM_PCT" [Dim],
    NightModeSpeedPct => "NIGHT_MODE_SPEED_PCT" [Dim],
    QuickDimPct => "QUICK_DIM_PCT" [Dim],

    // Scoreboard
    ScoreboardEnabled => "SCOREBOARD_ENABLED" [Scoreboard],
    ScoreboardLeagues => "SCOREBOARD_LEAGUES" [Scoreboard],
    ScoreboardNhlTeams => "SCOREBOARD_NHL_TEAMS" [Scoreboard],
    ScoreboardNflTeams => "SCOREBOARD_NFL_TEAMS" [Scoreboard],
    ScoreboardPollCadence => "SCOREBOARD_POLL_CADENCE" [Scoreboard],
    ScoreboardLiveRefresh => "SCOREBOARD_LIVE_REFRESH" [Scoreboard],
    ScoreboardPregameWindowMin => "SCOREBOARD_PREGAME_WINDOW_MIN" [Scoreboard],
    ScoreboardPostgameDelayMin => "SCOREBOARD_POSTGAME_DELAY_MIN" [Scoreboard],
    ScoreboardPrecedence => "SCOREBOARD_PRECEDENCE" [Scoreboard],
    ScoreboardIncludeOthers => "SCOREBOARD_INCLUDE_OTHERS" [Scoreboard],
    ScoreboardOnlyMyTeams => "SCOREBOARD_ONLY_MY_TEAMS" [Scoreboard],
    ScoreboardMaxGames => "SCOREBOARD_MAX_GAMES" [Scoreboard],
    ScoreboardTest => "SCOREBOARD_TEST" [Scoreboard],
    ScoreboardTestLeague => "SCOREBOARD_TEST_LEAGUE" [Scoreboard],
    ScoreboardTestHome => "SCOREBOARD_TEST_HOME" [Scoreboard],
    ScoreboardTestAway => "SCOREBOARD_TEST_AWAY" [Scoreboard],
    ScoreboardTestDuration => "SCOREBOARD_TEST_DURATION" [Scoreboard],

    // Override
    OverrideMode => "OVERRIDE_MODE" [Override],
    OverrideDurationMin => "OVERRIDE_DURATION_MIN" [Override],
    OverrideMessageText => "OVERRIDE_MESSAGE_TEXT" [Override],

    // Score alerts
    ScoreAlertsEnabled => "SCORE_ALERTS_ENABLED" [],
    ScoreAlertsNhl => "SCORE_ALERTS_NHL" [],
    ScoreAlertsNfl => "SCORE_ALERTS_NFL" [],
    ScoreAlertsMyTeamsOnly => "SCORE_ALERTS_MY_TEAMS_ONLY" [],
    ScoreAlertsCycles => "SCORE_ALERTS_CYCLES" [],
    ScoreAlertsQueueMax => "SCORE_ALERTS_QUEUE_MAX" [],
    ScoreAlertsFlashMs => "SCORE_ALERTS_FLASH_MS" [],
    ScoreAlertsFlashColors => "SCORE_ALERTS_FLASH_COLORS" [],
    ScoreAlertsNflTdDeltaMin => "SCORE_ALERTS_NFL_TD_DELTA_MIN" [],
    ScoreAlertsTest => "SCORE_ALERTS_TEST" [],
    ScoreAlertsTestLeague => "SCORE_ALERTS_TEST_LEAGUE" [],
    ScoreAlertsTestTeam => "SCORE_ALERTS_TEST_TEAM" [],
    ScoreAlertsTestIntervalSec => "SCORE_ALERTS_TEST_INTERVAL_SEC" [],

    // Markets
    TickersTop => "TICKERS_TOP" [Markets],
    TickersBot => "TICKERS_BOT" [Markets],
    TickersBot2 => "TICKERS_BOT2" [Markets],
    HoldingsEnabled => "HOLDINGS_ENABLED" [Markets],
    Holdings => "HOLDINGS" [Markets],

    // Diagnostics
    DemoMode => "DEMO_MODE" [],
}

impl ConfigKey {
    /// Look up a key by its document name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.name() == name)
    }
}

/// Row arrangement of the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// Dual when the panel is at least 16 pixels tall, single otherwise.
    #[default]
    #[serde(alias = "")]
    Auto,
    Single,
    Dual,
}

/// Presentation used for the top-of-hour preroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrerollStyle {
    /// Static, centered clock.
    #[default]
    #[serde(alias = "bigtime")]
    Bigtime,
    /// Clock scrolling across the top row.
    #[serde(alias = "marquee")]
    Marquee,
    /// Market-event banner when one is in its window, static clock otherwise.
    #[serde(alias = "market_announce")]
    MarketAnnounce,
    #[serde(alias = "none")]
    None,
}

/// Whether a live game may evict a running preroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precedence {
    #[default]
    Normal,
    Force,
}

/// Which rows carry the injected message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRow {
    Top,
    Bottom,
    Single,
    Both,
    #[default]
    Auto,
}

/// One ticker entry: `[symbol, label]`. An empty label displays the symbol itself.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TickerSymbol(pub String, pub String);

impl TickerSymbol {
    pub fn symbol(&self) -> &str {
        &self.0
    }

    pub fn label(&self) -> &str {
        if self.1.is_empty() { &self.0 } else { &self.1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct Holding {
    #[serde(default)]
    pub shares: f64,
}

/// Typed configuration snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct TickerConfig {
    // Layout
    pub model_name: String,
    pub w: u32,
    pub h: u32,
    pub layout: LayoutMode,
    /// IANA zone the clock, night mode and hourly preroll follow.
    pub ticker_tz: Tz,

    // Frame pacing & scroll speed
    pub fps: u32,
    pub pps_top: f64,
    pub pps_bot: f64,
    pub pps_single: f64,
    pub refresh_sec: u64,
    pub fresh_sec: u64,

    // Clock
    pub clock_24h: bool,
    pub clock_show_seconds: bool,
    pub clock_blink_colon: bool,
    pub clock_color: String,
    pub clock_date_show: bool,
    pub clock_date_fmt: String,
    pub clock_date_color: String,

    // Preroll
    pub time_preroll_enabled: bool,
    pub time_preroll_sec: u64,
    pub preroll_style: PrerollStyle,
    pub preroll_color: String,
    pub preroll_pps: f64,

    // Market schedule
    #[serde(with = "hhmm")]
    pub market_open: NaiveTime,
    #[serde(with = "hhmm")]
    pub market_close: NaiveTime,

    // Maintenance
    pub maintenance_mode: bool,
    pub maintenance_text: String,
    pub maintenance_scroll: bool,
    pub maintenance_pps: f64,

    // Weather
    pub weather_rss_url: String,
    pub weather_refresh_sec: u64,
    pub weather_announce_sec: u64,
    pub weather_timeout: f64,
    pub weather_include_watch: bool,
    pub weather_force_active: bool,
    pub weather_force_text: String,
    pub weather_test_delay: u64,
    pub weather_warning_every_n_scrolls: u64,
    pub weather_warning_color: String,
    pub weather_advisory_every_n_scrolls: u64,
    pub weather_advisory_color: String,
    pub weather_sticky_sec: u64,
    pub weather_test_sticky_total: u64,
    pub weather_repeat_sec: u64,

    // Message injector
    pub inject_message: String,
    pub message_every: u64,
    pub message_row: MessageRow,
    pub message_color: String,
    pub message_test_force: bool,

    // Night mode & dimming
    pub night_mode_enabled: bool,
    #[serde(with = "hhmm")]
    pub night_mode_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub night_mode_end: NaiveTime,
    pub night_mode_dim_pct: u32,
    pub night_mode_speed_pct: u32,
    pub quick_dim_pct: u32,

    // Scoreboard
    pub scoreboard_enabled: bool,
    #[serde(deserialize_with = "de_upper_list")]
    pub scoreboard_leagues: Vec<String>,
    #[serde(deserialize_with = "de_upper_list")]
    pub scoreboard_nhl_teams: Vec<String>,
    #[serde(deserialize_with = "de_upper_list")]
    pub scoreboard_nfl_teams: Vec<String>,
    pub scoreboard_poll_cadence: u64,
    pub scoreboard_live_refresh: u64,
    pub scoreboard_pregame_window_min: i64,
    pub scoreboard_postgame_delay_min: i64,
    pub scoreboard_precedence: Precedence,
    pub scoreboard_include_others: bool,
    pub scoreboard_only_my_teams: bool,
    pub scoreboard_max_games: usize,
    pub scoreboard_test: bool,
    pub scoreboard_test_league: String,
    pub scoreboard_test_home: String,
    pub scoreboard_test_away: String,
    pub scoreboard_test_duration: u64,

    // Override
    pub override_mode: String,
    pub override_duration_min: u64,
    pub override_message_text: String,

    // Score alerts
    pub score_alerts_enabled: bool,
    pub score_alerts_nhl: bool,
    pub score_alerts_nfl: bool,
    pub score_alerts_my_teams_only: bool,
    pub score_alerts_cycles: u32,
    pub score_alerts_queue_max: usize,
    pub score_alerts_flash_ms: u64,
    #[serde(deserialize_with = "de_lower_list")]
    pub score_alerts_flash_colors: Vec<String>,
    pub score_alerts_nfl_td_delta_min: u32,
    pub score_alerts_test: bool,
    pub score_alerts_test_league: String,
    pub score_alerts_test_team: String,
    pub score_alerts_test_interval_sec: u64,

    // Markets
    pub tickers_top: Vec<TickerSymbol>,
    pub tickers_bot: Vec<TickerSymbol>,
    pub tickers_bot2: Vec<TickerSymbol>,
    pub holdings_enabled: bool,
    pub holdings: HashMap<String, Holding>,

    // Diagnostics
    pub demo_mode: bool,
}

impl Default for TickerConfig {
    fn default() -> Self {
        let hm = |hour, minute| NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
        let symbols = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(symbol, label)| TickerSymbol(symbol.to_string(), label.to_string()))
                .collect()
        };

        Self {
            model_name: "Matrix192x16".to_string(),
            w: 0,
            h: 0,
            layout: LayoutMode::Auto,
            ticker_tz: chrono_tz::America::Toronto,

            fps: 60,
            pps_top: 40.0,
            pps_bot: 40.0,
            pps_single: 40.0,
            refresh_sec: 120,
            fresh_sec: 180,

            clock_24h: true,
            clock_show_seconds: false,
            clock_blink_colon: true,
            clock_color: "yellow".to_string(),
            clock_date_show: true,
            clock_date_fmt: "%a %b %d".to_string(),
            clock_date_color: "white".to_string(),

            time_preroll_enabled: true,
            time_preroll_sec: 15,
            preroll_style: PrerollStyle::Bigtime,
            preroll_color: "yellow".to_string(),
            preroll_pps: 40.0,

            market_open: hm(9, 30),
            market_close: hm(16, 0),

            maintenance_mode: false,
            maintenance_text: "SYSTEM MAINTENANCE  EXPECTED BACK SOON".to_string(),
            maintenance_scroll: true,
            maintenance_pps: 30.0,

            weather_rss_url: "https://weather.gc.ca/rss/warning/qc-147_e.xml".to_string(),
            weather_refresh_sec: 300,
            weather_announce_sec: 12,
            weather_timeout: 5.0,
            weather_include_watch: true,
            weather_force_active: false,
            weather_force_text: String::new(),
            weather_test_delay: 0,
            weather_warning_every_n_scrolls: 5,
            weather_warning_color: "red".to_string(),
            weather_advisory_every_n_scrolls: 10,
            weather_advisory_color: "yellow".to_string(),
            weather_sticky_sec: 12,
            weather_test_sticky_total: 60,
            weather_repeat_sec: 600,

            inject_message: String::new(),
            message_every: 5,
            message_row: MessageRow::Auto,
            message_color: "magenta".to_string(),
            message_test_force: false,

            night_mode_enabled: false,
            night_mode_start: hm(22, 0),
            night_mode_end: hm(7, 0),
            night_mode_dim_pct: 30,
            night_mode_speed_pct: 50,
            quick_dim_pct: 0,

            scoreboard_enabled: true,
            scoreboard_leagues: vec!["NHL".to_string(), "NFL".to_string()],
            scoreboard_nhl_teams: vec!["MTL".to_string()],
            scoreboard_nfl_teams: vec!["NE".to_string()],
            scoreboard_poll_cadence: 60,
            scoreboard_live_refresh: 45,
            scoreboard_pregame_window_min: 30,
            scoreboard_postgame_delay_min: 5,
            scoreboard_precedence: Precedence::Normal,
            scoreboard_include_others: false,
            scoreboard_only_my_teams: true,
            scoreboard_max_games: 2,
            scoreboard_test: false,
            scoreboard_test_league: "NHL".to_string(),
            scoreboard_test_home: "MTL".to_string(),
            scoreboard_test_away: "TOR".to_string(),
            scoreboard_test_duration: 0,

            override_mode: "OFF".to_string(),
            override_duration_min: 0,
            override_message_text: String::new(),

            score_alerts_enabled: true,
            score_alerts_nhl: true,
            score_alerts_nfl: true,
            score_alerts_my_teams_only: true,
            score_alerts_cycles: 2,
            score_alerts_queue_max: 4,
            score_alerts_flash_ms: 250,
            score_alerts_flash_colors: vec![
                "red".to_string(),
                "white".to_string(),
                "blue".to_string(),
            ],
            score_alerts_nfl_td_delta_min: 6,
            score_alerts_test: false,
            score_alerts_test_league: "NHL".to_string(),
            score_alerts_test_team: "MTL".to_string(),
            score_alerts_test_interval_sec: 12,

            tickers_top: symbols(&[
                ("^IXIC", "NAS"),
                ("^GSPC", "S&P"),
                ("^GSPTSE", "TSX"),
                ("CADUSD=X", "CAD/USD"),
                ("GC=F", "GOLD"),
            ]),
            tickers_bot: symbols(&[
                ("AAPL", ""),
                ("MSFT", ""),
                ("GOOGL", ""),
                ("AMZN", ""),
                ("NVDA", ""),
                ("TSLA", ""),
                ("META", ""),
                ("TSM", ""),
            ]),
            tickers_bot2: Vec::new(),
            holdings_enabled: false,
            holdings: HashMap::new(),

            demo_mode: false,
        }
    }
}

impl TickerConfig {
    /// Deserialise a snapshot from a JSON object, validating the result.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would leave the engine in a nonsensical state.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: ConfigKey, reason: &str| ConfigError::Invalid {
            key: key.name(),
            reason: reason.to_string(),
        };

        if self.fps == 0 {
            return Err(invalid(ConfigKey::Fps, "must be at least 1"));
        }
        for (key, pps) in [
            (ConfigKey::PpsTop, self.pps_top),
            (ConfigKey::PpsBot, self.pps_bot),
            (ConfigKey::PpsSingle, self.pps_single),
            (ConfigKey::PrerollPps, self.preroll_pps),
            (ConfigKey::MaintenancePps, self.maintenance_pps),
        ] {
            if !pps.is_finite() || pps < 0.0 {
                return Err(invalid(key, "must be a non-negative number"));
            }
        }
        for (key, pct) in [
            (ConfigKey::NightModeDimPct, self.night_mode_dim_pct),
            (ConfigKey::NightModeSpeedPct, self.night_mode_speed_pct),
            (ConfigKey::QuickDimPct, self.quick_dim_pct),
        ] {
            if pct > 100 {
                return Err(invalid(key, "must be a percentage between 0 and 100"));
            }
        }
        for (key, value, max) in [
            (ConfigKey::RefreshSec, self.refresh_sec, MAX_INTERVAL_SEC),
            (ConfigKey::FreshSec, self.fresh_sec, MAX_INTERVAL_SEC),
            (ConfigKey::TimePrerollSec, self.time_preroll_sec, MAX_PREROLL_SEC),
            (ConfigKey::WeatherRefreshSec, self.weather_refresh_sec, MAX_INTERVAL_SEC),
            (ConfigKey::WeatherAnnounceSec, self.weather_announce_sec, MAX_INTERVAL_SEC),
            (ConfigKey::WeatherTestDelay, self.weather_test_delay, MAX_INTERVAL_SEC),
            (ConfigKey::WeatherStickySec, self.weather_sticky_sec, MAX_INTERVAL_SEC),
            (ConfigKey::WeatherTestStickyTotal, self.weather_test_sticky_total, MAX_INTERVAL_SEC),
            (ConfigKey::WeatherRepeatSec, self.weather_repeat_sec, MAX_INTERVAL_SEC),
            (ConfigKey::ScoreboardPollCadence, self.scoreboard_poll_cadence, MAX_INTERVAL_SEC),
            (ConfigKey::ScoreboardLiveRefresh, self.scoreboard_live_refresh, MAX_INTERVAL_SEC),
            (ConfigKey::ScoreboardTestDuration, self.scoreboard_test_duration, MAX_INTERVAL_SEC),
            (ConfigKey::ScoreAlertsTestIntervalSec, self.score_alerts_test_interval_sec, MAX_INTERVAL_SEC),
            (ConfigKey::ScoreAlertsFlashMs, self.score_alerts_flash_ms, MAX_FLASH_MS),
            (ConfigKey::OverrideDurationMin, self.override_duration_min, MAX_OVERRIDE_MIN),
        ] {
            if value > max {
                return Err(invalid(key, &format!("must be at most {max}")));
            }
        }
        for (key, minutes) in [
            (ConfigKey::ScoreboardPregameWindowMin, self.scoreboard_pregame_window_min),
            (ConfigKey::ScoreboardPostgameDelayMin, self.scoreboard_postgame_delay_min),
        ] {
            if !(0..=MAX_GAME_WINDOW_MIN).contains(&minutes) {
                return Err(invalid(key, &format!("must be between 0 and {MAX_GAME_WINDOW_MIN}")));
            }
        }
        if self.score_alerts_queue_max == 0 {
            return Err(invalid(ConfigKey::ScoreAlertsQueueMax, "must be at least 1"));
        }
        if self.score_alerts_flash_colors.is_empty() {
            return Err(invalid(ConfigKey::ScoreAlertsFlashColors, "must name at least one colour"));
        }
        Ok(())
    }

    /// Effective panel size: explicit `W`/`H`, else inferred from the model name.
    pub fn panel_size(&self) -> (usize, usize) {
        if self.w > 0 && self.h > 0 {
            return (self.w as usize, self.h as usize);
        }
        let model = self.model_name.to_lowercase();
        if model.contains("96x32") {
            (96, 32)
        } else if model.contains("192x16") {
            (192, 16)
        } else {
            (96, 16)
        }
    }

    /// Whether the panel is split into a top and bottom row.
    pub fn is_dual(&self) -> bool {
        match self.layout {
            LayoutMode::Single => false,
            LayoutMode::Dual => true,
            LayoutMode::Auto => self.panel_size().1 >= 16,
        }
    }

    /// Union of every configured ticker symbol, sorted and de-duplicated.
    pub fn all_symbols(&self) -> Vec<String> {
        use itertools::Itertools;

        self.tickers_top
            .iter()
            .chain(&self.tickers_bot)
            .chain(&self.tickers_bot2)
            .map(|ticker| ticker.symbol().to_string())
            .sorted()
            .dedup()
            .collect()
    }

    /// Teams the operator follows in the given league.
    pub fn my_teams(&self, league: crate::types::League) -> &[String] {
        match league {
            crate::types::League::Nhl => &self.scoreboard_nhl_teams,
            crate::types::League::Nfl => &self.scoreboard_nfl_teams,
        }
    }
}

/// `"HH:MM"` (de)serialisation for [`NaiveTime`] config values.
mod hhmm {
    use super::*;

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(serde::de::Error::custom)
    }
}

/// Lists may be given either as a JSON array or a comma-separated string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    List(Vec<String>),
    Csv(String),
}

impl ListOrCsv {
    fn into_items(self) -> Vec<String> {
        let items = match self {
            ListOrCsv::List(items) => items,
            ListOrCsv::Csv(raw) => raw.split(',').map(str::to_string).collect(),
        };
        items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    }
}

fn de_upper_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(ListOrCsv::deserialize(deserializer)?
        .into_items()
        .into_iter()
        .map(|item| item.to_uppercase())
        .collect())
}

fn de_lower_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(ListOrCsv::deserialize(deserializer)?
        .into_items()
        .into_iter()
        .map(|item| item.to_lowercase())
        .collect())
}
