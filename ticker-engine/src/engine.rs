//! The orchestrator.
//!
//! A [`Ticker`] owns every piece of display-side state: the config snapshot, the worker
//! supervisor, the local caches and the sub-state machines. Each [`tick`](Ticker::tick) runs
//! the same fixed sequence:
//!
//! 1. Poll the config store and apply any [`ChangeSet`], then convert the instant to the sign's
//!    wall-clock time in `TICKER_TZ`.
//! 2. Expire the override.
//! 3. Drain the worker queues into the caches.
//! 4. Detect score changes and queue alerts.
//! 5. Run the weather test injector.
//! 6. Promote the next score alert.
//! 7. Step the [`DisplayFsm`].
//! 8. Render by precedence: exclusive override, maintenance, score alert, display state.
//! 9. Dim, unless the override is BRIGHT.
//!
//! Nothing in a tick blocks; the caller paces the loop and hands [`Ticker::frame`] to the
//! panel.

use crate::{
    alerts::{GoalFlash, ScoreAlertQueue, ScoreDeltaDetector, Side, TestAlertGenerator, flash_palette},
    config::{Category, ChangeSet, ConfigKey, ConfigStore, MAX_FLASH_MS, TickerConfig, TickerSymbol},
    display::{DisplayFsm, DisplayState, FsmInput, PrerollPresentation, preroll_presentation},
    error::ConfigError,
    overrides::{OverrideController, OverrideMode},
    render::{Bitmap, Font, FrameBuffer, Rgb, TextRenderer, parse_color},
    schedule::{self, MarketEventKind},
    scroll::{
        MARKET_CLOSE_PASSES, MARKET_OPEN_PASSES, RowContext, RowId, ScrollCursor, ScrollEngine, Segment,
        clock_segments, ticker_segments,
    },
    types::{GamePhase, GameState, MarketCache, MarketState, ScoreboardCache, Severity, WorkerMessage},
    weather::{WeatherBanner, WeatherBannerFsm},
    workers::WorkerSupervisor,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::Value;
use std::{fmt::Write, sync::Arc};
use tracing::{debug, info};

const FALLBACK_DATE_FMT: &str = "%a %b %d";

/// What was drawn on a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Presentation {
    Override(OverrideMode),
    Maintenance,
    ScoreAlert,
    Preroll(PrerollPresentation),
    Scoreboard,
    Ticker { weather_pass: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub state: DisplayState,
    /// Set when the display state changed on this tick.
    pub transition: Option<DisplayState>,
    pub presentation: Presentation,
    pub dim_scale: f64,
}

pub struct Ticker {
    store: ConfigStore,
    config: Arc<TickerConfig>,
    supervisor: WorkerSupervisor,
    renderer: Box<dyn TextRenderer>,
    frame: FrameBuffer,

    market: MarketCache,
    scoreboard: ScoreboardCache,
    weather: WeatherBannerFsm,

    fsm: DisplayFsm,
    scroll: ScrollEngine,
    overlay: ScrollCursor,
    overrides: OverrideController,

    alerts: ScoreAlertQueue,
    deltas: ScoreDeltaDetector,
    test_alerts: TestAlertGenerator,
    goal_flash: GoalFlash,

    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("state", &self.fsm.state())
            .field("override", &self.overrides.mode())
            .field("frame", &(self.frame.width(), self.frame.height()))
            .finish_non_exhaustive()
    }
}

impl Ticker {
    pub fn new(
        store: ConfigStore,
        supervisor: WorkerSupervisor,
        renderer: Box<dyn TextRenderer>,
        instant: DateTime<Utc>,
    ) -> Self {
        let config = Arc::new(store.config().clone());
        let (width, height) = config.panel_size();
        let now = schedule::sign_time(&config, instant);

        let mut scroll = ScrollEngine::new(width);
        scroll.configure(&config);

        let mut overrides = OverrideController::new();
        if !config.override_mode.trim().is_empty() {
            overrides.apply_config(&config, now);
        }

        info!(width, height, dual = config.is_dual(), "ticker initialised");

        Self {
            config: Arc::clone(&config),
            store,
            supervisor,
            renderer,
            frame: FrameBuffer::new(width, height),
            market: MarketCache::default(),
            scoreboard: ScoreboardCache::default(),
            weather: WeatherBannerFsm::new(),
            fsm: DisplayFsm::new(now),
            scroll,
            overlay: ScrollCursor::new(width),
            overrides,
            alerts: ScoreAlertQueue::new(config.score_alerts_queue_max),
            deltas: ScoreDeltaDetector::new(),
            test_alerts: TestAlertGenerator::default(),
            goal_flash: GoalFlash::default(),
            started_at: instant,
        }
    }

    /// Spawn the data workers for the current config.
    pub fn start(&mut self) {
        self.supervisor.start(&self.config);
    }

    pub fn config(&self) -> &TickerConfig {
        &self.config
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn state(&self) -> DisplayState {
        self.fsm.state()
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    /// Install an operator override outside the config document.
    pub fn set_override(
        &mut self,
        mode: OverrideMode,
        duration_minutes: u64,
        payload: &str,
        instant: DateTime<Utc>,
    ) {
        let now = schedule::sign_time(&self.config, instant);
        self.overrides.set(mode, duration_minutes, payload, now);
    }

    pub fn clear_override(&mut self) {
        self.overrides.clear();
    }

    /// Editor contract: validate and persist `patch`, then apply it immediately.
    pub fn write_config(&mut self, patch: Value, instant: DateTime<Utc>) -> Result<ChangeSet, ConfigError> {
        let changes = self.store.write_patch(patch)?;
        if !changes.is_empty() {
            self.apply_changes(&changes, instant);
        }
        Ok(changes)
    }

    /// Stop every worker within the supervisor's bounded grace period.
    pub async fn shutdown(&mut self) {
        self.supervisor.shutdown().await;
    }

    /// Advance the display by `dt` seconds and compose the frame for `instant`.
    pub fn tick(&mut self, instant: DateTime<Utc>, dt: f64) -> TickReport {
        if let Some(changes) = self.store.poll() {
            self.apply_changes(&changes, instant);
        }
        let config = Arc::clone(&self.config);
        let now = schedule::sign_time(&config, instant);

        self.overrides.expire(now);

        if self.drain(now) {
            self.observe_scores(&config, now);
        }
        if let Some(event) = self.test_alerts.poll(&config, now) {
            self.alerts.push(event);
        }

        let started_at = schedule::sign_time(&config, self.started_at);
        self.weather.tick_test_injector(&config, started_at, now);

        let alert_active = if config.score_alerts_enabled {
            self.alerts
                .promote(config.score_alerts_cycles, flash_period(&config), now)
                .is_some()
        } else {
            self.alerts.clear();
            false
        };

        let transition = self.fsm.step(&config, FsmInput {
            now,
            override_active: self.overrides.is_active(),
            alert_active,
            any_live: self.scoreboard.any_live(),
        });
        if transition.is_some() {
            self.overlay.restart(self.frame.width());
        }

        self.arm_market_banner(&config, now);

        self.frame.clear();
        let mode = self.overrides.mode();
        let presentation = if mode.is_exclusive() {
            self.render_override(mode, &config, now, dt);
            Presentation::Override(mode)
        } else if config.maintenance_mode {
            self.render_maintenance(&config, dt);
            Presentation::Maintenance
        } else if alert_active && self.render_alert(&config, now) {
            Presentation::ScoreAlert
        } else {
            match self.fsm.state() {
                DisplayState::Preroll(reason) => {
                    let preroll = preroll_presentation(reason, &config, now);
                    self.render_preroll(preroll, &config, now, dt);
                    Presentation::Preroll(preroll)
                }
                DisplayState::Scoreboard => {
                    self.render_scoreboard(now);
                    Presentation::Scoreboard
                }
                DisplayState::Ticker => Presentation::Ticker {
                    weather_pass: self.render_ticker(&config, now, dt),
                },
            }
        };

        let dim_scale = if mode == OverrideMode::Bright {
            1.0
        } else {
            schedule::resolve_dim_scale(&config, now)
        };
        self.frame.dim(dim_scale);

        TickReport {
            state: self.fsm.state(),
            transition,
            presentation,
            dim_scale,
        }
    }

    fn apply_changes(&mut self, changes: &ChangeSet, instant: DateTime<Utc>) {
        self.config = Arc::new(self.store.config().clone());
        let config = Arc::clone(&self.config);
        let now = schedule::sign_time(&config, instant);

        if changes.contains(Category::Layout) {
            let (width, height) = config.panel_size();
            info!(width, height, dual = config.is_dual(), "layout changed");
            self.frame.resize(width, height);
            self.scroll.reset(width);
            self.overlay = ScrollCursor::new(width);
        }
        if changes.contains(Category::Dim) {
            debug!("dimming settings changed");
        }
        if changes.keys.contains(&ConfigKey::TickerTz) {
            info!(tz = %config.ticker_tz, %now, "sign time zone changed");
            self.fsm.realign_hour(now);
        }

        let outcome = self.supervisor.on_config_diff(changes, &config);
        if outcome.reset_cursors {
            self.scroll.reset(self.frame.width());
        }
        if outcome.reset_weather {
            self.weather.reset();
        }
        if outcome.clear_scoreboard {
            self.scoreboard.clear();
            self.deltas.clear();
        }

        if changes.contains(Category::Override) {
            self.overrides.apply_config(&config, now);
        }
        if changes.contains(Category::Message) {
            self.scroll.configure(&config);
        }
        self.alerts.set_capacity(config.score_alerts_queue_max);
    }

    /// Fold every pending worker message into the caches. Returns `true` if scoreboard data arrived.
    fn drain(&mut self, now: NaiveDateTime) -> bool {
        let mut scoreboard_changed = false;
        for message in self.supervisor.drain_nonblocking() {
            match message {
                WorkerMessage::Market(update) => self.market.apply(update, now),
                WorkerMessage::Weather(snapshot) => {
                    self.weather.on_snapshot(&snapshot);
                }
                WorkerMessage::Scoreboard(snapshot) => {
                    self.scoreboard.apply(snapshot);
                    scoreboard_changed = true;
                }
                WorkerMessage::ScoreboardStatus(status) => self.scoreboard.game_today = status.game_today,
            }
        }
        scoreboard_changed
    }

    fn observe_scores(&mut self, config: &TickerConfig, now: NaiveDateTime) {
        self.goal_flash.observe(&self.scoreboard, now);

        let events = self.deltas.detect(&self.scoreboard, config);
        if config.score_alerts_enabled {
            for event in events {
                self.alerts.push(event);
            }
        }
    }

    fn arm_market_banner(&mut self, config: &TickerConfig, now: NaiveDateTime) {
        let Some(kind) = schedule::market_event_window(config, now) else {
            return;
        };
        match kind {
            MarketEventKind::Open if self.market.state == MarketState::Regular => {
                self.scroll.arm_market_banner(kind, MARKET_OPEN_PASSES, now.date());
            }
            MarketEventKind::Close => {
                self.scroll.arm_market_banner(kind, MARKET_CLOSE_PASSES, now.date());
            }
            MarketEventKind::Open => {}
        }
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    fn row_height(&self, config: &TickerConfig) -> usize {
        if config.is_dual() {
            self.frame.height() / 2
        } else {
            self.frame.height()
        }
    }

    fn draw_centered(&mut self, text: &str, color: Rgb, font: Font) {
        let bitmap = self.renderer.render(text, color, self.frame.height(), font);
        self.frame.blit_centered(&bitmap);
    }

    /// Scroll `segments` along the top edge using the overlay cursor.
    fn draw_overlay(&mut self, segments: &[Segment], row_height: usize, pps: f64, dt: f64) {
        let full_height = self.frame.height();
        let bitmaps = segments
            .iter()
            .map(|segment| segment.render(self.renderer.as_ref(), row_height, full_height))
            .collect::<Vec<_>>();
        let total = bitmaps.iter().map(|bitmap| bitmap.width).sum::<usize>();

        self.overlay.advance(dt, pps, total, self.frame.width());
        self.frame.blit_run(&bitmaps, self.overlay.pixel_x(), 0);
    }

    fn render_override(&mut self, mode: OverrideMode, config: &TickerConfig, now: NaiveDateTime, dt: f64) {
        match mode {
            OverrideMode::Message => {
                let mut segments = clock_segments(config, &self.market, &self.scoreboard, now);
                segments.push(Segment::text(format!("{}  ", self.overrides.payload()), Rgb::YELLOW));
                let pps = if config.is_dual() { config.pps_top } else { config.pps_single };
                let pps = schedule::resolve_scroll_speed(config, now, pps);
                self.draw_overlay(&segments, self.row_height(config), pps, dt);
            }
            OverrideMode::Maint => self.render_maintenance(config, dt),
            OverrideMode::Clock => self.render_clock(config, now, parse_color(&config.clock_color), true),
            OverrideMode::Scoreboard => {
                if !config.scoreboard_enabled {
                    self.draw_centered("SCOREBOARD DISABLED", Rgb::GREY, Font::Row);
                } else if config.scoreboard_test && !self.scoreboard.any_live() {
                    self.draw_centered("SCOREBOARD TEST MODE - LOADING...", Rgb::YELLOW, Font::Row);
                } else {
                    self.render_scoreboard(now);
                }
            }
            OverrideMode::Off | OverrideMode::Bright => {}
        }
    }

    fn render_maintenance(&mut self, config: &TickerConfig, dt: f64) {
        let text = config.maintenance_text.trim();
        if config.maintenance_scroll {
            let segment = Segment::big(format!("{text}   "), Rgb::RED);
            let height = self.frame.height();
            self.draw_overlay(&[segment], height, config.maintenance_pps, dt);
        } else {
            self.draw_centered(text, Rgb::RED, Font::Big);
        }
    }

    /// Centred clock; with `with_date`, a date line under it on panels tall enough.
    fn render_clock(&mut self, config: &TickerConfig, now: NaiveDateTime, color: Rgb, with_date: bool) {
        let time = match (config.clock_24h, config.clock_show_seconds) {
            (true, true) => now.format("%H:%M:%S"),
            (true, false) => now.format("%H:%M"),
            (false, true) => now.format("%-I:%M:%S"),
            (false, false) => now.format("%-I:%M"),
        }
        .to_string();

        let height = self.frame.height();
        if !(with_date && config.clock_date_show && height >= 16) {
            self.draw_centered(&time, color, Font::Big);
            return;
        }

        // A malformed user format must not take the frame down
        let mut date = String::new();
        if write!(date, "{}", now.format(&config.clock_date_fmt)).is_err() {
            debug!(format = %config.clock_date_fmt, "invalid date format, using default");
            date = now.format(FALLBACK_DATE_FMT).to_string();
        }

        let row = height / 2;
        let width = self.frame.width() as i32;
        let top = self.renderer.render(&time, color, row, Font::Row);
        let bottom = self
            .renderer
            .render(&date, parse_color(&config.clock_date_color), row, Font::Row);
        self.frame.blit(&top, (width - top.width as i32).max(0) / 2, 0);
        self.frame.blit(&bottom, (width - bottom.width as i32).max(0) / 2, row as i32);
    }

    /// Score alert in the current flash colour; the league's score word above it on tall panels.
    fn render_alert(&mut self, config: &TickerConfig, now: NaiveDateTime) -> bool {
        let palette = flash_palette(config);
        let Some((text, color)) = self.alerts.frame(&palette, flash_period(config), now) else {
            return false;
        };
        let word = self.alerts.active().map(|alert| alert.league.score_word());

        let height = self.frame.height();
        match word {
            Some(word) if height >= 16 => {
                let row = height / 2;
                let width = self.frame.width() as i32;
                let top = self.renderer.render(&format!("{word}!"), color, row, Font::Row);
                let bottom = self.renderer.render(&text, color, row, Font::Row);
                self.frame.blit(&top, (width - top.width as i32).max(0) / 2, 0);
                self.frame.blit(&bottom, (width - bottom.width as i32).max(0) / 2, row as i32);
            }
            _ => self.draw_centered(&text, color, Font::Big),
        }

        self.alerts.retire_finished();
        true
    }

    fn render_preroll(&mut self, preroll: PrerollPresentation, config: &TickerConfig, now: NaiveDateTime, dt: f64) {
        let color = parse_color(&config.preroll_color);
        match preroll {
            PrerollPresentation::StaticClock => self.render_clock(config, now, color, false),
            PrerollPresentation::ScrollingClock => {
                let text = if config.clock_24h {
                    now.format("%H:%M   ")
                } else {
                    now.format("%-I:%M   ")
                };
                let segment = Segment::big(text.to_string(), color);
                let height = self.frame.height();
                let pps = schedule::resolve_scroll_speed(config, now, config.preroll_pps);
                self.draw_overlay(&[segment], height, pps, dt);
            }
            PrerollPresentation::MarketBanner(kind) => {
                self.draw_centered(kind.headline(), parse_color(kind.color()), Font::Big);
            }
        }
    }

    fn render_scoreboard(&mut self, now: NaiveDateTime) {
        match self.scoreboard.first_live().map(|(_, game)| game.clone()) {
            Some(game) => self.render_game(&game, now),
            None => self.draw_centered("NO LIVE GAMES", Rgb::GREY, Font::Row),
        }
    }

    /// Full-height scoreboard: away left, home right, period and clock below.
    fn render_game(&mut self, game: &GameState, now: NaiveDateTime) {
        let flash = self.goal_flash.frame(now);
        let score_color = |side: Side| match flash {
            Some((flashing, color)) if flashing == side => color,
            _ => Rgb::WHITE,
        };

        let height = self.frame.height();
        let width = self.frame.width() as i32;
        let row = if height >= 16 { height / 2 } else { height };
        let render = |text: &str, color: Rgb, font: Font| self.renderer.render(text, color, row, font);

        let away = [
            render(&format!("{} ", game.away.code), Rgb::WHITE, Font::Row),
            render(&game.away.score.to_string(), score_color(Side::Away), Font::Scoreboard),
        ];
        let home = [
            render(&game.home.score.to_string(), score_color(Side::Home), Font::Scoreboard),
            render(&format!(" {}", game.home.code), Rgb::WHITE, Font::Row),
        ];
        let status = (height >= 16).then(|| {
            let text = match game.state {
                GamePhase::Live => match game.period.parse::<u32>() {
                    Ok(period) => format!("P{period} {}", game.clock),
                    Err(_) => format!("{} {}", game.period, game.clock),
                },
                GamePhase::Final => "FINAL".to_string(),
                GamePhase::Pregame => game
                    .minutes_until_start
                    .map_or_else(|| "PREGAME".to_string(), |minutes| format!("IN {minutes} MIN")),
            };
            render(&text, Rgb::YELLOW, Font::Row)
        });

        let home_width = home.iter().map(|bitmap: &Bitmap| bitmap.width).sum::<usize>() as i32;
        self.frame.blit_run(&away, 0, 0);
        self.frame.blit_run(&home, (width - home_width).max(0), 0);
        if let Some(status) = status {
            self.frame
                .blit(&status, (width - status.width as i32).max(0) / 2, row as i32);
        }
    }

    /// Scroll the ticker rows. Returns whether the primary row is on a weather pass.
    fn render_ticker(&mut self, config: &TickerConfig, now: NaiveDateTime, dt: f64) -> bool {
        let height = self.frame.height();
        let dual = config.is_dual();
        let primary = if dual { RowId::Top } else { RowId::Single };
        let row_height = self.row_height(config);

        let clock = clock_segments(config, &self.market, &self.scoreboard, now);
        let message = Some(config.inject_message.trim())
            .filter(|text| !text.is_empty())
            .map(|text| Segment::text(format!("{text}  "), parse_color(&config.message_color)));
        let weather = match self.weather.banner() {
            WeatherBanner::Active { message, severity } if severity.is_displayed() => {
                Some(Segment::big(format!("{message}  "), weather_color(config, *severity)))
            }
            _ => None,
        };

        let show = self.weather.should_show(self.scroll.completed(primary), config);
        let weather_pass = self.scroll.update_weather_pass(primary, show);

        let mut rows = Vec::with_capacity(2);
        if dual {
            rows.push((RowId::Top, config.pps_top, ticker_segments(&config.tickers_top, &self.market, config)));
            if !weather_pass {
                let bottom = if self.scroll.completed(RowId::Bottom) % 2 == 1 && !config.tickers_bot2.is_empty() {
                    &config.tickers_bot2
                } else {
                    &config.tickers_bot
                };
                rows.push((RowId::Bottom, config.pps_bot, ticker_segments(bottom, &self.market, config)));
            }
        } else {
            let combined = config
                .tickers_top
                .iter()
                .chain(&config.tickers_bot)
                .cloned()
                .collect::<Vec<TickerSymbol>>();
            rows.push((RowId::Single, config.pps_single, ticker_segments(&combined, &self.market, config)));
        }

        let no_clock: &[Segment] = &[];
        for (row, pps, content) in rows {
            let context = RowContext {
                clock: if row.is_primary() { &clock[..] } else { no_clock },
                content: &content,
                message: message.as_ref(),
                weather: weather.as_ref(),
            };
            let segments = self.scroll.compose_segments(row, &context);

            let (y, segment_height) = match row {
                RowId::Bottom => (row_height, row_height),
                _ if weather_pass => (0, height),
                _ => (0, row_height),
            };
            let bitmaps = segments
                .iter()
                .map(|segment| segment.render(self.renderer.as_ref(), segment_height, height))
                .collect::<Vec<_>>();
            let total = bitmaps.iter().map(|bitmap| bitmap.width).sum::<usize>();

            let pps = schedule::resolve_scroll_speed(config, now, pps);
            self.scroll.advance(row, dt, pps, total);
            let x = self.scroll.cursor(row).pixel_x();
            self.frame.blit_run(&bitmaps, x, y as i32);
        }

        weather_pass
    }
}

fn flash_period(config: &TickerConfig) -> Duration {
    Duration::milliseconds(config.score_alerts_flash_ms.clamp(50, MAX_FLASH_MS) as i64)
}

fn weather_color(config: &TickerConfig, severity: Severity) -> Rgb {
    match severity {
        Severity::Warning => parse_color(&config.weather_warning_color),
        _ => parse_color(&config.weather_advisory_color),
    }
}
