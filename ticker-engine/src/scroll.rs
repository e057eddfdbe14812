//! Per-row horizontal scrolling.
//!
//! Each physical row owns a [`ScrollCursor`]. A row is an ordered run of [`Segment`]s: the
//! clock/status segment, at most one banner, then the row's ticker content. When the run has
//! scrolled fully off the left edge the row completes a pass, which drives the periodic
//! message injection and the one-shot market banners.

use crate::{
    config::{MessageRow, TickerConfig, TickerSymbol},
    render::{Bitmap, Font, Rgb, TextRenderer, parse_color},
    schedule::{self, MarketEventKind},
    types::{MarketCache, MarketState, ScoreboardCache},
};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

/// Passes the "MARKET OPEN" banner rides along for.
pub const MARKET_OPEN_PASSES: u32 = 5;
/// Passes the "MARKET CLOSED" banner rides along for.
pub const MARKET_CLOSE_PASSES: u32 = 1;

const DOT_WIDTH: usize = 2;
const DOT_SPACING: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowId {
    Single,
    Top,
    Bottom,
}

impl RowId {
    /// Rows that carry the clock and the market banners.
    pub fn is_primary(&self) -> bool {
        !matches!(self, RowId::Bottom)
    }

    pub fn carries_message(&self, setting: MessageRow) -> bool {
        matches!(
            (self, setting),
            (RowId::Single, MessageRow::Single | MessageRow::Auto)
                | (RowId::Top, MessageRow::Top | MessageRow::Both | MessageRow::Auto)
                | (RowId::Bottom, MessageRow::Bottom | MessageRow::Both)
        )
    }
}

/// Horizontal position of one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollCursor {
    position: f64,
    total_width: usize,
    completed: u64,
}

impl ScrollCursor {
    pub fn new(frame_width: usize) -> Self {
        Self {
            position: frame_width as f64,
            total_width: 1,
            completed: 0,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn total_width(&self) -> usize {
        self.total_width
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Column the row is drawn at.
    ///
    /// `ceil(position - 0.5)` flips at the same half-pixel boundary as rounding but never moves
    /// right while `position` decreases.
    pub fn pixel_x(&self) -> i32 {
        (self.position - 0.5).ceil() as i32
    }

    /// Start the row over at the right edge without counting a pass.
    pub fn restart(&mut self, frame_width: usize) {
        self.position = frame_width as f64;
    }

    /// Move left by `pps * dt`. Returns `true` when the run has left the screen, in which case
    /// the pass is counted and the row restarts at the right edge.
    pub fn advance(&mut self, dt: f64, pps: f64, total_width: usize, frame_width: usize) -> bool {
        self.total_width = total_width.max(1);
        self.position -= pps.max(0.0) * dt.max(0.0);

        if self.position < -(self.total_width as f64) {
            self.completed += 1;
            self.position = frame_width as f64;
            return true;
        }
        false
    }
}

/// One piece of a scrolling row, rasterised on demand.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text { text: String, color: Rgb, font: Font },
    /// Market status indicator drawn in front of the clock.
    StatusDot(Rgb),
}

impl Segment {
    pub fn text(text: impl Into<String>, color: Rgb) -> Self {
        Segment::Text {
            text: text.into(),
            color,
            font: Font::Row,
        }
    }

    /// Full-height text, e.g. the weather banner in dual layout.
    pub fn big(text: impl Into<String>, color: Rgb) -> Self {
        Segment::Text {
            text: text.into(),
            color,
            font: Font::Big,
        }
    }

    /// Rasterise at `row_height`, or `full_height` for non-row fonts.
    pub fn render(&self, renderer: &dyn TextRenderer, row_height: usize, full_height: usize) -> Bitmap {
        match self {
            Segment::Text { text, color, font } => {
                let height = match font {
                    Font::Row => row_height,
                    Font::Big | Font::Scoreboard => full_height,
                };
                renderer.render(text, *color, height, *font)
            }
            Segment::StatusDot(color) => {
                let mut bitmap = Bitmap::new(DOT_WIDTH + DOT_SPACING, row_height);
                let top = (row_height / 2).saturating_sub(1);
                for x in 0..DOT_WIDTH {
                    for y in top..top + 2 {
                        bitmap.set(x, y, *color);
                    }
                }
                bitmap
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text { text, .. } => Some(text),
            Segment::StatusDot(_) => None,
        }
    }
}

/// Inputs for composing one row.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowContext<'a> {
    pub clock: &'a [Segment],
    pub content: &'a [Segment],
    pub message: Option<&'a Segment>,
    pub weather: Option<&'a Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OneShotBanner {
    kind: MarketEventKind,
    remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct MessageSchedule {
    enabled: bool,
    row: MessageRow,
    every: u64,
    test_force: bool,
}

/// Cursor and pass bookkeeping for every row.
#[derive(Debug, Clone)]
pub struct ScrollEngine {
    frame_width: usize,
    cursors: BTreeMap<RowId, ScrollCursor>,
    message_due: BTreeSet<RowId>,
    message: MessageSchedule,
    one_shot: Option<OneShotBanner>,
    armed: HashSet<(NaiveDate, MarketEventKind)>,
    weather_pass: bool,
}

impl ScrollEngine {
    pub fn new(frame_width: usize) -> Self {
        Self {
            frame_width,
            cursors: BTreeMap::new(),
            message_due: BTreeSet::new(),
            message: MessageSchedule::default(),
            one_shot: None,
            armed: HashSet::new(),
            weather_pass: false,
        }
    }

    /// Pick up the message injection keys.
    pub fn configure(&mut self, config: &TickerConfig) {
        self.message = MessageSchedule {
            enabled: !config.inject_message.trim().is_empty(),
            row: config.message_row,
            every: config.message_every.max(1),
            test_force: config.message_test_force,
        };
    }

    /// Restart every row at the right edge with zeroed counters.
    pub fn reset(&mut self, frame_width: usize) {
        debug!(frame_width, "scroll cursors reset");
        self.frame_width = frame_width;
        self.cursors.clear();
        self.message_due.clear();
        self.weather_pass = false;
    }

    pub fn cursor(&mut self, row: RowId) -> &ScrollCursor {
        let frame_width = self.frame_width;
        self.cursors
            .entry(row)
            .or_insert_with(|| ScrollCursor::new(frame_width))
    }

    pub fn completed(&self, row: RowId) -> u64 {
        self.cursors.get(&row).map_or(0, ScrollCursor::completed)
    }

    /// Whether the row's current pass carries the injected message.
    pub fn message_due(&self, row: RowId) -> bool {
        self.message.enabled
            && row.carries_message(self.message.row)
            && (self.message.test_force || self.message_due.contains(&row))
    }

    pub fn is_weather_pass(&self) -> bool {
        self.weather_pass
    }

    /// Market banner currently riding along the primary row.
    pub fn one_shot(&self) -> Option<MarketEventKind> {
        self.one_shot.map(|banner| banner.kind)
    }

    /// Arm a market banner for `passes` passes, at most once per `(date, kind)`.
    pub fn arm_market_banner(&mut self, kind: MarketEventKind, passes: u32, date: NaiveDate) -> bool {
        self.armed.retain(|(armed_date, _)| *armed_date == date);
        if !self.armed.insert((date, kind)) {
            return false;
        }
        info!(event = %kind, passes, "market banner armed");
        self.one_shot = Some(OneShotBanner {
            kind,
            remaining: passes.max(1),
        });
        true
    }

    /// Toggle the weather pass on the primary row.
    ///
    /// Starting a pass restarts the row at the right edge; it ends on the row's next completion
    /// or as soon as the banner is no longer due.
    pub fn update_weather_pass(&mut self, row: RowId, should_show: bool) -> bool {
        if should_show && !self.weather_pass {
            self.weather_pass = true;
            let frame_width = self.frame_width;
            self.cursors
                .entry(row)
                .or_insert_with(|| ScrollCursor::new(frame_width))
                .restart(frame_width);
            info!(?row, "weather pass started");
        } else if !should_show && self.weather_pass {
            self.weather_pass = false;
        }
        self.weather_pass
    }

    /// Ordered segments for `row` this tick: clock, at most one banner, content.
    ///
    /// During a weather pass the primary row carries only the clock and the weather banner.
    pub fn compose_segments(&self, row: RowId, context: &RowContext<'_>) -> Vec<Segment> {
        let mut segments = context.clock.to_vec();

        if row.is_primary() && self.weather_pass {
            if let Some(weather) = context.weather {
                segments.push(weather.clone());
                return segments;
            }
        }

        let banner = self
            .one_shot
            .filter(|_| row.is_primary())
            .map(|banner| market_banner_segment(banner.kind))
            .or_else(|| {
                context
                    .message
                    .filter(|_| self.message_due(row))
                    .cloned()
            });
        segments.extend(banner);
        segments.extend(context.content.iter().cloned());
        segments
    }

    /// Advance `row` and run the completion bookkeeping. Returns `true` on completion.
    pub fn advance(&mut self, row: RowId, dt: f64, pps: f64, total_width: usize) -> bool {
        let frame_width = self.frame_width;
        let cursor = self
            .cursors
            .entry(row)
            .or_insert_with(|| ScrollCursor::new(frame_width));
        if !cursor.advance(dt, pps, total_width, frame_width) {
            return false;
        }
        let completed = cursor.completed();

        if row.is_primary() {
            if self.weather_pass {
                self.weather_pass = false;
            } else if let Some(banner) = self.one_shot.as_mut() {
                banner.remaining -= 1;
                if banner.remaining == 0 {
                    debug!(event = %banner.kind, "market banner finished");
                    self.one_shot = None;
                }
            }
        }

        if completed % self.message.every.max(1) == 0 {
            self.message_due.insert(row);
        } else {
            self.message_due.remove(&row);
        }
        true
    }
}

/// `"*** MARKET OPEN *** "` style banner for a market event.
pub fn market_banner_segment(kind: MarketEventKind) -> Segment {
    Segment::text(format!("*** {} *** ", kind.headline()), parse_color(kind.color()))
}

/// `HH:MM` (or `h:MM`) plus two spaces; the colon blanks on even seconds when blinking.
pub fn clock_text(now: NaiveDateTime, clock_24h: bool, blink_colon: bool) -> String {
    let mut text = if clock_24h {
        now.format("%H:%M").to_string()
    } else {
        now.format("%-I:%M").to_string()
    };
    if blink_colon && now.second() % 2 == 0 {
        text = text.replace(':', " ");
    }
    text.push_str("  ");
    text
}

/// Status dot colour, first match wins: stale market data, game day, pre-market, regular
/// session, otherwise closed.
pub fn status_dot_color(
    config: &TickerConfig,
    market: &MarketCache,
    scoreboard: &ScoreboardCache,
    now: NaiveDateTime,
) -> Rgb {
    if !market.last_result_ok || !market.is_fresh(now, config.fresh_sec) {
        Rgb::RED
    } else if scoreboard.game_today || scoreboard.any_games() {
        Rgb::GAME_DAY
    } else if schedule::is_premarket(config, now) {
        Rgb::YELLOW
    } else if market.state == MarketState::Regular {
        Rgb::GREEN
    } else {
        Rgb::GREY
    }
}

/// Status dot followed by the clock text.
pub fn clock_segments(
    config: &TickerConfig,
    market: &MarketCache,
    scoreboard: &ScoreboardCache,
    now: NaiveDateTime,
) -> Vec<Segment> {
    vec![
        Segment::StatusDot(status_dot_color(config, market, scoreboard, now)),
        Segment::text(
            clock_text(now, config.clock_24h, config.clock_blink_colon),
            parse_color(&config.clock_color),
        ),
    ]
}

pub fn format_compact(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("{:.1}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.1}k", value / 1_000.0)
    } else {
        format!("{value:.1}")
    }
}

pub fn format_currency_compact(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("${:.1}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("${:.1}k", value / 1_000.0)
    } else {
        format!("${value:.0}")
    }
}

/// Label and value segments for each ticker, or `"Waiting... "` for an empty row.
pub fn ticker_segments(tickers: &[TickerSymbol], market: &MarketCache, config: &TickerConfig) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(tickers.len() * 2);

    for ticker in tickers {
        segments.push(Segment::text(format!("{}:", ticker.label()), Rgb::WHITE));

        let Some(quote) = market.quotes.get(ticker.symbol()) else {
            segments.push(Segment::text("-- ", Rgb::GREY));
            continue;
        };

        let color = if quote.percent_change >= 0.0 { Rgb::GREEN } else { Rgb::RED };
        let shares = config
            .holdings_enabled
            .then(|| config.holdings.get(ticker.symbol()))
            .flatten()
            .map_or(0.0, |holding| holding.shares);
        let value = if shares > 0.0 {
            format_currency_compact(shares * quote.last)
        } else {
            format_compact(quote.last)
        };
        segments.push(Segment::text(format!("{value} {:+.2}% ", quote.percent_change), color));
    }

    if segments.is_empty() {
        segments.push(Segment::text("Waiting... ", Rgb::WHITE));
    }
    segments
}
