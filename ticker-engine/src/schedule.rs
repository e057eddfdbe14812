//! Time-of-day facts derived from the wall clock.
//!
//! Everything here is a pure function of the sign's wall-clock time (in `TICKER_TZ`) and the
//! current [`TickerConfig`], apart from [`MarketEventDetector`] which remembers which market
//! events have already fired today. Market bells are evaluated in [`MARKET_TZ`].

use crate::config::TickerConfig;
use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
    Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use std::collections::HashSet;
use tracing::info;

/// Lowest brightness multiplier the panel is ever driven at.
pub const MIN_DIM_SCALE: f64 = 0.01;

/// How many minutes after the open/close bell a market event may still fire.
pub const MARKET_EVENT_WINDOW_MIN: i64 = 3;

/// Zone the exchange rings the open and close bell in.
pub const MARKET_TZ: Tz = chrono_tz::America::New_York;

/// Wall-clock time of `instant` in the sign's configured zone.
pub fn sign_time(config: &TickerConfig, instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&config.ticker_tz).naive_local()
}

/// Exchange wall-clock time for a sign wall-clock time. `None` inside a DST gap.
pub fn market_time(config: &TickerConfig, now: NaiveDateTime) -> Option<NaiveDateTime> {
    config
        .ticker_tz
        .from_local_datetime(&now)
        .earliest()
        .map(|local| local.with_timezone(&MARKET_TZ).naive_local())
}

/// Exchange wall-clock time of `instant`.
pub fn market_time_at(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&MARKET_TZ).naive_local()
}

/// `secs` as a [`TimeDelta`], saturating at the longest representable span.
pub fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// `now + delta`, saturating at the latest representable time.
pub fn after(now: NaiveDateTime, delta: TimeDelta) -> NaiveDateTime {
    now.checked_add_signed(delta).unwrap_or(NaiveDateTime::MAX)
}

/// Half-open `[start, end)` time-of-day test. When `start > end` the window wraps past
/// midnight and matches `t >= start || t < end`.
pub fn in_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= t && t < end
    } else {
        t >= start || t < end
    }
}

fn pct_to_scale(pct: u32) -> f64 {
    (f64::from(pct) / 100.0).clamp(MIN_DIM_SCALE, 1.0)
}

fn in_night_mode(config: &TickerConfig, now: NaiveDateTime) -> bool {
    config.night_mode_enabled
        && in_window(now.time(), config.night_mode_start, config.night_mode_end)
}

/// Brightness multiplier in `[0.01, 1.0]`.
///
/// A manual quick-dim percentage wins, then the night-mode window, otherwise full brightness.
pub fn resolve_dim_scale(config: &TickerConfig, now: NaiveDateTime) -> f64 {
    if config.quick_dim_pct > 0 {
        return pct_to_scale(config.quick_dim_pct);
    }
    if in_night_mode(config, now) {
        return pct_to_scale(config.night_mode_dim_pct);
    }
    1.0
}

/// Scroll speed after the night-mode speed reduction.
pub fn resolve_scroll_speed(config: &TickerConfig, now: NaiveDateTime, pps: f64) -> f64 {
    if in_night_mode(config, now) {
        pps * f64::from(config.night_mode_speed_pct) / 100.0
    } else {
        pps
    }
}

/// The next wall-clock hour boundary strictly after `now`.
pub fn next_top_of_hour(now: NaiveDateTime) -> NaiveDateTime {
    let hour_start = now
        .date()
        .and_hms_opt(now.hour(), 0, 0)
        .unwrap_or(now);
    hour_start + Duration::hours(1)
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Regular session at exchange time `market`: trading weekday between the open and close bell.
pub fn in_session(config: &TickerConfig, market: NaiveDateTime) -> bool {
    is_trading_day(market.date())
        && in_window(market.time(), config.market_open, config.market_close)
}

/// Regular session at sign time `now`.
pub fn is_market_hours(config: &TickerConfig, now: NaiveDateTime) -> bool {
    market_time(config, now).is_some_and(|market| in_session(config, market))
}

/// Trading weekday before the open bell, at sign time `now`.
pub fn is_premarket(config: &TickerConfig, now: NaiveDateTime) -> bool {
    market_time(config, now)
        .is_some_and(|market| is_trading_day(market.date()) && market.time() < config.market_open)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarketEventKind {
    Open,
    Close,
}

impl MarketEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketEventKind::Open => "open",
            MarketEventKind::Close => "close",
        }
    }

    /// Banner text shown for the event.
    pub fn headline(&self) -> &'static str {
        match self {
            MarketEventKind::Open => "MARKET OPEN",
            MarketEventKind::Close => "MARKET CLOSED",
        }
    }

    /// Named colour of the banner.
    pub fn color(&self) -> &'static str {
        match self {
            MarketEventKind::Open => "green",
            MarketEventKind::Close => "red",
        }
    }
}

impl std::fmt::Display for MarketEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which market event window, if any, sign time `now` falls in. Does not record anything.
pub fn market_event_window(config: &TickerConfig, now: NaiveDateTime) -> Option<MarketEventKind> {
    event_at(config, market_time(config, now)?)
}

fn event_at(config: &TickerConfig, market: NaiveDateTime) -> Option<MarketEventKind> {
    if !is_trading_day(market.date()) {
        return None;
    }
    let t = market.time();
    let within = |bell: NaiveTime| in_window(t, bell, bell + Duration::minutes(MARKET_EVENT_WINDOW_MIN));

    if within(config.market_open) {
        Some(MarketEventKind::Open)
    } else if within(config.market_close) {
        Some(MarketEventKind::Close)
    } else {
        None
    }
}

/// Fires each market event at most once per exchange trading day.
#[derive(Debug, Clone, Default)]
pub struct MarketEventDetector {
    shown: HashSet<(NaiveDate, MarketEventKind)>,
}

impl MarketEventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the event whose window sign time `now` falls in, unless it already fired today.
    pub fn detect(&mut self, config: &TickerConfig, now: NaiveDateTime) -> Option<MarketEventKind> {
        let market = market_time(config, now)?;
        let kind = event_at(config, market)?;
        let today = market.date();

        // Older days can never match again
        self.shown.retain(|(date, _)| *date == today);

        if self.shown.insert((today, kind)) {
            info!(event = %kind, date = %today, "market event detected");
            Some(kind)
        } else {
            None
        }
    }

    pub fn has_fired(&self, date: NaiveDate, kind: MarketEventKind) -> bool {
        self.shown.contains(&(date, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: (i32, u32, u32), hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    // 2025-03-05 is a Wednesday, 2025-03-08 a Saturday
    const WEDNESDAY: (i32, u32, u32) = (2025, 3, 5);
    const SATURDAY: (i32, u32, u32) = (2025, 3, 8);

    #[test]
    fn test_in_window() {
        struct TestCase {
            t: NaiveTime,
            start: NaiveTime,
            end: NaiveTime,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: inside same-day window
                t: hm(12, 0),
                start: hm(9, 0),
                end: hm(17, 0),
                expected: true,
            },
            TestCase {
                // TC1: end is exclusive
                t: hm(17, 0),
                start: hm(9, 0),
                end: hm(17, 0),
                expected: false,
            },
            TestCase {
                // TC2: overnight window, before midnight
                t: hm(23, 0),
                start: hm(22, 0),
                end: hm(7, 0),
                expected: true,
            },
            TestCase {
                // TC3: overnight window, after midnight
                t: hm(6, 59),
                start: hm(22, 0),
                end: hm(7, 0),
                expected: true,
            },
            TestCase {
                // TC4: overnight window, daytime
                t: hm(12, 0),
                start: hm(22, 0),
                end: hm(7, 0),
                expected: false,
            },
            TestCase {
                // TC5: empty window
                t: hm(8, 0),
                start: hm(8, 0),
                end: hm(8, 0),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = in_window(test.t, test.start, test.end);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_resolve_dim_scale() {
        struct TestCase {
            config: TickerConfig,
            now: NaiveDateTime,
            expected: f64,
        }

        let night = TickerConfig {
            night_mode_enabled: true,
            night_mode_start: hm(22, 0),
            night_mode_end: hm(7, 0),
            night_mode_dim_pct: 30,
            ..TickerConfig::default()
        };

        let tests = vec![
            TestCase {
                // TC0: night mode disabled, no quick dim
                config: TickerConfig::default(),
                now: at(WEDNESDAY, 23, 0),
                expected: 1.0,
            },
            TestCase {
                // TC1: inside the night window
                config: night.clone(),
                now: at(WEDNESDAY, 23, 0),
                expected: 0.30,
            },
            TestCase {
                // TC2: outside the night window
                config: night.clone(),
                now: at(WEDNESDAY, 12, 0),
                expected: 1.0,
            },
            TestCase {
                // TC3: quick dim wins over night mode
                config: TickerConfig {
                    quick_dim_pct: 60,
                    ..night.clone()
                },
                now: at(WEDNESDAY, 23, 0),
                expected: 0.60,
            },
            TestCase {
                // TC4: zero night dim clamps to the floor
                config: TickerConfig {
                    night_mode_dim_pct: 0,
                    ..night
                },
                now: at(WEDNESDAY, 1, 0),
                expected: MIN_DIM_SCALE,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = resolve_dim_scale(&test.config, test.now);
            assert!((actual - test.expected).abs() < 1e-9, "TC{} failed: {}", index, actual);
        }
    }

    #[test]
    fn test_resolve_scroll_speed() {
        let config = TickerConfig {
            night_mode_enabled: true,
            night_mode_speed_pct: 50,
            ..TickerConfig::default()
        };
        assert_eq!(resolve_scroll_speed(&config, at(WEDNESDAY, 23, 30), 40.0), 20.0);
        assert_eq!(resolve_scroll_speed(&config, at(WEDNESDAY, 13, 0), 40.0), 40.0);
    }

    #[test]
    fn test_next_top_of_hour() {
        let now = at(WEDNESDAY, 9, 59) + Duration::seconds(59);
        assert_eq!(next_top_of_hour(now), at(WEDNESDAY, 10, 0));
        assert_eq!(next_top_of_hour(at(WEDNESDAY, 10, 0)), at(WEDNESDAY, 11, 0));
        assert_eq!(next_top_of_hour(at(WEDNESDAY, 23, 5)), at((2025, 3, 6), 0, 0));
    }

    #[test]
    fn test_market_event_window() {
        struct TestCase {
            now: NaiveDateTime,
            expected: Option<MarketEventKind>,
        }

        let tests = vec![
            TestCase {
                // TC0: open bell
                now: at(WEDNESDAY, 9, 30),
                expected: Some(MarketEventKind::Open),
            },
            TestCase {
                // TC1: last minute of the open window
                now: at(WEDNESDAY, 9, 32),
                expected: Some(MarketEventKind::Open),
            },
            TestCase {
                // TC2: open window has closed
                now: at(WEDNESDAY, 9, 33),
                expected: None,
            },
            TestCase {
                // TC3: close bell
                now: at(WEDNESDAY, 16, 1),
                expected: Some(MarketEventKind::Close),
            },
            TestCase {
                // TC4: weekend
                now: at(SATURDAY, 9, 30),
                expected: None,
            },
        ];

        let config = TickerConfig::default();
        for (index, test) in tests.into_iter().enumerate() {
            let actual = market_event_window(&config, test.now);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_market_event_detector_fires_once_per_day() {
        let config = TickerConfig::default();
        let mut detector = MarketEventDetector::new();

        assert_eq!(detector.detect(&config, at(WEDNESDAY, 9, 30)), Some(MarketEventKind::Open));
        assert_eq!(detector.detect(&config, at(WEDNESDAY, 9, 31)), None);
        assert_eq!(detector.detect(&config, at(WEDNESDAY, 16, 0)), Some(MarketEventKind::Close));
        assert_eq!(detector.detect(&config, at(WEDNESDAY, 16, 2)), None);

        // Next day fires again
        assert_eq!(detector.detect(&config, at((2025, 3, 6), 9, 30)), Some(MarketEventKind::Open));
        assert!(!detector.has_fired(at(WEDNESDAY, 0, 0).date(), MarketEventKind::Open));
    }

    #[test]
    fn test_market_events_follow_exchange_time() {
        struct TestCase {
            tz: Tz,
            now: NaiveDateTime,
            expected: Option<MarketEventKind>,
        }

        let tests = vec![
            TestCase {
                // TC0: 06:30 in Vancouver is the 09:30 bell in New York
                tz: chrono_tz::America::Vancouver,
                now: at(WEDNESDAY, 6, 30),
                expected: Some(MarketEventKind::Open),
            },
            TestCase {
                // TC1: 09:30 in Vancouver is mid-session
                tz: chrono_tz::America::Vancouver,
                now: at(WEDNESDAY, 9, 30),
                expected: None,
            },
            TestCase {
                // TC2: close bell seen from London
                tz: chrono_tz::Europe::London,
                now: at(WEDNESDAY, 21, 0),
                expected: Some(MarketEventKind::Close),
            },
            TestCase {
                // TC3: Thursday morning in Tokyo is Wednesday's close in New York
                tz: chrono_tz::Asia::Tokyo,
                now: at((2025, 3, 6), 6, 0),
                expected: Some(MarketEventKind::Close),
            },
            TestCase {
                // TC4: Saturday morning in Tokyo is still Friday's close in New York
                tz: chrono_tz::Asia::Tokyo,
                now: at(SATURDAY, 6, 0),
                expected: Some(MarketEventKind::Close),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let config = TickerConfig {
                ticker_tz: test.tz,
                ..TickerConfig::default()
            };
            let actual = market_event_window(&config, test.now);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_sign_time_uses_configured_zone() {
        let instant = Utc.with_ymd_and_hms(2025, 3, 5, 14, 30, 0).unwrap();
        let vancouver = TickerConfig {
            ticker_tz: chrono_tz::America::Vancouver,
            ..TickerConfig::default()
        };

        assert_eq!(sign_time(&vancouver, instant), at(WEDNESDAY, 6, 30));
        assert_eq!(sign_time(&TickerConfig::default(), instant), at(WEDNESDAY, 9, 30));
        assert_eq!(market_time_at(instant), at(WEDNESDAY, 9, 30));

        // The open fires once for the sign, at its own 06:30
        let mut detector = MarketEventDetector::new();
        let now = sign_time(&vancouver, instant);
        assert_eq!(detector.detect(&vancouver, now), Some(MarketEventKind::Open));
        assert!(detector.has_fired(at(WEDNESDAY, 0, 0).date(), MarketEventKind::Open));
    }

    #[test]
    fn test_saturating_time_arithmetic() {
        assert_eq!(seconds(90), Duration::seconds(90));
        assert_eq!(seconds(u64::MAX), TimeDelta::MAX);
        assert_eq!(after(at(WEDNESDAY, 9, 0), seconds(60)), at(WEDNESDAY, 9, 1));
        assert_eq!(after(at(WEDNESDAY, 9, 0), seconds(u64::MAX)), NaiveDateTime::MAX);
    }

    #[test]
    fn test_market_hours() {
        let config = TickerConfig::default();
        assert!(is_market_hours(&config, at(WEDNESDAY, 9, 30)));
        assert!(!is_market_hours(&config, at(WEDNESDAY, 16, 0)));
        assert!(!is_market_hours(&config, at(SATURDAY, 12, 0)));
        assert!(is_premarket(&config, at(WEDNESDAY, 8, 0)));
        assert!(!is_premarket(&config, at(SATURDAY, 8, 0)));
    }
}
