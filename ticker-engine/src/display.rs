//! Top-level display state machine.
//!
//! Transitions are only evaluated while no override is in force and no score alert is active;
//! otherwise the current state is frozen. Rendering precedence above the state machine lives in
//! [`crate::engine`].

use crate::{
    config::{Precedence, PrerollStyle, TickerConfig},
    schedule::{self, MarketEventDetector, MarketEventKind},
};
use chrono::NaiveDateTime;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrerollReason {
    Hour,
    MarketOpen,
    MarketClose,
}

impl PrerollReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrerollReason::Hour => "hour",
            PrerollReason::MarketOpen => "market_open",
            PrerollReason::MarketClose => "market_close",
        }
    }
}

impl PrerollReason {
    /// Market event the preroll announces, if any.
    pub fn market_event(&self) -> Option<MarketEventKind> {
        match self {
            PrerollReason::Hour => None,
            PrerollReason::MarketOpen => Some(MarketEventKind::Open),
            PrerollReason::MarketClose => Some(MarketEventKind::Close),
        }
    }
}

impl From<MarketEventKind> for PrerollReason {
    fn from(kind: MarketEventKind) -> Self {
        match kind {
            MarketEventKind::Open => PrerollReason::MarketOpen,
            MarketEventKind::Close => PrerollReason::MarketClose,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayState {
    #[default]
    Ticker,
    Preroll(PrerollReason),
    Scoreboard,
}

impl std::fmt::Display for DisplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayState::Ticker => write!(f, "TICKER"),
            DisplayState::Preroll(reason) => write!(f, "PREROLL({})", reason.as_str()),
            DisplayState::Scoreboard => write!(f, "SCOREBOARD"),
        }
    }
}

/// How a preroll is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerollPresentation {
    StaticClock,
    ScrollingClock,
    MarketBanner(MarketEventKind),
}

/// Per-tick facts the state machine needs besides the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsmInput {
    pub now: NaiveDateTime,
    /// An override other than OFF is in force, BRIGHT included.
    pub override_active: bool,
    pub alert_active: bool,
    pub any_live: bool,
}

#[derive(Debug, Clone)]
pub struct DisplayFsm {
    state: DisplayState,
    entered_at: NaiveDateTime,
    next_hour: NaiveDateTime,
    detector: MarketEventDetector,
}

impl DisplayFsm {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            state: DisplayState::Ticker,
            entered_at: now,
            next_hour: schedule::next_top_of_hour(now),
            detector: MarketEventDetector::new(),
        }
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn entered_at(&self) -> NaiveDateTime {
        self.entered_at
    }

    pub fn next_hour(&self) -> NaiveDateTime {
        self.next_hour
    }

    /// Evaluate one tick. Returns the new state if a transition happened.
    pub fn step(&mut self, config: &TickerConfig, input: FsmInput) -> Option<DisplayState> {
        if input.override_active || input.alert_active {
            return None;
        }

        let now = input.now;
        let live = config.scoreboard_enabled && input.any_live;

        // The deadline rolls forward whenever it is consumed, so a disabled preroll never
        // leaves a stale deadline behind.
        let hour_preroll = if !matches!(self.state, DisplayState::Preroll(_)) && now >= self.next_hour {
            self.next_hour = schedule::next_top_of_hour(now);
            config.time_preroll_enabled && config.preroll_style != PrerollStyle::None
        } else {
            false
        };

        let next = match self.state {
            _ if hour_preroll => Some(DisplayState::Preroll(PrerollReason::Hour)),
            DisplayState::Ticker => config
                .time_preroll_enabled
                .then(|| self.detector.detect(config, now))
                .flatten()
                .map(|kind| DisplayState::Preroll(kind.into()))
                .or_else(|| live.then_some(DisplayState::Scoreboard)),
            DisplayState::Preroll(reason) => {
                let window_closed = reason
                    .market_event()
                    .is_some_and(|kind| schedule::market_event_window(config, now) != Some(kind));

                if config.scoreboard_precedence == Precedence::Force && live {
                    Some(DisplayState::Scoreboard)
                } else if window_closed
                    || now - self.entered_at >= schedule::seconds(config.time_preroll_sec)
                {
                    Some(DisplayState::Ticker)
                } else {
                    None
                }
            }
            DisplayState::Scoreboard => (!live).then_some(DisplayState::Ticker),
        };

        let next = next.filter(|next| *next != self.state)?;
        info!(from = %self.state, to = %next, "display state changed");
        self.state = next;
        self.entered_at = now;
        Some(next)
    }

    /// Recompute the hour deadline, e.g. after the sign's time zone changed.
    pub fn realign_hour(&mut self, now: NaiveDateTime) {
        self.next_hour = schedule::next_top_of_hour(now);
    }

    /// Drop back to TICKER, e.g. after a layout change.
    pub fn reset(&mut self, now: NaiveDateTime) {
        self.state = DisplayState::Ticker;
        self.entered_at = now;
    }
}

/// Sub-presentation for a running preroll.
///
/// A market banner drawn after its event window closed falls back to the static clock; the
/// state machine ends such a preroll on its next step.
pub fn preroll_presentation(
    reason: PrerollReason,
    config: &TickerConfig,
    now: NaiveDateTime,
) -> PrerollPresentation {
    let window = schedule::market_event_window(config, now);
    match reason {
        PrerollReason::Hour => match config.preroll_style {
            PrerollStyle::Marquee => PrerollPresentation::ScrollingClock,
            PrerollStyle::MarketAnnounce => window
                .map(PrerollPresentation::MarketBanner)
                .unwrap_or(PrerollPresentation::StaticClock),
            PrerollStyle::Bigtime | PrerollStyle::None => PrerollPresentation::StaticClock,
        },
        PrerollReason::MarketOpen => match window {
            Some(MarketEventKind::Open) => PrerollPresentation::MarketBanner(MarketEventKind::Open),
            _ => PrerollPresentation::StaticClock,
        },
        PrerollReason::MarketClose => match window {
            Some(MarketEventKind::Close) => PrerollPresentation::MarketBanner(MarketEventKind::Close),
            _ => PrerollPresentation::StaticClock,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    // Wednesday
    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 5)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn input(now: NaiveDateTime, any_live: bool) -> FsmInput {
        FsmInput {
            now,
            override_active: false,
            alert_active: false,
            any_live,
        }
    }

    #[test]
    fn test_hour_preroll_preempts_live_game() {
        let config = TickerConfig::default();
        assert_eq!(config.scoreboard_precedence, Precedence::Normal);

        // From TICKER
        let mut fsm = DisplayFsm::new(at(11, 59, 50));
        assert_eq!(
            fsm.step(&config, input(at(12, 0, 0), true)),
            Some(DisplayState::Preroll(PrerollReason::Hour))
        );
        assert_eq!(fsm.next_hour(), at(13, 0, 0));

        // From SCOREBOARD
        let mut fsm = DisplayFsm::new(at(11, 59, 50));
        assert_eq!(fsm.step(&config, input(at(11, 59, 55), true)), Some(DisplayState::Scoreboard));
        assert_eq!(
            fsm.step(&config, input(at(12, 0, 1), true)),
            Some(DisplayState::Preroll(PrerollReason::Hour))
        );

        // Normal precedence keeps the preroll until it elapses
        assert_eq!(fsm.step(&config, input(at(12, 0, 5), true)), None);
        assert_eq!(fsm.step(&config, input(at(12, 0, 16), true)), Some(DisplayState::Ticker));
    }

    #[test]
    fn test_force_precedence_evicts_preroll() {
        let config = TickerConfig {
            scoreboard_precedence: Precedence::Force,
            time_preroll_sec: 15,
            ..TickerConfig::default()
        };
        let mut fsm = DisplayFsm::new(at(11, 59, 50));
        fsm.step(&config, input(at(12, 0, 0), false));
        assert_eq!(fsm.state(), DisplayState::Preroll(PrerollReason::Hour));

        assert_eq!(fsm.step(&config, input(at(12, 0, 2), false)), None);
        assert_eq!(fsm.step(&config, input(at(12, 0, 3), true)), Some(DisplayState::Scoreboard));
    }

    #[test]
    fn test_scoreboard_returns_to_ticker_when_no_game_live() {
        let config = TickerConfig::default();
        let mut fsm = DisplayFsm::new(at(14, 10, 0));

        assert_eq!(fsm.step(&config, input(at(14, 10, 1), false)), None);
        assert_eq!(fsm.step(&config, input(at(14, 10, 2), true)), Some(DisplayState::Scoreboard));
        assert_eq!(fsm.step(&config, input(at(14, 10, 3), false)), Some(DisplayState::Ticker));

        let disabled = TickerConfig {
            scoreboard_enabled: false,
            ..config
        };
        assert_eq!(fsm.step(&disabled, input(at(14, 10, 4), true)), None);
    }

    #[test]
    fn test_never_enters_scoreboard_while_blocked() {
        struct TestCase {
            override_active: bool,
            alert_active: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: exclusive override
                override_active: true,
                alert_active: false,
            },
            TestCase {
                // TC1: active alert
                override_active: false,
                alert_active: true,
            },
            TestCase {
                // TC2: both
                override_active: true,
                alert_active: true,
            },
        ];

        let config = TickerConfig::default();
        for (index, test) in tests.into_iter().enumerate() {
            let mut fsm = DisplayFsm::new(at(14, 10, 0));
            for second in 1..30 {
                let actual = fsm.step(
                    &config,
                    FsmInput {
                        now: at(14, 10, second),
                        override_active: test.override_active,
                        alert_active: test.alert_active,
                        any_live: true,
                    },
                );
                assert_eq!(actual, None, "TC{} failed", index);
            }
            assert_eq!(fsm.state(), DisplayState::Ticker, "TC{} failed", index);
        }
    }

    #[test]
    fn test_market_event_preroll_fires_once() {
        let config = TickerConfig::default();
        let mut fsm = DisplayFsm::new(at(9, 29, 0));

        assert_eq!(
            fsm.step(&config, input(at(9, 30, 10), false)),
            Some(DisplayState::Preroll(PrerollReason::MarketOpen))
        );
        assert_eq!(fsm.step(&config, input(at(9, 30, 30), false)), Some(DisplayState::Ticker));
        assert_eq!(fsm.step(&config, input(at(9, 31, 0), false)), None);
    }

    #[test]
    fn test_market_preroll_ends_with_its_window() {
        let config = TickerConfig {
            time_preroll_sec: 600,
            ..TickerConfig::default()
        };
        let mut fsm = DisplayFsm::new(at(16, 0, 30));

        assert_eq!(
            fsm.step(&config, input(at(16, 2, 0), false)),
            Some(DisplayState::Preroll(PrerollReason::MarketClose))
        );
        assert_eq!(fsm.step(&config, input(at(16, 2, 59), false)), None);
        assert_eq!(fsm.step(&config, input(at(16, 3, 0), false)), Some(DisplayState::Ticker));
    }

    #[test]
    fn test_unbounded_preroll_length_does_not_overflow() {
        let config = TickerConfig {
            time_preroll_sec: u64::MAX,
            ..TickerConfig::default()
        };
        let mut fsm = DisplayFsm::new(at(11, 59, 50));

        fsm.step(&config, input(at(12, 0, 0), false));
        assert_eq!(fsm.state(), DisplayState::Preroll(PrerollReason::Hour));
        assert_eq!(fsm.step(&config, input(at(23, 0, 0), false)), None);
    }

    #[test]
    fn test_realign_hour() {
        let mut fsm = DisplayFsm::new(at(11, 20, 0));
        assert_eq!(fsm.next_hour(), at(12, 0, 0));

        // Sign clock moved back three hours
        fsm.realign_hour(at(8, 20, 0));
        assert_eq!(fsm.next_hour(), at(9, 0, 0));
    }

    #[test]
    fn test_disabled_preroll_rolls_deadline() {
        let config = TickerConfig {
            time_preroll_enabled: false,
            ..TickerConfig::default()
        };
        let mut fsm = DisplayFsm::new(at(11, 59, 0));

        assert_eq!(fsm.step(&config, input(at(12, 0, 0), false)), None);
        assert_eq!(fsm.next_hour(), at(13, 0, 0));
    }

    #[test]
    fn test_preroll_presentation() {
        struct TestCase {
            reason: PrerollReason,
            style: PrerollStyle,
            now: NaiveDateTime,
            expected: PrerollPresentation,
        }

        let tests = vec![
            TestCase {
                // TC0: bigtime
                reason: PrerollReason::Hour,
                style: PrerollStyle::Bigtime,
                now: at(12, 0, 0),
                expected: PrerollPresentation::StaticClock,
            },
            TestCase {
                // TC1: marquee
                reason: PrerollReason::Hour,
                style: PrerollStyle::Marquee,
                now: at(12, 0, 0),
                expected: PrerollPresentation::ScrollingClock,
            },
            TestCase {
                // TC2: market announce outside any window
                reason: PrerollReason::Hour,
                style: PrerollStyle::MarketAnnounce,
                now: at(12, 0, 0),
                expected: PrerollPresentation::StaticClock,
            },
            TestCase {
                // TC3: market open inside its window
                reason: PrerollReason::MarketOpen,
                style: PrerollStyle::Bigtime,
                now: at(9, 31, 0),
                expected: PrerollPresentation::MarketBanner(MarketEventKind::Open),
            },
            TestCase {
                // TC4: window closed mid-preroll
                reason: PrerollReason::MarketOpen,
                style: PrerollStyle::Bigtime,
                now: at(9, 33, 0),
                expected: PrerollPresentation::StaticClock,
            },
            TestCase {
                // TC5: close banner
                reason: PrerollReason::MarketClose,
                style: PrerollStyle::Bigtime,
                now: at(16, 0, 30),
                expected: PrerollPresentation::MarketBanner(MarketEventKind::Close),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let config = TickerConfig {
                preroll_style: test.style,
                ..TickerConfig::default()
            };
            let actual = preroll_presentation(test.reason, &config, test.now);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
