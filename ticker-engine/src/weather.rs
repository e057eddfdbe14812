//! Weather banner state.
//!
//! Live snapshots drive an edge-triggered Inactive/Active machine. How often the banner is
//! actually drawn is a separate, severity-gated cadence evaluated against a row's scroll
//! completion counter. The sticky/repeat timers only exist for the synthetic test injector.

use crate::{
    config::TickerConfig,
    types::{Severity, WeatherSnapshot},
};
use crate::schedule::{after, seconds};
use chrono::NaiveDateTime;
use tracing::info;

const TEST_DEFAULT_TEXT: &str = "TEST WEATHER WARNING";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WeatherBanner {
    #[default]
    Inactive,
    Active { message: String, severity: Severity },
}

/// Timers populated only by the test injector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestWindow {
    pub forced_until: NaiveDateTime,
    pub show_until: NaiveDateTime,
    pub next_repeat_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeatherBannerFsm {
    banner: WeatherBanner,
    test_injected: bool,
    test_window: Option<TestWindow>,
}

impl WeatherBannerFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn banner(&self) -> &WeatherBanner {
        &self.banner
    }

    pub fn test_window(&self) -> Option<&TestWindow> {
        self.test_window.as_ref()
    }

    /// Fold a live snapshot into the banner state. Returns `true` if the state changed.
    ///
    /// An active snapshot re-pins the banner only when it was inactive or the text changed.
    /// An inactive snapshot clears the banner immediately.
    pub fn on_snapshot(&mut self, snapshot: &WeatherSnapshot) -> bool {
        if !snapshot.active {
            let was_active = self.banner != WeatherBanner::Inactive;
            self.banner = WeatherBanner::Inactive;
            return was_active;
        }

        let message = snapshot.message.trim();
        let repin = match &self.banner {
            WeatherBanner::Inactive => true,
            WeatherBanner::Active { message: current, .. } => {
                !message.is_empty() && message != current
            }
        };

        if repin {
            let message = if message.is_empty() { "Weather alert" } else { message };
            info!(severity = snapshot.severity.as_str(), message, "weather banner active");
            self.banner = WeatherBanner::Active {
                message: message.to_string(),
                severity: snapshot.severity,
            };
        }
        repin
    }

    /// Whether the row's next pass should carry the banner, given its completion counter.
    pub fn should_show(&self, completed: u64, config: &TickerConfig) -> bool {
        let WeatherBanner::Active { message, severity } = &self.banner else {
            return false;
        };
        if message.is_empty() {
            return false;
        }
        let every = match severity {
            Severity::Warning => config.weather_warning_every_n_scrolls,
            Severity::Advisory | Severity::Watch => config.weather_advisory_every_n_scrolls,
            Severity::None | Severity::Statement => return false,
        };
        completed % every.max(1) == 0
    }

    /// Drop the live banner. The test injector keeps its one-shot state.
    pub fn reset(&mut self) {
        self.banner = WeatherBanner::Inactive;
    }

    /// Synthetic test path: after `WEATHER_TEST_DELAY` seconds force a warning active for a
    /// bounded window, re-arming the sticky timers every repeat interval.
    pub fn tick_test_injector(
        &mut self,
        config: &TickerConfig,
        started_at: NaiveDateTime,
        now: NaiveDateTime,
    ) {
        let sticky = seconds(config.weather_sticky_sec.max(5));
        let repeat = seconds(config.weather_repeat_sec.max(config.weather_announce_sec));

        if config.weather_test_delay > 0
            && !self.test_injected
            && now - started_at >= seconds(config.weather_test_delay)
        {
            self.test_injected = true;
            let message = if config.weather_force_text.trim().is_empty() {
                TEST_DEFAULT_TEXT.to_string()
            } else {
                config.weather_force_text.trim().to_string()
            };
            info!(%message, "test weather alert injected");

            self.banner = WeatherBanner::Active {
                message,
                severity: Severity::Warning,
            };
            self.test_window = Some(TestWindow {
                forced_until: after(
                    now,
                    seconds(config.weather_test_sticky_total.max(config.weather_sticky_sec)),
                ),
                show_until: after(now, sticky),
                next_repeat_at: after(now, repeat),
            });
        }

        let Some(window) = self.test_window.as_mut() else {
            return;
        };
        if now <= window.forced_until {
            if now >= window.next_repeat_at {
                window.show_until = after(now, sticky);
                window.next_repeat_at = after(now, repeat);
            }
            if let WeatherBanner::Inactive = self.banner {
                self.banner = WeatherBanner::Active {
                    message: TEST_DEFAULT_TEXT.to_string(),
                    severity: Severity::Warning,
                };
            }
        } else {
            info!("test weather alert expired");
            self.test_window = None;
            self.banner = WeatherBanner::Inactive;
        }
    }
}
