use crate::config::TickerConfig;
use chrono::{NaiveDateTime, TimeDelta};
use derive_more::Display;
use tracing::info;

/// Operator-forced display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum OverrideMode {
    #[default]
    #[display("OFF")]
    Off,
    /// Normal rendering with dimming disabled
    #[display("BRIGHT")]
    Bright,
    #[display("SCOREBOARD")]
    Scoreboard,
    #[display("MESSAGE")]
    Message,
    #[display("MAINT")]
    Maint,
    #[display("CLOCK")]
    Clock,
}

impl OverrideMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OFF" | "" => Some(OverrideMode::Off),
            "BRIGHT" => Some(OverrideMode::Bright),
            "SCOREBOARD" => Some(OverrideMode::Scoreboard),
            "MESSAGE" => Some(OverrideMode::Message),
            "MAINT" => Some(OverrideMode::Maint),
            "CLOCK" => Some(OverrideMode::Clock),
            _ => None,
        }
    }

    /// Whether this mode replaces normal rendering entirely.
    pub fn is_exclusive(&self) -> bool {
        !matches!(self, OverrideMode::Off | OverrideMode::Bright)
    }
}

/// Holds the forced mode and its optional expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideController {
    mode: OverrideMode,
    payload: String,
    expires_at: Option<NaiveDateTime>,
}

impl OverrideController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> OverrideMode {
        self.mode
    }

    /// Free-form payload, e.g. the text for [`OverrideMode::Message`].
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn expires_at(&self) -> Option<NaiveDateTime> {
        self.expires_at
    }

    /// Whether any override, including [`OverrideMode::Bright`], is in force.
    pub fn is_active(&self) -> bool {
        self.mode != OverrideMode::Off
    }

    /// Install `mode`. A zero duration, or one too long to represent, lasts until cleared.
    pub fn set(
        &mut self,
        mode: OverrideMode,
        duration_minutes: u64,
        payload: impl Into<String>,
        now: NaiveDateTime,
    ) {
        self.mode = mode;
        self.payload = payload.into();
        self.expires_at = (mode != OverrideMode::Off && duration_minutes > 0)
            .then(|| {
                i64::try_from(duration_minutes)
                    .ok()
                    .and_then(TimeDelta::try_minutes)
                    .and_then(|duration| now.checked_add_signed(duration))
            })
            .flatten();

        match self.expires_at {
            Some(until) => info!(mode = %self.mode, %until, "override set"),
            None => info!(mode = %self.mode, "override set until cleared"),
        }
    }

    pub fn clear(&mut self) {
        self.mode = OverrideMode::Off;
        self.payload.clear();
        self.expires_at = None;
    }

    /// Revert to [`OverrideMode::Off`] once the expiry has passed. Returns `true` if it did.
    pub fn expire(&mut self, now: NaiveDateTime) -> bool {
        match self.expires_at {
            Some(until) if now >= until => {
                info!(mode = %self.mode, "override elapsed, reverting");
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Re-apply the override keys of `config`. Unknown modes are treated as off.
    pub fn apply_config(&mut self, config: &TickerConfig, now: NaiveDateTime) {
        let mode = OverrideMode::parse(&config.override_mode).unwrap_or_default();
        self.set(
            mode,
            config.override_duration_min,
            config.override_message_text.clone(),
            now,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 5)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_override_mode_parse() {
        struct TestCase {
            input: &'static str,
            expected: Option<OverrideMode>,
        }

        let tests = vec![
            TestCase {
                // TC0: canonical
                input: "CLOCK",
                expected: Some(OverrideMode::Clock),
            },
            TestCase {
                // TC1: lowercase
                input: "bright",
                expected: Some(OverrideMode::Bright),
            },
            TestCase {
                // TC2: empty is off
                input: "",
                expected: Some(OverrideMode::Off),
            },
            TestCase {
                // TC3: unknown
                input: "DISCO",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = OverrideMode::parse(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_set_with_duration_expires() {
        let mut controller = OverrideController::new();
        controller.set(OverrideMode::Message, 5, "BACK IN 5", at(0));

        assert_eq!(controller.expires_at(), Some(at(5)));
        assert!(!controller.expire(at(4)));
        assert_eq!(controller.mode(), OverrideMode::Message);

        assert!(controller.expire(at(5)));
        assert_eq!(controller.mode(), OverrideMode::Off);
        assert_eq!(controller.payload(), "");
    }

    #[test]
    fn test_zero_duration_lasts_until_cleared() {
        let mut controller = OverrideController::new();
        controller.set(OverrideMode::Maint, 0, "", at(0));

        assert_eq!(controller.expires_at(), None);
        assert!(!controller.expire(at(59)));
        assert!(controller.is_active());

        controller.clear();
        assert_eq!(controller, OverrideController::default());
    }

    #[test]
    fn test_unrepresentable_duration_lasts_until_cleared() {
        struct TestCase {
            minutes: u64,
        }

        let tests = vec![
            // TC0: further out than the calendar reaches
            TestCase { minutes: 1_000_000_000_000 },
            // TC1: past i64
            TestCase { minutes: u64::MAX },
            // TC2: longest representable span
            TestCase { minutes: i64::MAX as u64 / 60_000 },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut controller = OverrideController::new();
            controller.set(OverrideMode::Clock, test.minutes, "", at(0));
            assert_eq!(controller.mode(), OverrideMode::Clock, "TC{} failed", index);
            assert_eq!(controller.expires_at(), None, "TC{} failed", index);
            assert!(!controller.expire(at(59)), "TC{} failed", index);
        }
    }

    #[test]
    fn test_apply_config_unknown_mode_is_off() {
        let mut controller = OverrideController::new();
        let config = TickerConfig {
            override_mode: "DISCO".to_string(),
            override_duration_min: 10,
            ..TickerConfig::default()
        };

        controller.apply_config(&config, at(0));

        assert_eq!(controller.mode(), OverrideMode::Off);
        assert_eq!(controller.expires_at(), None);
    }

    #[test]
    fn test_exclusive_modes() {
        assert!(!OverrideMode::Off.is_exclusive());
        assert!(!OverrideMode::Bright.is_exclusive());
        assert!(OverrideMode::Clock.is_exclusive());
        assert_eq!(OverrideMode::Scoreboard.to_string(), "SCOREBOARD");
    }
}
