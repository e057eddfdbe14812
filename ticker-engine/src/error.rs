use thiserror::Error;

/// Errors raised while loading, validating or writing the sign configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config document must be a JSON object")]
    NotAnObject,

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors produced by a data provider while fetching market, weather or sports data.
///
/// These never escape a worker loop: they are logged, written to the status document
/// and the worker retries on its next cadence.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ProviderError {
    #[error("request failed ({source_name}): {message}")]
    Http {
        source_name: &'static str,
        message: String,
    },

    #[error("unexpected status {status} from {source_name}")]
    Status {
        source_name: &'static str,
        status: u16,
    },

    #[error("failed to parse {source_name} response: {message}")]
    Parse {
        source_name: &'static str,
        message: String,
    },

    #[error("no data returned for {0}")]
    NoData(String),
}

impl ProviderError {
    /// Determine if the failure is worth reporting as `error` rather than `no_data`.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_fault(&self) -> bool {
        match self {
            ProviderError::NoData(_) => false,
            _ => true,
        }
    }
}

/// Errors raised by the physical output path.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum PanelError {
    #[error("failed to initialise panel output: {0}")]
    Init(String),

    #[error("failed to write frame: {0}")]
    Write(String),

    #[error("frame size {actual_w}x{actual_h} does not match panel {expected_w}x{expected_h}")]
    SizeMismatch {
        expected_w: usize,
        expected_h: usize,
        actual_w: usize,
        actual_h: usize,
    },
}

/// All errors generated in `ticker-engine`.
#[derive(Debug, Error)]
pub enum TickerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Panel(#[from] PanelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_fault() {
        struct TestCase {
            input: ProviderError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: http failure is a fault
                input: ProviderError::Http {
                    source_name: "market",
                    message: "connection reset".to_string(),
                },
                expected: true,
            },
            TestCase {
                // TC1: bad status is a fault
                input: ProviderError::Status {
                    source_name: "scoreboard",
                    status: 503,
                },
                expected: true,
            },
            TestCase {
                // TC2: empty result is not a fault
                input: ProviderError::NoData("AAPL".to_string()),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_fault();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_ticker_error_from_panel_error() {
        let error = TickerError::from(PanelError::Init("no device".to_string()));
        assert_eq!(error.to_string(), "failed to initialise panel output: no device");
    }
}
