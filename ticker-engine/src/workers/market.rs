use crate::{
    config::TickerConfig,
    provider::MarketSource,
    queue::LatestWinsQueue,
    schedule,
    types::{Envelope, FetchStatus, MarketState, MarketUpdate, Quote},
    workers::status::{StatusBoard, WorkerStatus},
};
use chrono::{NaiveDateTime, NaiveTime, Utc};
use futures::future::join_all;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::{debug, info};

/// Slice of the config the market worker runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSettings {
    pub symbols: Vec<String>,
    pub refresh: Duration,
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
}

impl MarketSettings {
    pub fn from_config(config: &TickerConfig) -> Self {
        Self {
            symbols: config.all_symbols(),
            refresh: Duration::from_secs(config.refresh_sec.max(5)),
            market_open: config.market_open,
            market_close: config.market_close,
        }
    }

    /// Time-based session check used when the source cannot report one. `now` is exchange time.
    fn session_state(&self, now: NaiveDateTime) -> MarketState {
        let open = schedule::is_trading_day(now.date())
            && schedule::in_window(now.time(), self.market_open, self.market_close);
        if open { MarketState::Regular } else { MarketState::Closed }
    }
}

/// Run one fetch cycle over every symbol. `now` is exchange wall-clock time.
pub async fn fetch_update(
    source: &dyn MarketSource,
    settings: &MarketSettings,
    now: NaiveDateTime,
) -> (MarketUpdate, WorkerStatus) {
    let started = Instant::now();
    let mut error = None;

    let market_state = match source.market_state().await {
        Ok(MarketState::Unknown) => settings.session_state(now),
        Ok(state) => state,
        Err(source_error) => {
            error = Some(format!("market state fetch failed: {source_error}"));
            settings.session_state(now)
        }
    };

    let samples = join_all(
        settings
            .symbols
            .iter()
            .map(|symbol| source.fetch_price(symbol)),
    )
    .await;

    let mut quotes = HashMap::with_capacity(settings.symbols.len());
    let mut failed = 0usize;
    for (symbol, sample) in settings.symbols.iter().zip(samples) {
        let quote = match sample {
            Ok(sample) => sample
                .last
                .zip(sample.previous_close)
                .and_then(|(last, previous_close)| Quote::new(last, previous_close, Utc::now())),
            Err(fetch_error) => {
                debug!(%symbol, %fetch_error, "price fetch failed");
                None
            }
        };
        match quote {
            Some(quote) => {
                quotes.insert(symbol.clone(), quote);
            }
            None => failed += 1,
        }
    }

    let total = settings.symbols.len();
    let status = if total == 0 {
        FetchStatus::NoData
    } else if failed == total {
        error = Some("All symbols failed to fetch".to_string());
        FetchStatus::Error
    } else if failed > 0 {
        error = Some(format!("{failed}/{total} symbols failed"));
        FetchStatus::Partial
    } else {
        FetchStatus::Ok
    };

    let record = WorkerStatus::new(status.as_str(), error.clone())
        .with_detail("market_state", serde_json::to_value(market_state).unwrap_or_default())
        .with_detail("symbols_count", total)
        .with_detail("symbols_failed", failed)
        .with_detail(
            "fetch_duration_sec",
            (started.elapsed().as_secs_f64() * 100.0).round() / 100.0,
        );

    let update = MarketUpdate {
        status,
        market_state,
        quotes,
        error,
    };
    (update, record)
}

/// Poll prices every `settings.refresh` until `stop` fires.
pub async fn run(
    settings: MarketSettings,
    source: Arc<dyn MarketSource>,
    queue: LatestWinsQueue<Envelope>,
    status: StatusBoard,
    mut stop: watch::Receiver<bool>,
) {
    info!(symbols = settings.symbols.len(), refresh = ?settings.refresh, "market worker started");

    let mut timer = interval(settings.refresh);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = async {
                timer.tick().await;
                let (update, record) =
                    fetch_update(source.as_ref(), &settings, schedule::market_time_at(Utc::now())).await;
                debug!(status = update.status.as_str(), quotes = update.quotes.len(), "market cycle");
                status.update("market", record);
                queue.push(Envelope::new("market", &update));
            } => {}
        }
    }

    info!("market worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ProviderError, provider::PriceSample, types::WorkerMessage};
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct FixedMarket {
        state: Result<MarketState, ProviderError>,
        prices: HashMap<&'static str, PriceSample>,
    }

    #[async_trait]
    impl MarketSource for FixedMarket {
        async fn market_state(&self) -> Result<MarketState, ProviderError> {
            self.state.clone()
        }

        async fn fetch_price(&self, symbol: &str) -> Result<PriceSample, ProviderError> {
            self.prices
                .get(symbol)
                .copied()
                .ok_or_else(|| ProviderError::NoData(symbol.to_string()))
        }
    }

    fn sample(last: f64, previous_close: f64) -> PriceSample {
        PriceSample {
            last: Some(last),
            previous_close: Some(previous_close),
        }
    }

    fn settings(symbols: &[&str]) -> MarketSettings {
        MarketSettings {
            symbols: symbols.iter().map(|symbol| symbol.to_string()).collect(),
            refresh: Duration::from_millis(10),
            market_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            market_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }

    // Wednesday
    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 5)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_status_classification() {
        struct TestCase {
            symbols: Vec<&'static str>,
            expected: FetchStatus,
        }

        let tests = vec![
            TestCase {
                // TC0: every symbol ok
                symbols: vec!["AAPL", "MSFT"],
                expected: FetchStatus::Ok,
            },
            TestCase {
                // TC1: one missing
                symbols: vec!["AAPL", "NOPE"],
                expected: FetchStatus::Partial,
            },
            TestCase {
                // TC2: zero previous close counts as failed
                symbols: vec!["ZERO"],
                expected: FetchStatus::Error,
            },
            TestCase {
                // TC3: nothing configured
                symbols: vec![],
                expected: FetchStatus::NoData,
            },
        ];

        let source = FixedMarket {
            state: Ok(MarketState::Regular),
            prices: HashMap::from([
                ("AAPL", sample(110.0, 100.0)),
                ("MSFT", sample(95.0, 100.0)),
                ("ZERO", sample(1.0, 0.0)),
            ]),
        };

        for (index, test) in tests.into_iter().enumerate() {
            let (update, record) = fetch_update(&source, &settings(&test.symbols), at(10, 0)).await;
            assert_eq!(update.status, test.expected, "TC{} failed", index);
            assert_eq!(record.status, test.expected.as_str(), "TC{} failed", index);
        }
    }

    #[tokio::test]
    async fn test_percent_change_and_state_fallback() {
        let source = FixedMarket {
            state: Ok(MarketState::Unknown),
            prices: HashMap::from([("AAPL", sample(110.0, 100.0))]),
        };

        let (update, _) = fetch_update(&source, &settings(&["AAPL"]), at(10, 0)).await;
        assert_eq!(update.market_state, MarketState::Regular);
        assert!((update.quotes["AAPL"].percent_change - 10.0).abs() < 1e-9);

        let (update, _) = fetch_update(&source, &settings(&["AAPL"]), at(17, 0)).await;
        assert_eq!(update.market_state, MarketState::Closed);

        let failing = FixedMarket {
            state: Err(ProviderError::Status {
                source_name: "test",
                status: 503,
            }),
            prices: HashMap::new(),
        };
        let (update, record) = fetch_update(&failing, &settings(&["AAPL"]), at(10, 0)).await;
        assert_eq!(update.market_state, MarketState::Regular);
        assert_eq!(record.error_message.as_deref(), Some("All symbols failed to fetch"));
    }

    #[tokio::test]
    async fn test_run_publishes_until_stopped() {
        let source = Arc::new(FixedMarket {
            state: Ok(MarketState::Regular),
            prices: HashMap::from([("AAPL", sample(110.0, 100.0))]),
        });
        let queue = LatestWinsQueue::new(10);
        let status = StatusBoard::in_memory();
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run(settings(&["AAPL"]), source, queue.clone(), status.clone(), stop_rx));

        let deadline = Instant::now() + Duration::from_secs(2);
        while queue.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let message = queue.drain_latest().and_then(|envelope| envelope.parse());
        assert!(matches!(message, Some(WorkerMessage::Market(update)) if update.status == FetchStatus::Ok));
        assert_eq!(status.get("market").unwrap()["status"], "ok");

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
