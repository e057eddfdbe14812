//! Data source seams used by the workers.
//!
//! Each source performs the raw fetch and normalisation for one concern. The workers own
//! cadence, filtering, status reporting and publishing.

use crate::{
    error::ProviderError,
    types::{GameState, League, MarketState, WeatherSnapshot},
};
use async_trait::async_trait;
use chrono::Utc;
use std::{sync::Arc, time::Duration};

/// Last price and previous close for one symbol, either of which may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceSample {
    pub last: Option<f64>,
    pub previous_close: Option<f64>,
}

#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Session state as reported by the source; [`MarketState::Unknown`] if it cannot tell.
    async fn market_state(&self) -> Result<MarketState, ProviderError>;

    async fn fetch_price(&self, symbol: &str) -> Result<PriceSample, ProviderError>;
}

/// Weather alert feed parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherQuery {
    pub url: String,
    pub timeout: Duration,
    pub include_watch: bool,
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// The most severe active alert, or an inactive snapshot.
    async fn fetch_alert(&self, query: &WeatherQuery) -> Result<WeatherSnapshot, ProviderError>;
}

#[async_trait]
pub trait ScoreboardSource: Send + Sync {
    /// Today's games for `league`, normalised to PREGAME/LIVE/FINAL.
    async fn fetch_games(&self, league: League) -> Result<Vec<GameState>, ProviderError>;
}

/// The three sources handed to the worker supervisor.
#[derive(Clone)]
pub struct DataProvider {
    pub market: Arc<dyn MarketSource>,
    pub weather: Arc<dyn WeatherSource>,
    pub scoreboard: Arc<dyn ScoreboardSource>,
}

impl std::fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProvider").finish_non_exhaustive()
    }
}

impl DataProvider {
    pub fn new(
        market: Arc<dyn MarketSource>,
        weather: Arc<dyn WeatherSource>,
        scoreboard: Arc<dyn ScoreboardSource>,
    ) -> Self {
        Self {
            market,
            weather,
            scoreboard,
        }
    }

    /// Canned sources for running without network access.
    pub fn demo() -> Self {
        let demo = Arc::new(DemoProvider);
        Self::new(demo.clone(), demo.clone(), demo)
    }
}

/// Offline source producing slowly drifting prices, clear weather and no games.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoProvider;

impl DemoProvider {
    /// Deterministic base price per symbol.
    fn base_price(symbol: &str) -> f64 {
        let seed = symbol.bytes().fold(7u64, |acc, byte| acc.wrapping_mul(31).wrapping_add(u64::from(byte)));
        50.0 + (seed % 45_000) as f64 / 10.0
    }
}

#[async_trait]
impl MarketSource for DemoProvider {
    async fn market_state(&self) -> Result<MarketState, ProviderError> {
        Ok(MarketState::Unknown)
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceSample, ProviderError> {
        let previous_close = Self::base_price(symbol);
        let phase = (Utc::now().timestamp() % 600) as f64 / 600.0 * std::f64::consts::TAU;
        let drift = (phase + previous_close).sin() * 0.02;
        Ok(PriceSample {
            last: Some(previous_close * (1.0 + drift)),
            previous_close: Some(previous_close),
        })
    }
}

#[async_trait]
impl WeatherSource for DemoProvider {
    async fn fetch_alert(&self, _: &WeatherQuery) -> Result<WeatherSnapshot, ProviderError> {
        Ok(WeatherSnapshot::inactive())
    }
}

#[async_trait]
impl ScoreboardSource for DemoProvider {
    async fn fetch_games(&self, _: League) -> Result<Vec<GameState>, ProviderError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_prices_stay_near_base() {
        let provider = DataProvider::demo();
        for symbol in ["AAPL", "^GSPC", "GC=F"] {
            let sample = provider.market.fetch_price(symbol).await.unwrap();
            let (last, previous) = (sample.last.unwrap(), sample.previous_close.unwrap());
            assert!(previous > 0.0);
            assert!((last / previous - 1.0).abs() <= 0.02 + f64::EPSILON, "{symbol}");
        }
        assert_eq!(provider.market.market_state().await.unwrap(), MarketState::Unknown);
    }

    #[tokio::test]
    async fn test_demo_weather_and_scoreboard_are_quiet() {
        let provider = DataProvider::demo();
        let query = WeatherQuery {
            url: String::new(),
            timeout: Duration::from_secs(1),
            include_watch: true,
        };
        assert!(!provider.weather.fetch_alert(&query).await.unwrap().active);
        assert!(provider.scoreboard.fetch_games(League::Nhl).await.unwrap().is_empty());
    }
}
