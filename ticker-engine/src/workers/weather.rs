use crate::{
    config::TickerConfig,
    error::ProviderError,
    provider::{WeatherQuery, WeatherSource},
    queue::LatestWinsQueue,
    types::{Envelope, Severity, WeatherSnapshot},
    workers::status::{StatusBoard, WorkerStatus},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior, interval, timeout},
};
use tracing::{debug, info, warn};

const FORCED_TEXT: &str = "TEST WEATHER WARNING";

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSettings {
    pub query: WeatherQuery,
    pub refresh: Duration,
    pub force_active: bool,
    pub force_text: String,
}

impl WeatherSettings {
    pub fn from_config(config: &TickerConfig) -> Self {
        Self {
            query: WeatherQuery {
                url: config.weather_rss_url.clone(),
                timeout: Duration::from_secs_f64(config.weather_timeout.clamp(0.5, 60.0)),
                include_watch: config.weather_include_watch,
            },
            refresh: Duration::from_secs(config.weather_refresh_sec.max(10)),
            force_active: config.weather_force_active,
            force_text: config.weather_force_text.trim().to_string(),
        }
    }
}

/// Fetch (or synthesise) one weather snapshot.
pub async fn fetch_snapshot(source: &dyn WeatherSource, settings: &WeatherSettings) -> (WeatherSnapshot, WorkerStatus) {
    let started = Instant::now();

    if settings.force_active {
        let message = if settings.force_text.is_empty() {
            FORCED_TEXT.to_string()
        } else {
            settings.force_text.clone()
        };
        let snapshot = WeatherSnapshot {
            active: true,
            message,
            severity: Severity::Warning,
        };
        let record = WorkerStatus::new("active", None).with_detail("severity", Severity::Warning.as_str());
        return (snapshot, record);
    }

    let result = timeout(settings.query.timeout, source.fetch_alert(&settings.query))
        .await
        .unwrap_or_else(|_| {
            Err(ProviderError::Http {
                source_name: "weather",
                message: "request timed out".to_string(),
            })
        });

    let (snapshot, status, error) = match result {
        Ok(snapshot) if snapshot.severity == Severity::Watch && !settings.query.include_watch => {
            debug!(message = %snapshot.message, "ignoring weather watch");
            (WeatherSnapshot::inactive(), "ok", None)
        }
        Ok(snapshot) => {
            let status = if snapshot.active { "active" } else { "ok" };
            (snapshot, status, None)
        }
        Err(error) => {
            warn!(%error, "weather fetch failed");
            (WeatherSnapshot::inactive(), "error", Some(format!("Connection failed: {error}")))
        }
    };

    let severity = if snapshot.active { snapshot.severity } else { Severity::None };
    let record = WorkerStatus::new(status, error)
        .with_detail("severity", severity.as_str())
        .with_detail(
            "fetch_duration_sec",
            (started.elapsed().as_secs_f64() * 100.0).round() / 100.0,
        );
    (snapshot, record)
}

/// Poll the alert feed every `settings.refresh` until `stop` fires.
pub async fn run(
    settings: WeatherSettings,
    source: Arc<dyn WeatherSource>,
    queue: LatestWinsQueue<Envelope>,
    status: StatusBoard,
    mut stop: watch::Receiver<bool>,
) {
    info!(url = %settings.query.url, forced = settings.force_active, "weather worker started");

    let mut timer = interval(settings.refresh);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = async {
                timer.tick().await;
                let (snapshot, record) = fetch_snapshot(source.as_ref(), &settings).await;
                status.update("weather", record);
                queue.push(Envelope::new("weather", &snapshot));
            } => {}
        }
    }

    info!("weather worker stopped");
}
