use chrono::Utc;
use std::{sync::Arc, time::Duration};
use ticker_engine::{
    BlockTextRenderer, ConfigStore, DataProvider, PanelDriver, StatusBoard, Ticker, TickerError,
    WorkerSupervisor,
};
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::{info, warn};

mod panel;
mod sources;

use panel::{HeadlessPanel, PreviewPanel};
use sources::{AlertFeed, EspnScores, YahooMarket, http_client};

/// Longest frame step fed to the scroll engine, so a stalled loop does not jump the rows.
const MAX_FRAME_DT: f64 = 0.25;

/// Minimum gap between repeated panel write warnings.
const WRITE_WARN_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), TickerError> {
    // Initialize logging
    init_logging();

    info!("Starting ticker-server");

    // Configurable via TICKER_CONFIG / TICKER_STATUS env vars
    let config_path = std::env::var("TICKER_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let status_path =
        std::env::var("TICKER_STATUS").unwrap_or_else(|_| "ticker_status.json".to_string());
    let store = ConfigStore::open(&config_path);

    let demo = std::env::var("TICKER_DEMO")
        .ok()
        .is_some_and(|value| matches!(value.trim(), "1" | "true" | "yes"))
        || store.config().demo_mode;

    let provider = if demo {
        info!("Demo mode: using canned data sources");
        DataProvider::demo()
    } else {
        let client = http_client();
        DataProvider::new(
            Arc::new(YahooMarket::new(client.clone())),
            Arc::new(AlertFeed::new(client.clone())),
            Arc::new(EspnScores::new(client)),
        )
    };

    // Panel initialisation failure is the only fatal startup error
    let mut panel: Box<dyn PanelDriver> = match std::env::var("TICKER_PREVIEW") {
        Ok(path) if !path.trim().is_empty() => Box::new(PreviewPanel::new(path.trim())),
        _ => Box::new(HeadlessPanel::default()),
    };
    let (width, height) = store.config().panel_size();
    panel.init(width, height)?;

    let supervisor = WorkerSupervisor::new(provider, StatusBoard::new(&status_path));
    let mut ticker = Ticker::new(
        store,
        supervisor,
        Box::new(BlockTextRenderer::default()),
        Utc::now(),
    );
    ticker.start();

    info!(config = %config_path, status = %status_path, width, height, tz = %ticker.config().ticker_tz, "ticker running");

    let mut shutdown = shutdown_signal();
    run(&mut ticker, panel.as_mut(), &mut shutdown).await;

    info!("Shutdown requested, stopping workers");
    ticker.shutdown().await;
    info!("ticker-server stopped");
    Ok(())
}

/// Paced frame loop. Returns once the shutdown flag is raised.
async fn run(ticker: &mut Ticker, panel: &mut dyn PanelDriver, shutdown: &mut watch::Receiver<bool>) {
    let mut fps = ticker.config().fps.max(1);
    let mut timer = frame_timer(fps);
    let mut panel_size = (ticker.frame().width(), ticker.frame().height());
    let mut last_frame = Instant::now();
    let mut last_write_warning: Option<Instant> = None;

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = timer.tick() => {}
        }

        let elapsed = last_frame.elapsed().as_secs_f64().min(MAX_FRAME_DT);
        last_frame = Instant::now();

        let report = ticker.tick(Utc::now(), elapsed);
        if let Some(state) = report.transition {
            info!(%state, presentation = ?report.presentation, "display transition");
        }

        let size = (ticker.frame().width(), ticker.frame().height());
        if size != panel_size {
            match panel.init(size.0, size.1) {
                Ok(()) => panel_size = size,
                Err(error) => warn!(%error, "failed to re-initialise panel after resize"),
            }
        }

        if let Err(error) = panel.write(ticker.frame()) {
            let due = last_write_warning.is_none_or(|at| at.elapsed() >= WRITE_WARN_INTERVAL);
            if due {
                warn!(%error, "panel write failed");
                last_write_warning = Some(Instant::now());
            }
        }

        let configured = ticker.config().fps.max(1);
        if configured != fps {
            info!(from = fps, to = configured, "frame rate changed");
            fps = configured;
            timer = frame_timer(fps);
        }
    }
}

fn frame_timer(fps: u32) -> tokio::time::Interval {
    let mut timer = interval(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

/// Raise the returned flag on Ctrl-C or SIGTERM.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                }
                Err(error) => {
                    warn!(%error, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown signal received");
        let _ = tx.send(true);
    });

    rx
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
