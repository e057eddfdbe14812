/// Ticker Engine - Display Orchestration for LED Ticker Signs
///
/// This library drives a scrolling LED sign that mixes market quotes, weather alerts and live
/// sports scores:
/// - Background workers poll the data sources and publish into bounded latest-wins queues
/// - The [`Ticker`] drains those queues once per frame and decides what the panel shows
/// - A hot-reloaded JSON document configures everything, restarting only the affected workers
///
/// The library includes:
/// - Typed configuration with per-key hot-reload categories
/// - The display state machine (ticker, hourly preroll, market banners, scoreboard)
/// - Per-row scroll cursors with weather, market and message banner scheduling
/// - Score alerts, goal flash, operator overrides and night-mode dimming
/// - A frame buffer and the text renderer / panel driver seams
pub mod alerts;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod overrides;
pub mod provider;
pub mod queue;
pub mod render;
pub mod schedule;
pub mod scroll;
pub mod types;
pub mod weather;
pub mod workers;

// Re-export commonly used types for convenience
pub use config::{Category, ChangeSet, ConfigStore, TickerConfig};
pub use display::{DisplayState, PrerollPresentation, PrerollReason};
pub use engine::{Presentation, TickReport, Ticker};
pub use error::{ConfigError, PanelError, ProviderError, TickerError};
pub use overrides::OverrideMode;
pub use provider::{DataProvider, DemoProvider, MarketSource, ScoreboardSource, WeatherSource};
pub use queue::LatestWinsQueue;
pub use render::{BlockTextRenderer, FrameBuffer, PanelDriver, Rgb, TextRenderer};
pub use workers::{StatusBoard, WorkerKind, WorkerStatus, WorkerSupervisor};
