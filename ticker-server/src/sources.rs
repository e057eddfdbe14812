//! HTTP data sources.
//!
//! - Quotes from the Yahoo Finance chart endpoint.
//! - Scores from the public ESPN scoreboard JSON.
//! - Weather alerts from an Environment Canada style Atom/RSS feed. Only the `<title>` of each
//!   `<entry>` or `<item>` is inspected; no general XML parsing is attempted. English and French
//!   feeds are both understood.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;
use ticker_engine::{
    MarketSource, ProviderError, ScoreboardSource, WeatherSource,
    provider::{PriceSample, WeatherQuery},
    types::{GamePhase, GameState, League, MarketState, Severity, TeamScore, WeatherSnapshot},
};
use tracing::debug;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart/";
const ESPN_URL: &str = "https://site.api.espn.com/apis/site/v2/sports/";
const USER_AGENT: &str = concat!("ticker-server/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ALERT_LEN: usize = 80;

/// Shared HTTP client for every source.
pub fn http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

async fn fetch(client: &Client, url: Url, source_name: &'static str) -> Result<reqwest::Response, ProviderError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| ProviderError::Http {
            source_name,
            message: error.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status {
            source_name,
            status: status.as_u16(),
        });
    }
    Ok(response)
}

async fn get_json<T: DeserializeOwned>(client: &Client, url: Url, source_name: &'static str) -> Result<T, ProviderError> {
    fetch(client, url, source_name)
        .await?
        .json::<T>()
        .await
        .map_err(|error| ProviderError::Parse {
            source_name,
            message: error.to_string(),
        })
}

fn parse_url(raw: &str, source_name: &'static str) -> Result<Url, ProviderError> {
    Url::parse(raw).map_err(|error| ProviderError::Parse {
        source_name,
        message: format!("invalid url {raw}: {error}"),
    })
}

// ----------------------------------------------------------------------------
// Markets
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    #[serde(default)]
    result: Option<Vec<YahooChartResult>>,
}

#[derive(Debug, Deserialize)]
struct YahooChartResult {
    meta: YahooMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
}

impl From<YahooMeta> for PriceSample {
    fn from(meta: YahooMeta) -> Self {
        Self {
            last: meta.regular_market_price,
            previous_close: meta.previous_close.or(meta.chart_previous_close),
        }
    }
}

#[derive(Debug, Clone)]
pub struct YahooMarket {
    client: Client,
}

impl YahooMarket {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketSource for YahooMarket {
    // The chart endpoint does not report the session; the worker falls back to the schedule
    async fn market_state(&self) -> Result<MarketState, ProviderError> {
        Ok(MarketState::Unknown)
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceSample, ProviderError> {
        let mut url = parse_url(YAHOO_CHART_URL, "yahoo")?;
        url.path_segments_mut()
            .map_err(|()| ProviderError::Parse {
                source_name: "yahoo",
                message: "chart url cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .push(symbol);
        url.query_pairs_mut()
            .append_pair("range", "5d")
            .append_pair("interval", "1d");

        let response: YahooChartResponse = get_json(&self.client, url, "yahoo").await?;
        response
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .map(|result| PriceSample::from(result.meta))
            .ok_or_else(|| ProviderError::NoData(symbol.to_string()))
    }
}

// ----------------------------------------------------------------------------
// Scoreboard
// ----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct EspnScoreboard {
    #[serde(default)]
    events: Vec<EspnEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct EspnEvent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    competitions: Vec<EspnCompetition>,
}

#[derive(Debug, Default, Deserialize)]
struct EspnCompetition {
    #[serde(default)]
    status: EspnStatus,
    #[serde(default)]
    competitors: Vec<EspnCompetitor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EspnStatus {
    #[serde(default)]
    period: u32,
    #[serde(default)]
    display_clock: String,
    #[serde(default, rename = "type")]
    kind: EspnStatusType,
}

#[derive(Debug, Default, Deserialize)]
struct EspnStatusType {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EspnCompetitor {
    #[serde(default)]
    home_away: String,
    #[serde(default)]
    score: String,
    #[serde(default)]
    team: EspnTeam,
}

#[derive(Debug, Default, Deserialize)]
struct EspnTeam {
    #[serde(default)]
    abbreviation: String,
}

impl From<&EspnCompetitor> for TeamScore {
    fn from(competitor: &EspnCompetitor) -> Self {
        Self {
            code: competitor.team.abbreviation.to_uppercase(),
            score: competitor.score.trim().parse().unwrap_or(0),
        }
    }
}

/// ESPN dates come as `2025-03-05T00:00Z`, without seconds.
fn parse_start(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|date| date.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn period_label(league: League, period: u32) -> String {
    let regulation = match league {
        League::Nhl => 3,
        League::Nfl => 4,
    };
    if period > regulation {
        "OT".to_string()
    } else {
        period.to_string()
    }
}

fn normalise(league: League, board: EspnScoreboard) -> Vec<GameState> {
    board
        .events
        .into_iter()
        .filter_map(|event| {
            let competition = event.competitions.into_iter().next()?;
            let state = match competition.status.kind.state.to_lowercase().as_str() {
                "pre" => GamePhase::Pregame,
                "in" => GamePhase::Live,
                "post" => GamePhase::Final,
                other => {
                    debug!(%league, id = %event.id, state = other, "skipping game in unknown state");
                    return None;
                }
            };
            let side = |name: &str| {
                competition
                    .competitors
                    .iter()
                    .find(|competitor| competitor.home_away == name)
                    .map(TeamScore::from)
            };

            Some(GameState {
                id: event.id.clone(),
                state,
                home: side("home")?,
                away: side("away")?,
                clock: competition.status.display_clock.clone(),
                period: period_label(league, competition.status.period),
                start_time: event.date.as_deref().and_then(parse_start),
                minutes_until_start: None,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct EspnScores {
    client: Client,
}

impl EspnScores {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ScoreboardSource for EspnScores {
    async fn fetch_games(&self, league: League) -> Result<Vec<GameState>, ProviderError> {
        let sport = match league {
            League::Nhl => "hockey/nhl",
            League::Nfl => "football/nfl",
        };
        let url = parse_url(&format!("{ESPN_URL}{sport}/scoreboard"), "espn")?;
        let board: EspnScoreboard = get_json(&self.client, url, "espn").await?;
        Ok(normalise(league, board))
    }
}

// ----------------------------------------------------------------------------
// Weather
// ----------------------------------------------------------------------------

/// Strip diacritics so accented titles match and render on the panel, e.g. "é" becomes "e".
fn ascii_fold(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Severity named by an alert title, if it is an active alert at all.
///
/// Colour-coded titles rank by colour: red and orange are warnings, yellow is an advisory.
fn classify(title: &str) -> Option<Severity> {
    let title = ascii_fold(title).to_lowercase();
    let words = title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>();
    let is = |terms: &[&str]| words.iter().any(|word| terms.contains(word));
    let starts = |terms: &[&str]| {
        words
            .iter()
            .any(|word| terms.iter().any(|term| word.starts_with(term)))
    };

    let negated = ["no watch", "no warning", "no advisory", "no statement"]
        .iter()
        .any(|phrase| title.contains(phrase))
        || starts(&["aucun"]);
    if negated || is(&["ended", "termine"]) {
        return None;
    }

    let warning = starts(&["warning", "avertissement"]);
    let advisory = starts(&["advisor", "avis"]);
    if (warning || advisory) && is(&["red", "orange", "rouge"]) {
        Some(Severity::Warning)
    } else if (warning || advisory) && is(&["yellow", "jaune"]) {
        Some(Severity::Advisory)
    } else if warning {
        Some(Severity::Warning)
    } else if advisory {
        Some(Severity::Advisory)
    } else if starts(&["watch", "veille"]) {
        Some(Severity::Watch)
    } else if starts(&["statement"]) || title.contains("bulletin meteorologique special") {
        Some(Severity::Statement)
    } else {
        None
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Bodies of every `<tag>` element, in document order.
fn elements<'a>(document: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    document
        .split(open.as_str())
        .skip(1)
        .filter(|chunk| chunk.starts_with(['>', ' ', '\t', '\r', '\n']))
        .filter_map(|chunk| {
            let body = &chunk[chunk.find('>')? + 1..];
            Some(&body[..body.find(close.as_str())?])
        })
        .collect()
}

/// Title of every Atom `<entry>`, or of every RSS `<item>` when the feed has no entries.
/// Feed and channel titles are never alerts.
fn titles(document: &str) -> Vec<String> {
    let mut entries = elements(document, "entry");
    if entries.is_empty() {
        entries = elements(document, "item");
    }

    entries
        .into_iter()
        .filter_map(|entry| elements(entry, "title").first().copied())
        .map(|text| {
            let text = text
                .trim()
                .trim_start_matches("<![CDATA[")
                .trim_end_matches("]]>");
            ascii_fold(&decode_entities(&text.split_whitespace().collect::<Vec<_>>().join(" ")))
        })
        .collect()
}

fn truncate(title: String) -> String {
    if title.chars().count() <= MAX_ALERT_LEN {
        return title;
    }
    let cut = title.chars().take(MAX_ALERT_LEN).collect::<String>();
    format!("{}...", cut.trim_end())
}

/// First warning in the feed, or with `include_watch` the first lesser alert.
fn parse_alert(document: &str, include_watch: bool) -> WeatherSnapshot {
    titles(document)
        .into_iter()
        .find_map(|title| match classify(&title)? {
            Severity::Warning => Some((title, Severity::Warning)),
            severity if include_watch => Some((title, severity)),
            _ => None,
        })
        .map(|(title, severity)| WeatherSnapshot {
            active: true,
            message: truncate(title),
            severity,
        })
        .unwrap_or_else(WeatherSnapshot::inactive)
}

#[derive(Debug, Clone)]
pub struct AlertFeed {
    client: Client,
}

impl AlertFeed {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WeatherSource for AlertFeed {
    async fn fetch_alert(&self, query: &WeatherQuery) -> Result<WeatherSnapshot, ProviderError> {
        let url = parse_url(&query.url, "weather")?;
        let document = fetch(&self.client, url, "weather")
            .await?
            .text()
            .await
            .map_err(|error| ProviderError::Parse {
                source_name: "weather",
                message: error.to_string(),
            })?;
        Ok(parse_alert(&document, query.include_watch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        struct TestCase {
            title: &'static str,
            expected: Option<Severity>,
        }

        let tests = vec![
            TestCase {
                // TC0: plain warning
                title: "Snowfall warning in effect, Montreal",
                expected: Some(Severity::Warning),
            },
            TestCase {
                // TC1: colour-coded orange advisory escalates
                title: "Orange advisory - freezing rain",
                expected: Some(Severity::Warning),
            },
            TestCase {
                // TC2: yellow advisory
                title: "Yellow advisory - wind",
                expected: Some(Severity::Advisory),
            },
            TestCase {
                // TC3: watch
                title: "Severe thunderstorm watch in effect",
                expected: Some(Severity::Watch),
            },
            TestCase {
                // TC4: special statement
                title: "Special weather statement in effect",
                expected: Some(Severity::Statement),
            },
            TestCase {
                // TC5: nothing active
                title: "No watches or warnings in effect, Montreal",
                expected: None,
            },
            TestCase {
                // TC6: ended alert
                title: "Snowfall warning ended",
                expected: None,
            },
            TestCase {
                // TC7: yellow warning ranks as an advisory
                title: "Yellow warning - rainfall",
                expected: Some(Severity::Advisory),
            },
            TestCase {
                // TC8: red warning
                title: "Red warning - extreme heat",
                expected: Some(Severity::Warning),
            },
            TestCase {
                // TC9: French warning
                title: "Avertissement de pluie en vigueur, Montréal",
                expected: Some(Severity::Warning),
            },
            TestCase {
                // TC10: French yellow warning
                title: "Avertissement jaune - pluie",
                expected: Some(Severity::Advisory),
            },
            TestCase {
                // TC11: French advisory with an accented title
                title: "Avis de chaleur en vigueur, Québec",
                expected: Some(Severity::Advisory),
            },
            TestCase {
                // TC12: French watch
                title: "Veille d'orages violents en vigueur",
                expected: Some(Severity::Watch),
            },
            TestCase {
                // TC13: French special statement
                title: "Bulletin météorologique spécial en vigueur",
                expected: Some(Severity::Statement),
            },
            TestCase {
                // TC14: French all clear
                title: "Aucune veille ou alerte en vigueur, Montréal",
                expected: None,
            },
            TestCase {
                // TC15: "red" inside another word is not a colour
                title: "Reduced visibility advisory",
                expected: Some(Severity::Advisory),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(classify(test.title), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_alert_from_atom_feed() {
        let feed = r#"<?xml version="1.0" encoding="utf-8"?>
            <feed xmlns="http://www.w3.org/2005/Atom">
              <title>Montreal - Weather Alerts - Environment Canada</title>
              <entry><title>Severe thunderstorm watch in effect, Montreal</title></entry>
              <entry><title>Rainfall   warning &amp; flooding risk, Montreal</title></entry>
            </feed>"#;

        assert_eq!(parse_alert(feed, false), WeatherSnapshot {
            active: true,
            message: "Rainfall warning & flooding risk, Montreal".to_string(),
            severity: Severity::Warning,
        });
        assert_eq!(parse_alert(feed, true).severity, Severity::Watch);

        let quiet = "<rss><channel><title>Alerts</title><item><title>No watches or warnings in effect</title></item></channel></rss>";
        assert!(!parse_alert(quiet, true).active);
    }

    #[test]
    fn test_parse_alert_ignores_feed_title() {
        struct TestCase {
            document: &'static str,
            expected: WeatherSnapshot,
        }

        let tests = vec![
            TestCase {
                // TC0: Atom feed title names warnings, the only entry is all clear
                document: r#"<feed xmlns="http://www.w3.org/2005/Atom">
                      <title>Environment Canada Weather Warnings - Montreal</title>
                      <entry><title type="text">No watches or warnings in effect, Montreal</title></entry>
                    </feed>"#,
                expected: WeatherSnapshot::inactive(),
            },
            TestCase {
                // TC1: RSS channel title names warnings, the only item is all clear
                document: "<rss><channel><title>Weather Warnings</title>\
                    <item><title>No watches or warnings in effect</title></item></channel></rss>",
                expected: WeatherSnapshot::inactive(),
            },
            TestCase {
                // TC2: French entry is folded for display
                document: r#"<feed><title>Avertissements</title>
                      <entry><title><![CDATA[Avertissement de pluie en vigueur, Montréal]]></title></entry>
                    </feed>"#,
                expected: WeatherSnapshot {
                    active: true,
                    message: "Avertissement de pluie en vigueur, Montreal".to_string(),
                    severity: Severity::Warning,
                },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(parse_alert(test.document, true), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_normalise_espn_scoreboard() {
        let board: EspnScoreboard = serde_json::from_str(
            r#"{
                "events": [
                    {
                        "id": "401",
                        "date": "2025-03-05T00:00Z",
                        "competitions": [{
                            "status": { "period": 4, "displayClock": "3:12", "type": { "state": "in" } },
                            "competitors": [
                                { "homeAway": "home", "score": "3", "team": { "abbreviation": "mtl" } },
                                { "homeAway": "away", "score": "2", "team": { "abbreviation": "TOR" } }
                            ]
                        }]
                    },
                    { "id": "402", "competitions": [{ "status": { "type": { "state": "postponed" } } }] },
                    { "id": "403", "competitions": [{ "status": { "type": { "state": "pre" } }, "competitors": [] }] }
                ]
            }"#,
        )
        .unwrap();

        let games = normalise(League::Nhl, board);
        assert_eq!(games.len(), 1);
        let game = &games[0];
        assert_eq!(game.state, GamePhase::Live);
        assert_eq!((game.home.code.as_str(), game.home.score), ("MTL", 3));
        assert_eq!((game.away.code.as_str(), game.away.score), ("TOR", 2));
        assert_eq!(game.period, "OT");
        assert_eq!(game.start_time, parse_start("2025-03-05T00:00:00Z"));
        assert!(game.start_time.is_some());
    }

    #[test]
    fn test_yahoo_meta_prefers_previous_close() {
        let response: YahooChartResponse = serde_json::from_str(
            r#"{"chart":{"result":[{"meta":{"regularMarketPrice":110.5,"chartPreviousClose":99.0,"previousClose":100.0}}],"error":null}}"#,
        )
        .unwrap();
        let meta = response.chart.result.unwrap().into_iter().next().unwrap().meta;
        assert_eq!(PriceSample::from(meta), PriceSample {
            last: Some(110.5),
            previous_close: Some(100.0),
        });
    }
}
