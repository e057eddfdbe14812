use crate::{
    config::{MAX_GAME_WINDOW_MIN, TickerConfig},
    provider::ScoreboardSource,
    queue::LatestWinsQueue,
    types::{Envelope, GamePhase, GameState, League, ScoreboardSnapshot, ScoreboardStatus, TeamScore},
    workers::status::{StatusBoard, WorkerStatus},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use itertools::Itertools;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lower bound on the scoreboard poll cadence.
pub const MIN_CADENCE: Duration = Duration::from_secs(3);

/// Synthetic live game emitted in test mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreboardTest {
    pub league: League,
    pub home: String,
    pub away: String,
    /// `None` runs until the worker is restarted.
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreboardSettings {
    pub leagues: Vec<League>,
    pub nhl_teams: Vec<String>,
    pub nfl_teams: Vec<String>,
    pub poll_cadence: Duration,
    pub live_refresh: Duration,
    pub pregame_window_min: i64,
    pub postgame_delay_min: i64,
    pub include_others: bool,
    pub only_my_teams: bool,
    pub max_games: usize,
    pub test: Option<ScoreboardTest>,
}

impl ScoreboardSettings {
    pub fn from_config(config: &TickerConfig) -> Self {
        let test = config.scoreboard_test.then(|| {
            let league = League::parse(&config.scoreboard_test_league).unwrap_or(League::Nhl);
            let home = Some(config.scoreboard_test_home.trim().to_uppercase())
                .filter(|home| !home.is_empty())
                .or_else(|| config.my_teams(league).first().cloned())
                .unwrap_or_else(|| match league {
                    League::Nhl => "MTL".to_string(),
                    League::Nfl => "NE".to_string(),
                });
            let away = Some(config.scoreboard_test_away.trim().to_uppercase())
                .filter(|away| !away.is_empty())
                .unwrap_or_else(|| "OPP".to_string());
            ScoreboardTest {
                league,
                home,
                away,
                duration: (config.scoreboard_test_duration > 0)
                    .then(|| Duration::from_secs(config.scoreboard_test_duration)),
            }
        });

        Self {
            leagues: config
                .scoreboard_leagues
                .iter()
                .filter_map(|league| League::parse(league))
                .unique()
                .collect(),
            nhl_teams: config.scoreboard_nhl_teams.clone(),
            nfl_teams: config.scoreboard_nfl_teams.clone(),
            poll_cadence: Duration::from_secs(config.scoreboard_poll_cadence),
            live_refresh: Duration::from_secs(config.scoreboard_live_refresh),
            pregame_window_min: config.scoreboard_pregame_window_min.clamp(0, MAX_GAME_WINDOW_MIN),
            postgame_delay_min: config.scoreboard_postgame_delay_min.clamp(0, MAX_GAME_WINDOW_MIN),
            include_others: config.scoreboard_include_others,
            only_my_teams: config.scoreboard_only_my_teams,
            max_games: config.scoreboard_max_games,
            test,
        }
    }

    fn my_teams(&self, league: League) -> &[String] {
        match league {
            League::Nhl => &self.nhl_teams,
            League::Nfl => &self.nfl_teams,
        }
    }
}

/// Games worth showing for one league, plus whether any followed team plays today.
///
/// FINAL games only count towards "game today" and expire `postgame delay` after their
/// nominal end. PREGAME games are kept inside the pregame window, annotated with the minutes
/// until start. Ordering: live mine, live others, pregame mine, pregame others; other teams
/// only when included and not restricted to my teams.
pub fn select_games(
    league: League,
    games: Vec<GameState>,
    settings: &ScoreboardSettings,
    now: DateTime<Utc>,
) -> (Vec<GameState>, bool) {
    let mine = settings.my_teams(league);
    let postgame = ChronoDuration::minutes(league.game_minutes() + settings.postgame_delay_min);
    let pregame = ChronoDuration::minutes(settings.pregame_window_min);

    let games = games
        .into_iter()
        .filter(|game| match game.state {
            GamePhase::Final => game.start_time.is_some_and(|start| now <= start + postgame),
            _ => true,
        })
        .collect::<Vec<_>>();

    let game_today = games.iter().any(|game| game.involves(mine));

    let (live_mine, live_others): (Vec<_>, Vec<_>) = games
        .iter()
        .filter(|game| game.is_live())
        .cloned()
        .partition(|game| game.involves(mine));

    let (pre_mine, pre_others): (Vec<_>, Vec<_>) = games
        .iter()
        .filter(|game| game.state == GamePhase::Pregame)
        .filter_map(|game| {
            let start = game.start_time?;
            (now >= start - pregame).then(|| GameState {
                minutes_until_start: Some((start - now).num_minutes()),
                ..game.clone()
            })
        })
        .partition(|game| game.involves(mine));

    let others = settings.include_others && !settings.only_my_teams;
    let ordered = live_mine
        .into_iter()
        .chain(live_others.into_iter().filter(|_| others))
        .chain(pre_mine)
        .chain(pre_others.into_iter().filter(|_| others))
        .take(settings.max_games)
        .collect();

    (ordered, game_today)
}

/// Live game whose score advances with `elapsed`, cycling every ten minutes.
pub fn test_game(test: &ScoreboardTest, elapsed: Duration) -> GameState {
    let elapsed = elapsed.as_secs() % 600;
    let minute = (elapsed / 2) % 20;
    let second = (elapsed * 3) % 60;
    let period = match elapsed {
        361.. => 3,
        181.. => 2,
        _ => 1,
    };
    GameState {
        id: "TEST-1".to_string(),
        state: GamePhase::Live,
        home: TeamScore {
            code: test.home.clone(),
            score: (elapsed / 120) as u32,
        },
        away: TeamScore {
            code: test.away.clone(),
            score: (elapsed / 180) as u32,
        },
        clock: format!("{:02}:{:02}", 19 - minute, 59 - second),
        period: period.to_string(),
        start_time: None,
        minutes_until_start: None,
    }
}

/// Result of one scoreboard cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    pub envelopes: Vec<Envelope>,
    pub any_live: bool,
    pub record: WorkerStatus,
}

/// Fetch every league (or emit the test game) and build the messages to publish.
pub async fn run_cycle(
    source: &dyn ScoreboardSource,
    settings: &ScoreboardSettings,
    started: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Cycle {
    let elapsed = (now - started).to_std().unwrap_or_default();
    let test = settings
        .test
        .as_ref()
        .filter(|test| test.duration.is_none_or(|duration| elapsed <= duration));

    let mut snapshots = Vec::new();
    let mut game_today = false;
    let mut errors = Vec::new();

    if let Some(test) = test {
        snapshots.push(ScoreboardSnapshot {
            league: test.league,
            games: vec![test_game(test, elapsed)],
        });
        game_today = true;
    } else {
        for league in &settings.leagues {
            match source.fetch_games(*league).await {
                Ok(games) => {
                    let (games, today) = select_games(*league, games, settings, now);
                    game_today |= today;
                    snapshots.push(ScoreboardSnapshot {
                        league: *league,
                        games,
                    });
                }
                Err(error) if error.is_fault() => {
                    warn!(%league, %error, "scoreboard fetch failed");
                    errors.push(format!("{league} fetch failed: {error}"));
                }
                Err(error) => debug!(%league, %error, "no scoreboard data"),
            }
        }
    }

    let games = snapshots.iter().flat_map(|snapshot| &snapshot.games);
    let total_games = games.clone().count();
    let live_games = games.clone().filter(|game| game.is_live()).count();
    let pregame_games = games.filter(|game| game.state == GamePhase::Pregame).count();

    let status = if !errors.is_empty() {
        "error"
    } else if live_games > 0 {
        "live"
    } else if total_games > 0 {
        "ok"
    } else {
        "idle"
    };
    let record = WorkerStatus::new(status, (!errors.is_empty()).then(|| errors.join(" & ")))
        .with_detail("total_games", total_games)
        .with_detail("live_games", live_games)
        .with_detail("pregame_games", pregame_games)
        .with_detail("game_today", game_today)
        .with_detail("test_mode", test.is_some());

    let mut envelopes = snapshots
        .iter()
        .map(|snapshot| Envelope::new("scoreboard", snapshot))
        .collect::<Vec<_>>();
    envelopes.push(Envelope::new("scoreboard_status", &ScoreboardStatus { game_today }));

    Cycle {
        envelopes,
        any_live: live_games > 0,
        record,
    }
}

/// Poll the scoreboard until `stop` fires, at the live cadence while any game is live.
pub async fn run(
    settings: ScoreboardSettings,
    source: Arc<dyn ScoreboardSource>,
    queue: LatestWinsQueue<Envelope>,
    status: StatusBoard,
    mut stop: watch::Receiver<bool>,
) {
    info!(leagues = ?settings.leagues, test = settings.test.is_some(), "scoreboard worker started");

    let started = Utc::now();
    let mut cadence = Duration::ZERO;

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            next = async {
                tokio::time::sleep(cadence).await;
                let cycle = run_cycle(source.as_ref(), &settings, started, Utc::now()).await;
                status.update("scoreboard", cycle.record);
                for envelope in cycle.envelopes {
                    queue.push(envelope);
                }
                if settings.test.is_some() {
                    MIN_CADENCE
                } else if cycle.any_live {
                    settings.live_refresh
                } else {
                    settings.poll_cadence
                }
            } => cadence = next.max(MIN_CADENCE),
        }
    }

    info!("scoreboard worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 20, 0, 0).unwrap()
    }

    fn game(id: &str, state: GamePhase, home: &str, away: &str, start_offset_min: Option<i64>) -> GameState {
        GameState {
            id: id.to_string(),
            state,
            home: TeamScore {
                code: home.to_string(),
                score: 0,
            },
            away: TeamScore {
                code: away.to_string(),
                score: 0,
            },
            clock: String::new(),
            period: String::new(),
            start_time: start_offset_min.map(|minutes| now() + ChronoDuration::minutes(minutes)),
            minutes_until_start: None,
        }
    }

    fn settings(include_others: bool, only_my_teams: bool) -> ScoreboardSettings {
        ScoreboardSettings {
            leagues: vec![League::Nhl],
            nhl_teams: vec!["MTL".to_string()],
            nfl_teams: vec!["NE".to_string()],
            poll_cadence: Duration::from_secs(60),
            live_refresh: Duration::from_secs(45),
            pregame_window_min: 30,
            postgame_delay_min: 5,
            include_others,
            only_my_teams,
            max_games: 3,
            test: None,
        }
    }

    fn ids(games: &[GameState]) -> Vec<&str> {
        games.iter().map(|game| game.id.as_str()).collect()
    }

    #[test]
    fn test_select_games_ordering_and_filters() {
        struct TestCase {
            settings: ScoreboardSettings,
            expected: Vec<&'static str>,
        }

        let games = vec![
            game("pre-other", GamePhase::Pregame, "BOS", "NYR", Some(10)),
            game("live-other", GamePhase::Live, "BOS", "TOR", Some(-60)),
            game("pre-mine", GamePhase::Pregame, "MTL", "OTT", Some(20)),
            game("pre-mine-far", GamePhase::Pregame, "MTL", "OTT", Some(90)),
            game("live-mine", GamePhase::Live, "TOR", "MTL", Some(-30)),
            game("final-recent", GamePhase::Final, "MTL", "BUF", Some(-150)),
        ];

        let tests = vec![
            TestCase {
                // TC0: my teams only
                settings: settings(true, true),
                expected: vec!["live-mine", "pre-mine"],
            },
            TestCase {
                // TC1: others included, trimmed to 3
                settings: settings(true, false),
                expected: vec!["live-mine", "live-other", "pre-mine"],
            },
            TestCase {
                // TC2: others excluded by include flag
                settings: settings(false, false),
                expected: vec!["live-mine", "pre-mine"],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let (actual, game_today) = select_games(League::Nhl, games.clone(), &test.settings, now());
            assert_eq!(ids(&actual), test.expected, "TC{} failed", index);
            assert!(game_today, "TC{} failed", index);
        }
    }

    #[test]
    fn test_pregame_annotation_and_postgame_expiry() {
        let games = vec![
            game("pre", GamePhase::Pregame, "MTL", "OTT", Some(20)),
            game("final-old", GamePhase::Final, "MTL", "BUF", Some(-156)),
        ];
        let (selected, game_today) = select_games(League::Nhl, games, &settings(false, true), now());
        assert_eq!(selected[0].minutes_until_start, Some(20));
        assert!(game_today);

        let only_final = vec![game("final-old", GamePhase::Final, "MTL", "BUF", Some(-156))];
        let (selected, game_today) = select_games(League::Nhl, only_final, &settings(false, true), now());
        assert!(selected.is_empty());
        assert!(!game_today);
    }

    #[test]
    fn test_test_game_progression() {
        let test = ScoreboardTest {
            league: League::Nhl,
            home: "MTL".to_string(),
            away: "TOR".to_string(),
            duration: None,
        };
        let start = test_game(&test, Duration::ZERO);
        assert_eq!((start.home.score, start.away.score), (0, 0));
        assert_eq!(start.clock, "19:59");
        assert_eq!(start.period, "1");

        let later = test_game(&test, Duration::from_secs(365));
        assert_eq!((later.home.score, later.away.score), (3, 2));
        assert_eq!(later.period, "3");
        assert!(later.is_live());
    }

    struct FixedScoreboard;

    #[async_trait]
    impl ScoreboardSource for FixedScoreboard {
        async fn fetch_games(&self, league: League) -> Result<Vec<GameState>, ProviderError> {
            match league {
                League::Nhl => Ok(vec![game("live-mine", GamePhase::Live, "MTL", "TOR", Some(-30))]),
                League::Nfl => Err(ProviderError::Status {
                    source_name: "scoreboard",
                    status: 502,
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_run_cycle_publishes_status_message() {
        let mut settings = settings(false, true);
        settings.leagues = vec![League::Nhl, League::Nfl];

        let cycle = run_cycle(&FixedScoreboard, &settings, now(), now()).await;
        let kinds = cycle
            .envelopes
            .iter()
            .map(|envelope| envelope.kind.as_str())
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec!["scoreboard", "scoreboard_status"]);
        assert!(cycle.any_live);
        assert_eq!(cycle.record.status, "error");
        assert_eq!(cycle.record.details["live_games"], 1);
    }

    #[tokio::test]
    async fn test_run_cycle_test_mode_expires() {
        let mut settings = settings(false, true);
        settings.test = Some(ScoreboardTest {
            league: League::Nhl,
            home: "MTL".to_string(),
            away: "OPP".to_string(),
            duration: Some(Duration::from_secs(60)),
        });

        let cycle = run_cycle(&FixedScoreboard, &settings, now(), now()).await;
        assert_eq!(cycle.record.details["test_mode"], true);

        let later = now() + ChronoDuration::seconds(61);
        let cycle = run_cycle(&FixedScoreboard, &settings, now(), later).await;
        assert_eq!(cycle.record.details["test_mode"], false);
    }
}
