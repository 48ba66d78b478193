#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use prop_ingestion::clock::ManualClock;
use prop_ingestion::contextual::{GameLine, GameLogSource, StatGroup};
use prop_ingestion::error::{Result, ServiceError};
use prop_ingestion::matchups::ScheduleSource;
use prop_ingestion::odds::OddsApiEvent;
use prop_ingestion::props::{FairProbs, PriceTick, PropBatch, PropRecord, PropSource};
use prop_ingestion::teams::League;

pub fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2025, 7, 4, 16, 0, 0).unwrap())
}

pub fn event(id: &str, away: &str, home: &str) -> OddsApiEvent {
    OddsApiEvent {
        id: id.to_string(),
        sport_key: "baseball_mlb".to_string(),
        away_team: away.to_string(),
        home_team: home.to_string(),
        commence_time: Some(Utc.with_ymd_and_hms(2025, 7, 4, 23, 5, 0).unwrap()),
        ..Default::default()
    }
}

/// HOU @ SEA and BAL @ CLE.
pub fn two_game_slate() -> Vec<OddsApiEvent> {
    vec![
        event("g1", "Houston Astros", "Seattle Mariners"),
        event("g2", "Baltimore Orioles", "Cleveland Guardians"),
    ]
}

pub fn prop(player: &str, team: &str, stat: &str) -> PropRecord {
    let over = PriceTick {
        book: "draftkings".to_string(),
        price: -120,
    };
    let under = PriceTick {
        book: "fanduel".to_string(),
        price: 100,
    };
    PropRecord {
        player: player.to_string(),
        team: team.to_string(),
        stat: stat.to_string(),
        stat_label: stat.to_string(),
        line: Some(0.5),
        fair: FairProbs::from_ticks(Some(&over), Some(&under)),
        over: Some(over),
        under: Some(under),
        event_id: String::new(),
        contextual: None,
        ai: Default::default(),
    }
}

/// 119 props split over HOU, SEA, BAL and CLE plus one MIN prop.
pub fn scenario_props() -> Vec<PropRecord> {
    let teams = ["HOU", "SEA", "BAL", "CLE"];
    let mut props: Vec<PropRecord> = (0..119)
        .map(|i| prop(&format!("Player {}", i), teams[i % teams.len()], "batter_hits"))
        .collect();
    props.insert(57, prop("Byron Buxton", "MIN", "batter_hits"));
    props
}

pub struct FixedSchedule(pub Vec<OddsApiEvent>);

#[async_trait]
impl ScheduleSource for FixedSchedule {
    async fn fetch_schedule(&self, _league: League) -> Result<Vec<OddsApiEvent>> {
        Ok(self.0.clone())
    }
}

/// Schedule source that is always down.
pub struct FailingSchedule;

#[async_trait]
impl ScheduleSource for FailingSchedule {
    async fn fetch_schedule(&self, _league: League) -> Result<Vec<OddsApiEvent>> {
        Err(ServiceError::upstream("odds", "schedule timed out"))
    }
}

/// Serves `props` until `fail` is set, then reports the odds source down.
/// Every fetch attempt is counted.
pub struct SwitchableProps {
    pub props: Vec<PropRecord>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl SwitchableProps {
    pub fn new(props: Vec<PropRecord>) -> Self {
        Self {
            props,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PropSource for SwitchableProps {
    async fn fetch_props(&self, _league: League) -> Result<PropBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::upstream("odds", "connection reset"));
        }
        Ok(PropBatch {
            props: self.props.clone(),
            ..Default::default()
        })
    }
}

/// Blocks every fetch until released, to hold a cycle in flight.
pub struct GatedProps {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    pub props: Vec<PropRecord>,
}

#[async_trait]
impl PropSource for GatedProps {
    async fn fetch_props(&self, _league: League) -> Result<PropBatch> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(PropBatch {
            props: self.props.clone(),
            ..Default::default()
        })
    }
}

/// `games` hitting logs where the first `hits` games have two hits each.
pub fn hitting_log(games: usize, hits: usize) -> Vec<GameLine> {
    (0..games)
        .map(|i| {
            let value = if i < hits { 2.0 } else { 0.0 };
            [("hits".to_string(), value)].into_iter().collect()
        })
        .collect()
}

/// Game logs by player name; unknown players have an empty log and names
/// in `failing` report the stats source down. Lookups are recorded.
#[derive(Default)]
pub struct FixedGameLogs {
    pub logs: HashMap<String, Vec<GameLine>>,
    pub failing: Vec<String>,
    pub requested: Mutex<Vec<String>>,
}

impl FixedGameLogs {
    pub fn requested(&self) -> Vec<String> {
        let mut names = self.requested.lock().unwrap().clone();
        names.sort();
        names
    }
}

#[async_trait]
impl GameLogSource for FixedGameLogs {
    async fn game_log(&self, player: &str, _group: StatGroup, _season: i32) -> Result<Vec<GameLine>> {
        self.requested.lock().unwrap().push(player.to_string());
        if self.failing.iter().any(|p| p == player) {
            return Err(ServiceError::upstream("stats", "connection refused"));
        }
        Ok(self.logs.get(player).cloned().unwrap_or_default())
    }
}
