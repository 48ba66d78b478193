//! Matchup resolution: today's schedule as label -> game.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::odds::{OddsApiClient, OddsApiEvent};
use crate::teams::{format_matchup, League};

/// One scheduled game, keyed elsewhere by its "AWAY @ HOME" label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matchup {
    pub away: String,
    pub home: String,
    pub game_id: String,
    pub away_team: String,
    pub home_team: String,
    pub commence_time: Option<DateTime<Utc>>,
}

impl Matchup {
    pub fn label(&self) -> String {
        format_matchup(&self.away, &self.home)
    }

    /// Abbreviations, away first.
    pub fn teams(&self) -> [&str; 2] {
        [self.away.as_str(), self.home.as_str()]
    }

    pub fn contains(&self, team: &str) -> bool {
        self.away == team || self.home == team
    }
}

/// Ordered so that everything derived from it is deterministic.
pub type MatchupMap = BTreeMap<String, Matchup>;

/// Schedule provider. The Odds API in production, fixtures in tests.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch_schedule(&self, league: League) -> Result<Vec<OddsApiEvent>>;
}

#[async_trait]
impl ScheduleSource for OddsApiClient {
    async fn fetch_schedule(&self, league: League) -> Result<Vec<OddsApiEvent>> {
        OddsApiClient::fetch_schedule(self, league).await
    }
}

/// Build the label -> matchup map from schedule events. Events without both
/// team names are skipped. When two games share a label (doubleheader) the
/// earlier one is kept.
pub fn build_matchups(league: League, events: &[OddsApiEvent]) -> MatchupMap {
    let mut out = MatchupMap::new();

    for event in events {
        if event.home_team.trim().is_empty() || event.away_team.trim().is_empty() {
            continue;
        }
        let matchup = Matchup {
            away: league.abbreviate(&event.away_team),
            home: league.abbreviate(&event.home_team),
            game_id: event.id.clone(),
            away_team: event.away_team.clone(),
            home_team: event.home_team.clone(),
            commence_time: event.commence_time,
        };

        let label = matchup.label();
        let keep_existing = out
            .get(&label)
            .is_some_and(|existing| existing.commence_time <= matchup.commence_time);
        if !keep_existing {
            out.insert(label, matchup);
        }
    }

    out
}

pub struct MatchupResolver {
    source: Arc<dyn ScheduleSource>,
}

impl MatchupResolver {
    pub fn new(source: Arc<dyn ScheduleSource>) -> Self {
        Self { source }
    }

    /// Matchups, surfacing upstream failure so callers can tell it apart
    /// from an empty slate.
    pub async fn try_resolve(&self, league: League) -> Result<(MatchupMap, Vec<OddsApiEvent>)> {
        let events = self.source.fetch_schedule(league).await?;
        let map = build_matchups(league, &events);
        info!(
            "Built {} matchup map with {} games: {:?}",
            league,
            map.len(),
            map.keys().collect::<Vec<_>>()
        );
        Ok((map, events))
    }

    /// Matchups, degrading to an empty map on any upstream failure.
    pub async fn resolve(&self, league: League) -> MatchupMap {
        match self.try_resolve(league).await {
            Ok((map, _)) => map,
            Err(e) => {
                warn!("Failed to build {} matchup map: {}", league, e);
                MatchupMap::new()
            }
        }
    }
}
