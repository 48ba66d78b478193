//! Game environment labels (high/low scoring) and favored side, derived
//! from the schedule's totals and moneyline markets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::odds::OddsApiEvent;
use crate::teams::League;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    #[serde(rename = "High Scoring")]
    HighScoring,
    #[serde(rename = "Low Scoring")]
    LowScoring,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEnvironment {
    pub environment: Environment,
    pub total: f64,
    pub over_odds: i32,
    pub under_odds: i32,
    pub favored_team: Option<String>,
    pub home_team: String,
    pub away_team: String,
}

/// Matchup label -> environment.
pub type EnvironmentMap = BTreeMap<String, GameEnvironment>;

pub fn classify(league: League, total: f64, over_odds: i32, under_odds: i32) -> Environment {
    match league {
        League::Mlb => {
            if (total >= 9.0 && over_odds <= -115) || total >= 11.0 {
                Environment::HighScoring
            } else if (total <= 7.5 && under_odds <= -115) || total <= 8.0 {
                Environment::LowScoring
            } else {
                Environment::Neutral
            }
        }
        League::Nfl => {
            if total >= 48.0 {
                Environment::HighScoring
            } else if total <= 40.0 {
                Environment::LowScoring
            } else {
                Environment::Neutral
            }
        }
    }
}

/// First book's moneyline, as (home, away) prices.
fn moneyline(event: &OddsApiEvent) -> Option<(i32, i32)> {
    event.bookmakers.iter().find_map(|book| {
        let market = book.markets.iter().find(|m| m.key == "h2h")?;
        let price_of = |team: &str| {
            market
                .outcomes
                .iter()
                .find(|o| o.name == team)
                .and_then(|o| o.price)
        };
        Some((price_of(&event.home_team)?, price_of(&event.away_team)?))
    })
}

/// First book's totals line, as (total, over, under).
fn totals(event: &OddsApiEvent) -> Option<(f64, i32, i32)> {
    event.bookmakers.iter().find_map(|book| {
        let market = book.markets.iter().find(|m| m.key == "totals")?;
        let over = market.outcomes.iter().find(|o| o.name == "Over")?;
        let under = market.outcomes.iter().find(|o| o.name == "Under")?;
        Some((over.point?, over.price?, under.price?))
    })
}

pub fn build_environments(league: League, events: &[OddsApiEvent]) -> EnvironmentMap {
    let mut out = EnvironmentMap::new();

    for event in events {
        if event.home_team.is_empty() || event.away_team.is_empty() {
            continue;
        }
        let Some((total, over_odds, under_odds)) = totals(event) else {
            continue;
        };

        let home_abbr = league.abbreviate(&event.home_team);
        let away_abbr = league.abbreviate(&event.away_team);
        // Lower American price is the favorite.
        let favored_team = moneyline(event).map(|(home, away)| {
            if home < away {
                home_abbr.clone()
            } else {
                away_abbr.clone()
            }
        });

        let label = league.matchup_label(&event.away_team, &event.home_team);
        out.entry(label).or_insert(GameEnvironment {
            environment: classify(league, total, over_odds, under_odds),
            total,
            over_odds,
            under_odds,
            favored_team,
            home_team: home_abbr,
            away_team: away_abbr,
        });
    }

    out
}
