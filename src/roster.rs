//! Player -> team lookups from public stats sources (MLB Stats API, ESPN).

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, ServiceError};
use crate::teams::League;

/// Player full name -> team abbreviation.
pub type RosterMap = HashMap<String, String>;

#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_rosters(&self, league: League) -> Result<RosterMap>;
}

const MLB_STATS_BASE: &str = "https://statsapi.mlb.com/api/v1";
const ESPN_NFL_BASE: &str = "https://site.api.espn.com/apis/site/v2/sports/football/nfl";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MlbTeams {
    teams: Vec<MlbTeam>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MlbTeam {
    id: Option<u32>,
    name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MlbRoster {
    roster: Vec<MlbRosterEntry>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MlbRosterEntry {
    person: MlbPerson,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct MlbPerson {
    full_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EspnTeams {
    sports: Vec<EspnSport>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EspnSport {
    leagues: Vec<EspnLeague>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EspnLeague {
    teams: Vec<EspnTeamWrapper>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EspnTeamWrapper {
    team: EspnTeam,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct EspnTeam {
    id: String,
    display_name: String,
    abbreviation: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EspnRoster {
    athletes: Vec<EspnAthleteGroup>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EspnAthleteGroup {
    items: Vec<EspnAthlete>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct EspnAthlete {
    full_name: String,
}

/// Stats-source client covering every supported league.
pub struct StatsRosterClient {
    http_client: reqwest::Client,
}

impl StatsRosterClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create roster HTTP client")?;
        Ok(Self { http_client })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::upstream("stats", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::upstream(
                "stats",
                format!("{} returned {}", url, status),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::upstream("stats", e))
    }

    async fn mlb_rosters(&self) -> Result<RosterMap> {
        let teams: MlbTeams = self
            .get_json(&format!("{}/teams?sportId=1", MLB_STATS_BASE))
            .await?;
        let mut out = RosterMap::new();

        for team in teams.teams {
            let Some(team_id) = team.id else { continue };
            let Some(abbr) = League::Mlb.lookup_abbreviation(&team.name) else {
                warn!("[SKIP] Unknown MLB team name from stats source: {}", team.name);
                continue;
            };
            let url = format!("{}/teams/{}/roster?rosterType=active", MLB_STATS_BASE, team_id);
            match self.get_json::<MlbRoster>(&url).await {
                Ok(roster) => {
                    for entry in roster.roster {
                        if !entry.person.full_name.is_empty() {
                            out.insert(entry.person.full_name, abbr.to_string());
                        }
                    }
                }
                Err(e) => warn!("[SKIP] Could not get roster for {}: {}", team.name, e),
            }
        }

        Ok(out)
    }

    async fn nfl_rosters(&self) -> Result<RosterMap> {
        let teams: EspnTeams = self.get_json(&format!("{}/teams", ESPN_NFL_BASE)).await?;
        let mut out = RosterMap::new();

        let all_teams = teams
            .sports
            .into_iter()
            .flat_map(|s| s.leagues)
            .flat_map(|l| l.teams)
            .map(|w| w.team);

        for team in all_teams {
            let abbr = League::Nfl
                .lookup_abbreviation(&team.display_name)
                .map(str::to_string)
                .unwrap_or(team.abbreviation);
            let url = format!("{}/teams/{}/roster", ESPN_NFL_BASE, team.id);
            match self.get_json::<EspnRoster>(&url).await {
                Ok(roster) => {
                    for athlete in roster.athletes.into_iter().flat_map(|g| g.items) {
                        if !athlete.full_name.is_empty() {
                            out.insert(athlete.full_name, abbr.clone());
                        }
                    }
                }
                Err(e) => warn!("[SKIP] Could not get roster for {}: {}", team.display_name, e),
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl RosterSource for StatsRosterClient {
    async fn fetch_rosters(&self, league: League) -> Result<RosterMap> {
        let map = match league {
            League::Mlb => self.mlb_rosters().await?,
            League::Nfl => self.nfl_rosters().await?,
        };
        info!("Built {} player-team mapping for {} players", league, map.len());
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mlb_roster() {
        let body = r#"{"roster":[{"person":{"id":514888,"fullName":"Jose Altuve"},"jerseyNumber":"27"}]}"#;
        let roster: MlbRoster = serde_json::from_str(body).unwrap();
        assert_eq!(roster.roster[0].person.full_name, "Jose Altuve");
    }

    #[test]
    fn test_parse_espn_teams_and_roster() {
        let teams = r#"{"sports":[{"leagues":[{"teams":[{"team":{"id":"22","displayName":"Arizona Cardinals","abbreviation":"ARI"}}]}]}]}"#;
        let teams: EspnTeams = serde_json::from_str(teams).unwrap();
        let team = &teams.sports[0].leagues[0].teams[0].team;
        assert_eq!(team.id, "22");
        assert_eq!(team.display_name, "Arizona Cardinals");

        let roster = r#"{"athletes":[{"position":"offense","items":[{"fullName":"Kyler Murray"}]}]}"#;
        let roster: EspnRoster = serde_json::from_str(roster).unwrap();
        assert_eq!(roster.athletes[0].items[0].full_name, "Kyler Murray");
    }
}
