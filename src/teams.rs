//! League identifiers and the static team directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum League {
    Mlb,
    Nfl,
}

impl League {
    pub const ALL: [League; 2] = [League::Mlb, League::Nfl];

    pub fn as_str(&self) -> &'static str {
        match self {
            League::Mlb => "mlb",
            League::Nfl => "nfl",
        }
    }

    /// Sport key used by The Odds API.
    pub fn sport_key(&self) -> &'static str {
        match self {
            League::Mlb => "baseball_mlb",
            League::Nfl => "americanfootball_nfl",
        }
    }

    /// Player prop markets, batched to keep each event request small.
    pub fn prop_market_batches(&self) -> &'static [&'static [&'static str]] {
        match self {
            League::Mlb => &[
                &["batter_hits", "batter_home_runs", "batter_total_bases"],
                &[
                    "pitcher_strikeouts",
                    "pitcher_earned_runs",
                    "pitcher_outs",
                    "pitcher_hits_allowed",
                ],
            ],
            League::Nfl => &[
                &[
                    "player_pass_yds",
                    "player_pass_tds",
                    "player_rush_yds",
                    "player_reception_yds",
                ],
                &["player_receptions", "player_rush_attempts", "player_anytime_td"],
            ],
        }
    }

    fn directory(&self) -> &'static HashMap<&'static str, &'static str> {
        static MLB: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
        static NFL: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
        match self {
            League::Mlb => MLB.get_or_init(|| MLB_TEAMS.iter().copied().collect()),
            League::Nfl => NFL.get_or_init(|| NFL_TEAMS.iter().copied().collect()),
        }
    }

    /// Known abbreviation for a full team name.
    pub fn lookup_abbreviation(&self, full_name: &str) -> Option<&'static str> {
        self.directory().get(full_name.trim()).copied()
    }

    /// Abbreviation for a full team name, falling back to the first three
    /// letters upper-cased for names the directory does not know.
    pub fn abbreviate(&self, full_name: &str) -> String {
        match self.lookup_abbreviation(full_name) {
            Some(abbr) => abbr.to_string(),
            None => full_name
                .chars()
                .filter(|c| c.is_alphanumeric())
                .take(3)
                .collect::<String>()
                .to_uppercase(),
        }
    }

    /// Label for a game, e.g. "HOU @ SEA".
    pub fn matchup_label(&self, away_team: &str, home_team: &str) -> String {
        format_matchup(&self.abbreviate(away_team), &self.abbreviate(home_team))
    }
}

pub fn format_matchup(away_abbr: &str, home_abbr: &str) -> String {
    format!("{} @ {}", away_abbr, home_abbr)
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for League {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mlb" | "baseball" | "baseball_mlb" => Ok(League::Mlb),
            "nfl" | "football" | "americanfootball_nfl" => Ok(League::Nfl),
            other => Err(ServiceError::UnknownLeague(other.to_string())),
        }
    }
}

const MLB_TEAMS: &[(&str, &str)] = &[
    // AL East
    ("Boston Red Sox", "BOS"),
    ("New York Yankees", "NYY"),
    ("Tampa Bay Rays", "TB"),
    ("Toronto Blue Jays", "TOR"),
    ("Baltimore Orioles", "BAL"),
    // AL Central
    ("Chicago White Sox", "CHW"),
    ("Cleveland Guardians", "CLE"),
    ("Detroit Tigers", "DET"),
    ("Kansas City Royals", "KC"),
    ("Minnesota Twins", "MIN"),
    // AL West
    ("Houston Astros", "HOU"),
    ("Los Angeles Angels", "LAA"),
    ("Oakland Athletics", "OAK"),
    ("Athletics", "OAK"),
    ("Seattle Mariners", "SEA"),
    ("Texas Rangers", "TEX"),
    // NL East
    ("Atlanta Braves", "ATL"),
    ("Miami Marlins", "MIA"),
    ("New York Mets", "NYM"),
    ("Philadelphia Phillies", "PHI"),
    ("Washington Nationals", "WSH"),
    // NL Central
    ("Chicago Cubs", "CHC"),
    ("Cincinnati Reds", "CIN"),
    ("Milwaukee Brewers", "MIL"),
    ("Pittsburgh Pirates", "PIT"),
    ("St. Louis Cardinals", "STL"),
    // NL West
    ("Arizona Diamondbacks", "ARI"),
    ("Colorado Rockies", "COL"),
    ("Los Angeles Dodgers", "LAD"),
    ("San Diego Padres", "SD"),
    ("San Francisco Giants", "SF"),
];

const NFL_TEAMS: &[(&str, &str)] = &[
    ("Arizona Cardinals", "ARI"),
    ("Atlanta Falcons", "ATL"),
    ("Baltimore Ravens", "BAL"),
    ("Buffalo Bills", "BUF"),
    ("Carolina Panthers", "CAR"),
    ("Chicago Bears", "CHI"),
    ("Cincinnati Bengals", "CIN"),
    ("Cleveland Browns", "CLE"),
    ("Dallas Cowboys", "DAL"),
    ("Denver Broncos", "DEN"),
    ("Detroit Lions", "DET"),
    ("Green Bay Packers", "GB"),
    ("Houston Texans", "HOU"),
    ("Indianapolis Colts", "IND"),
    ("Jacksonville Jaguars", "JAX"),
    ("Kansas City Chiefs", "KC"),
    ("Las Vegas Raiders", "LV"),
    ("Los Angeles Chargers", "LAC"),
    ("Los Angeles Rams", "LAR"),
    ("Miami Dolphins", "MIA"),
    ("Minnesota Vikings", "MIN"),
    ("New England Patriots", "NE"),
    ("New Orleans Saints", "NO"),
    ("New York Giants", "NYG"),
    ("New York Jets", "NYJ"),
    ("Philadelphia Eagles", "PHI"),
    ("Pittsburgh Steelers", "PIT"),
    ("San Francisco 49ers", "SF"),
    ("Seattle Seahawks", "SEA"),
    ("Tampa Bay Buccaneers", "TB"),
    ("Tennessee Titans", "TEN"),
    ("Washington Commanders", "WAS"),
];
