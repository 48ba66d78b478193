//! Recent-form hit rates from player game logs, and the edge they imply
//! against the no-vig market price.
//!
//! A prop's contextual probability is the share of the player's last
//! `SAMPLE_GAMES` games that cleared the line. When no usable game log
//! exists the league-average rate for the stat stands in, flagged as a
//! fallback. The edge is contextual minus fair, in percentage points.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Result, ServiceError};
use crate::props::PropRecord;
use crate::teams::League;

/// Games sampled for a hit rate.
pub const SAMPLE_GAMES: usize = 10;
/// Fewer logged games than this falls back to the league average.
const MIN_GAMES: usize = 2;
/// Concurrent game-log lookups per enrichment pass.
const MAX_IN_FLIGHT: usize = 8;
/// Hits + runs + RBI, summed per game.
const COMBINED: &str = "combinedStats";

const MLB_STATS_BASE: &str = "https://statsapi.mlb.com/api/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatGroup {
    Hitting,
    Pitching,
}

impl StatGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatGroup::Hitting => "hitting",
            StatGroup::Pitching => "pitching",
        }
    }

    pub fn of(stat: &str) -> Self {
        if stat.starts_with("pitcher_") {
            StatGroup::Pitching
        } else {
            StatGroup::Hitting
        }
    }
}

/// Game-log field a prop market settles on.
pub fn stat_field(stat: &str) -> Option<&'static str> {
    let field = match stat {
        "batter_total_bases" => "totalBases",
        "batter_hits" => "hits",
        "batter_rbis" | "batter_rbi" | "batter_runs_batted_in" => "rbi",
        "batter_runs" | "batter_runs_scored" => "runs",
        "batter_home_runs" => "homeRuns",
        "batter_stolen_bases" => "stolenBases",
        "batter_walks" => "baseOnBalls",
        "batter_strikeouts" => "strikeOuts",
        "batter_hits_runs_rbis" => COMBINED,
        "pitcher_strikeouts" => "strikeOuts",
        "pitcher_hits_allowed" => "hits",
        "pitcher_earned_runs" => "earnedRuns",
        "pitcher_walks" => "baseOnBalls",
        "pitcher_outs" => "outs",
        _ => return None,
    };
    Some(field)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_rate(rate: f64) -> Self {
        if rate >= 0.6 {
            Confidence::High
        } else if rate >= 0.4 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRate {
    /// Fraction of sampled games over the line, 2 places.
    pub hit_rate: f64,
    pub games: usize,
    pub confidence: Confidence,
    /// League-average estimate rather than the player's own games.
    pub fallback: bool,
}

/// One game's numeric stat line, keyed by Stats API field name.
pub type GameLine = HashMap<String, f64>;

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn stat_value(game: &GameLine, field: &str) -> f64 {
    let get = |k: &str| game.get(k).copied().unwrap_or(0.0);
    if field == COMBINED {
        get("hits") + get("runs") + get("rbi")
    } else {
        get(field)
    }
}

/// Hit rate over the most recent games of an oldest-first log. A game
/// counts when the stat strictly beats the line, so a push on a whole
/// number line is not an over.
pub fn hit_rate_from_log(log: &[GameLine], field: &str, line: f64) -> Option<HitRate> {
    let recent = &log[log.len().saturating_sub(SAMPLE_GAMES)..];
    if recent.len() < MIN_GAMES {
        return None;
    }
    let overs = recent
        .iter()
        .filter(|game| stat_value(game, field) > line)
        .count();
    let hit_rate = round_to(overs as f64 / recent.len() as f64, 2);
    Some(HitRate {
        hit_rate,
        games: recent.len(),
        confidence: Confidence::from_rate(hit_rate),
        fallback: false,
    })
}

/// League-average over rate for a stat, scaled down for high lines.
pub fn fallback_hit_rate(stat: &str, line: f64) -> HitRate {
    let group = StatGroup::of(stat);
    let base = match (group, stat_field(stat)) {
        (StatGroup::Pitching, Some("strikeOuts")) => 0.55,
        (StatGroup::Pitching, Some("hits")) => 0.45,
        (StatGroup::Pitching, Some("earnedRuns")) => 0.35,
        (StatGroup::Pitching, Some("baseOnBalls")) => 0.20,
        (StatGroup::Pitching, Some("outs")) => 0.75,
        (_, Some("hits")) => 0.35,
        (_, Some("totalBases")) => 0.40,
        (_, Some("rbi")) => 0.25,
        (_, Some("runs")) => 0.30,
        (_, Some("homeRuns")) => 0.15,
        (_, Some("stolenBases")) => 0.08,
        (_, Some("baseOnBalls")) => 0.20,
        (_, Some("strikeOuts")) => 0.65,
        (_, Some(COMBINED)) => 0.50,
        _ => 0.35,
    };
    let scale = if line >= 5.0 {
        0.65
    } else if line >= 3.0 {
        0.80
    } else if line >= 1.5 {
        0.90
    } else {
        1.0
    };
    HitRate {
        hit_rate: round_to(base * scale, 2),
        games: 0,
        confidence: Confidence::Low,
        fallback: true,
    }
}

/// Contextual probabilities attached to a prop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualProbs {
    pub over: f64,
    pub under: f64,
    pub games: usize,
    pub confidence: Confidence,
    pub fallback: bool,
}

impl From<&HitRate> for ContextualProbs {
    fn from(rate: &HitRate) -> Self {
        ContextualProbs {
            over: rate.hit_rate,
            under: round_to(1.0 - rate.hit_rate, 2),
            games: rate.games,
            confidence: rate.confidence,
            fallback: rate.fallback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Pick {
    Over,
    Under,
}

/// Contextual minus fair, in percentage points, and the side worth a look.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiEdge {
    pub edge_over: Option<f64>,
    pub edge_under: Option<f64>,
    pub pick: Option<Pick>,
}

impl AiEdge {
    /// Both inputs are needed for an edge. League-average estimates report
    /// an edge but never a pick.
    pub fn compute(fair_over: Option<f64>, contextual: Option<&ContextualProbs>, min_edge_pp: f64) -> Self {
        let (Some(fair_over), Some(ctx)) = (fair_over, contextual) else {
            return AiEdge::default();
        };
        let edge_over = (ctx.over - fair_over) * 100.0;
        let edge_under = -edge_over;
        let pick = if ctx.fallback {
            None
        } else if edge_over >= min_edge_pp {
            Some(Pick::Over)
        } else if edge_under >= min_edge_pp {
            Some(Pick::Under)
        } else {
            None
        };
        AiEdge {
            edge_over: Some(round_to(edge_over, 1)),
            edge_under: Some(round_to(edge_under, 1)),
            pick,
        }
    }
}

/// `AI_MIN_EDGE` as percentage points: values up to 1 are fractions.
pub fn edge_threshold_pp(raw: f64) -> f64 {
    if raw <= 1.0 {
        raw * 100.0
    } else {
        raw
    }
}

/// Set `contextual` and `ai` on a prop from its hit rate. The fair over
/// only counts when both sides are priced.
pub fn apply(prop: &mut PropRecord, rate: Option<&HitRate>, min_edge_pp: f64) {
    prop.contextual = rate.map(ContextualProbs::from);
    let fair_over = match (&prop.over, &prop.under) {
        (Some(_), Some(_)) => prop.fair.over,
        _ => None,
    };
    prop.ai = AiEdge::compute(fair_over, prop.contextual.as_ref(), min_edge_pp);
}

/// Per-player game logs for the current season.
#[async_trait]
pub trait GameLogSource: Send + Sync {
    /// Stat lines, oldest game first. Unknown players yield an empty log.
    async fn game_log(&self, player: &str, group: StatGroup, season: i32) -> Result<Vec<GameLine>>;
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PeopleSearch {
    people: Vec<PersonId>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PersonId {
    id: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StatsResponse {
    stats: Vec<StatBlock>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StatBlock {
    splits: Vec<Split>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Split {
    date: String,
    stat: HashMap<String, serde_json::Value>,
}

/// MLB Stats API game logs.
pub struct MlbGameLogClient {
    http_client: reqwest::Client,
    base_url: String,
    player_ids: RwLock<HashMap<String, Option<u64>>>,
}

impl MlbGameLogClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create game log HTTP client")?;
        Ok(Self {
            http_client,
            base_url: MLB_STATS_BASE.to_string(),
            player_ids: RwLock::new(HashMap::new()),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .get(&url)
            .query(params)
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

    /// Player id by full name. Misses are remembered too.
    async fn player_id(&self, name: &str) -> Result<Option<u64>> {
        if let Some(id) = self.player_ids.read().await.get(name) {
            return Ok(*id);
        }
        let found: PeopleSearch = self
            .get_json("/people/search", &[("names", name.to_string())])
            .await?;
        let id = found.people.iter().find_map(|p| p.id);
        if id.is_none() {
            debug!("No Stats API player found for {}", name);
        }
        self.player_ids.write().await.insert(name.to_string(), id);
        Ok(id)
    }
}

#[async_trait]
impl GameLogSource for MlbGameLogClient {
    async fn game_log(&self, player: &str, group: StatGroup, season: i32) -> Result<Vec<GameLine>> {
        let Some(id) = self.player_id(player).await? else {
            return Ok(Vec::new());
        };
        let response: StatsResponse = self
            .get_json(
                &format!("/people/{}/stats", id),
                &[
                    ("stats", "gameLog".to_string()),
                    ("season", season.to_string()),
                    ("group", group.as_str().to_string()),
                ],
            )
            .await?;

        let mut splits: Vec<Split> = response
            .stats
            .into_iter()
            .next()
            .map(|block| block.splits)
            .unwrap_or_default();
        // ISO dates sort chronologically.
        splits.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(splits
            .into_iter()
            .map(|split| {
                split
                    .stat
                    .into_iter()
                    .filter_map(|(k, v)| v.as_f64().map(|n| (k, n)))
                    .collect()
            })
            .collect())
    }
}

type LogKey = (String, StatGroup);

/// Attaches contextual probabilities and edges to props, with game logs
/// cached per player for `log_max_age`.
pub struct Contextualizer {
    source: Arc<dyn GameLogSource>,
    clock: Arc<dyn Clock>,
    min_edge_pp: f64,
    log_max_age: ChronoDuration,
    logs: RwLock<HashMap<LogKey, (DateTime<Utc>, Arc<Vec<GameLine>>)>>,
}

impl Contextualizer {
    pub fn new(
        source: Arc<dyn GameLogSource>,
        clock: Arc<dyn Clock>,
        min_edge_pp: f64,
        log_max_age: ChronoDuration,
    ) -> Self {
        Self {
            source,
            clock,
            min_edge_pp,
            log_max_age,
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Game logs for every wanted key, from cache when fresh. A failed
    /// lookup leaves the key out, and its props use the league average.
    async fn logs_for(&self, wanted: BTreeSet<LogKey>) -> HashMap<LogKey, Arc<Vec<GameLine>>> {
        let now = self.clock.now();
        let mut out = HashMap::new();
        let mut missing = Vec::new();
        {
            let cache = self.logs.read().await;
            for key in wanted {
                match cache.get(&key) {
                    Some((fetched_at, log)) if now - *fetched_at < self.log_max_age => {
                        out.insert(key, log.clone());
                    }
                    _ => missing.push(key),
                }
            }
        }
        if missing.is_empty() {
            return out;
        }

        let season = now.year();
        let permits = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        let mut tasks = JoinSet::new();
        for (player, group) in missing {
            let source = self.source.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = source.game_log(&player, group, season).await;
                ((player, group), result)
            });
        }

        let mut fetched = Vec::new();
        let mut failures = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(log))) => fetched.push((key, Arc::new(log))),
                Ok(((player, group), Err(e))) => {
                    failures += 1;
                    debug!("No {} game log for {}: {}", group.as_str(), player, e);
                }
                Err(e) => warn!("Game log task failed: {}", e),
            }
        }
        if failures > 0 {
            warn!("{} game log lookups failed; those props use league averages", failures);
        }

        let mut cache = self.logs.write().await;
        for (key, log) in fetched {
            cache.insert(key.clone(), (now, log.clone()));
            out.insert(key, log);
        }
        out
    }

    /// Enrich props in place and return how many got a contextual rate.
    pub async fn enrich<'a, I>(&self, league: League, props: I) -> usize
    where
        I: IntoIterator<Item = &'a mut PropRecord>,
    {
        let props: Vec<&'a mut PropRecord> = props.into_iter().collect();
        if league != League::Mlb {
            return 0;
        }

        let wanted: BTreeSet<LogKey> = props
            .iter()
            .filter(|p| p.line.is_some() && stat_field(&p.stat).is_some())
            .map(|p| (p.player.clone(), StatGroup::of(&p.stat)))
            .collect();
        let players = wanted.len();
        let logs = self.logs_for(wanted).await;

        let mut enriched = 0;
        let mut fallbacks = 0;
        for prop in props {
            let Some(line) = prop.line else {
                apply(prop, None, self.min_edge_pp);
                continue;
            };
            let rate = stat_field(&prop.stat)
                .and_then(|field| {
                    let log = logs.get(&(prop.player.clone(), StatGroup::of(&prop.stat)))?;
                    hit_rate_from_log(log, field, line)
                })
                .unwrap_or_else(|| fallback_hit_rate(&prop.stat, line));
            if rate.fallback {
                fallbacks += 1;
            }
            apply(prop, Some(&rate), self.min_edge_pp);
            enriched += 1;
        }
        info!(
            "Contextual rates for {} {} props from {} player logs ({} league-average)",
            enriched, league, players, fallbacks
        );
        enriched
    }
}
