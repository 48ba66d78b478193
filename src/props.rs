//! Player prop ingestion: raw bookmaker outcomes -> validated `PropRecord`s.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::contextual::{AiEdge, ContextualProbs};
use crate::error::{IngestError, Result};
use crate::odds::{OddsApiClient, OddsApiEvent};
use crate::probability::{american_to_prob, no_vig_two_way};
use crate::roster::{RosterMap, RosterSource};
use crate::teams::League;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub book: String,
    pub price: i32,
}

/// Fair probabilities: no-vig when both sides are priced, implied otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairProbs {
    pub over: Option<f64>,
    pub under: Option<f64>,
}

impl FairProbs {
    pub fn from_ticks(over: Option<&PriceTick>, under: Option<&PriceTick>) -> Self {
        match (over, under) {
            (Some(o), Some(u)) => match no_vig_two_way(o.price, u.price) {
                Some((p_over, p_under)) => FairProbs {
                    over: Some(p_over),
                    under: Some(p_under),
                },
                None => FairProbs { over: None, under: None },
            },
            _ => FairProbs {
                over: over.and_then(|t| american_to_prob(t.price)),
                under: under.and_then(|t| american_to_prob(t.price)),
            },
        }
    }
}

/// One bettable player line with its inferred team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropRecord {
    pub player: String,
    pub team: String,
    pub stat: String,
    pub stat_label: String,
    pub line: Option<f64>,
    pub over: Option<PriceTick>,
    pub under: Option<PriceTick>,
    pub event_id: String,
    pub fair: FairProbs,
    /// Recent-form probabilities; set by the contextual pass.
    #[serde(default)]
    pub contextual: Option<ContextualProbs>,
    #[serde(default)]
    pub ai: AiEdge,
}

/// Loosely-typed record as assembled from upstream payloads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProp {
    pub player: Option<String>,
    pub team: Option<String>,
    pub stat: Option<String>,
    pub line: Option<f64>,
    pub over: Option<PriceTick>,
    pub under: Option<PriceTick>,
    pub event_id: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> std::result::Result<String, IngestError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(IngestError::MissingField(field)),
    }
}

impl TryFrom<RawProp> for PropRecord {
    type Error = IngestError;

    fn try_from(raw: RawProp) -> std::result::Result<Self, Self::Error> {
        let player = required(raw.player, "player")?;
        let stat = required(raw.stat, "stat")?;
        let team = match raw.team {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => return Err(IngestError::UnknownPlayerTeam(player)),
        };
        if raw.over.is_none() && raw.under.is_none() {
            return Err(IngestError::NoPrice { player, stat });
        }

        let fair = FairProbs::from_ticks(raw.over.as_ref(), raw.under.as_ref());
        Ok(PropRecord {
            stat_label: stat_display_name(&stat),
            player,
            team,
            stat,
            line: raw.line,
            over: raw.over,
            under: raw.under,
            event_id: raw.event_id.unwrap_or_default(),
            fair,
            contextual: None,
            ai: AiEdge::default(),
        })
    }
}

/// Display-friendly name for a market key.
pub fn stat_display_name(stat: &str) -> String {
    let known = match stat {
        "batter_total_bases" => "Total Bases",
        "batter_hits" => "Hits",
        "batter_rbi" => "RBI",
        "batter_runs" => "Runs",
        "batter_home_runs" => "Home Runs",
        "batter_stolen_bases" => "Stolen Bases",
        "batter_walks" => "Batter Walks",
        "batter_strikeouts" => "Batter Strikeouts",
        "batter_hits_runs_rbis" => "H+R+RBI",
        "pitcher_strikeouts" => "Pitcher Strikeouts",
        "pitcher_hits_allowed" => "Hits Allowed",
        "pitcher_earned_runs" => "Earned Runs",
        "pitcher_walks" => "Walks Allowed",
        "pitcher_outs" => "Outs Recorded",
        "player_anytime_td" => "Anytime TD",
        _ => "",
    };
    if !known.is_empty() {
        return known.to_string();
    }

    let trimmed = stat.strip_prefix("player_").unwrap_or(stat);
    trimmed
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Over,
    Under,
}

fn side_of(name: &str) -> Option<Side> {
    match name.trim().to_lowercase().as_str() {
        "over" | "yes" => Some(Side::Over),
        "under" | "no" => Some(Side::Under),
        _ => None,
    }
}

fn keep_better(slot: &mut Option<PriceTick>, candidate: PriceTick) {
    if slot.as_ref().map_or(true, |current| candidate.price > current.price) {
        *slot = Some(candidate);
    }
}

/// Pair every book's over/under outcomes per (player, stat, line), keeping
/// the best price for each side across books. Team comes from `roster`.
pub fn pair_outcomes(event: &OddsApiEvent, roster: &RosterMap) -> Vec<RawProp> {
    let mut pairs: BTreeMap<(String, String, Option<u64>), RawProp> = BTreeMap::new();

    for book in &event.bookmakers {
        for market in &book.markets {
            for outcome in &market.outcomes {
                let player = outcome
                    .description
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| outcome.name.clone());
                let (Some(side), Some(price)) = (side_of(&outcome.name), outcome.price) else {
                    continue;
                };
                if player.trim().is_empty() || side_of(&player).is_some() {
                    continue;
                }

                let key = (player.clone(), market.key.clone(), outcome.point.map(f64::to_bits));
                let raw = pairs.entry(key).or_insert_with(|| RawProp {
                    team: roster.get(&player).cloned(),
                    player: Some(player.clone()),
                    stat: Some(market.key.clone()),
                    line: outcome.point,
                    event_id: Some(event.id.clone()),
                    ..Default::default()
                });

                let tick = PriceTick {
                    book: book.key.clone(),
                    price,
                };
                match side {
                    Side::Over => keep_better(&mut raw.over, tick),
                    Side::Under => keep_better(&mut raw.under, tick),
                }
            }
        }
    }

    pairs.into_values().collect()
}

/// Validated records plus how many raw records were rejected, by reason.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropBatch {
    pub props: Vec<PropRecord>,
    pub rejected: HashMap<String, usize>,
}

impl PropBatch {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

pub fn ingest(raw: Vec<RawProp>) -> PropBatch {
    let mut batch = PropBatch::default();
    for r in raw {
        match PropRecord::try_from(r) {
            Ok(record) => batch.props.push(record),
            Err(e) => {
                let reason = match &e {
                    IngestError::MissingField(f) => format!("missing_{}", f),
                    IngestError::UnknownPlayerTeam(_) => "unknown_team".to_string(),
                    IngestError::NoPrice { .. } => "no_price".to_string(),
                };
                debug!("Rejected prop: {}", e);
                *batch.rejected.entry(reason).or_insert(0) += 1;
            }
        }
    }
    batch
}

/// Producer of the flat prop collection for a league.
#[async_trait]
pub trait PropSource: Send + Sync {
    async fn fetch_props(&self, league: League) -> Result<PropBatch>;
}

/// Odds API props with teams inferred from stats-source rosters.
pub struct OddsPropFetcher {
    odds: Arc<OddsApiClient>,
    rosters: Arc<dyn RosterSource>,
    clock: Arc<dyn Clock>,
    roster_max_age: ChronoDuration,
    roster_cache: RwLock<HashMap<League, (DateTime<Utc>, Arc<RosterMap>)>>,
}

impl OddsPropFetcher {
    pub fn new(
        odds: Arc<OddsApiClient>,
        rosters: Arc<dyn RosterSource>,
        clock: Arc<dyn Clock>,
        roster_max_age: ChronoDuration,
    ) -> Self {
        Self {
            odds,
            rosters,
            clock,
            roster_max_age,
            roster_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cached roster, refreshed when older than the max age. A failed
    /// refresh falls back to the previous roster when there is one.
    async fn roster(&self, league: League) -> Result<Arc<RosterMap>> {
        let now = self.clock.now();
        let cached = self.roster_cache.read().await.get(&league).cloned();
        if let Some((fetched_at, map)) = &cached {
            if now - *fetched_at < self.roster_max_age {
                return Ok(map.clone());
            }
        }

        match self.rosters.fetch_rosters(league).await {
            Ok(map) => {
                let map = Arc::new(map);
                self.roster_cache
                    .write()
                    .await
                    .insert(league, (now, map.clone()));
                Ok(map)
            }
            Err(e) => match cached {
                Some((_, map)) => {
                    warn!("Roster refresh for {} failed, using previous roster: {}", league, e);
                    Ok(map)
                }
                None => Err(e),
            },
        }
    }
}

#[async_trait]
impl PropSource for OddsPropFetcher {
    async fn fetch_props(&self, league: League) -> Result<PropBatch> {
        let events = self.odds.fetch_events(league).await?;
        let roster = self.roster(league).await?;

        let mut raw = Vec::new();
        for event in &events {
            if event.id.is_empty() {
                continue;
            }
            for markets in league.prop_market_batches() {
                match self.odds.fetch_event_odds(league, &event.id, markets).await {
                    Ok(mut odds) => {
                        // The per-event endpoint echoes the id; keep ours if it doesn't.
                        if odds.id.is_empty() {
                            odds.id = event.id.clone();
                        }
                        raw.extend(pair_outcomes(&odds, &roster));
                    }
                    Err(e) => {
                        warn!("Failed to fetch props for event {} ({:?}): {}", event.id, markets, e);
                    }
                }
            }
        }

        let batch = ingest(raw);
        info!(
            "Fetched {} {} props from {} events ({} rejected)",
            batch.props.len(),
            league,
            events.len(),
            batch.rejected_total()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odds::{Bookmaker, Market, Outcome};

    fn outcome(name: &str, player: &str, price: i32, point: f64) -> Outcome {
        Outcome {
            name: name.to_string(),
            description: Some(player.to_string()),
            price: Some(price),
            point: Some(point),
        }
    }

    fn book(key: &str, outcomes: Vec<Outcome>) -> Bookmaker {
        Bookmaker {
            key: key.to_string(),
            title: key.to_string(),
            markets: vec![Market {
                key: "batter_hits".to_string(),
                outcomes,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_pairing_keeps_best_price_per_side() {
        let event = OddsApiEvent {
            id: "evt".to_string(),
            bookmakers: vec![
                book(
                    "draftkings",
                    vec![
                        outcome("Over", "Jose Altuve", -140, 0.5),
                        outcome("Under", "Jose Altuve", 110, 0.5),
                    ],
                ),
                book(
                    "fanduel",
                    vec![
                        outcome("Over", "Jose Altuve", -125, 0.5),
                        outcome("Under", "Jose Altuve", 100, 0.5),
                    ],
                ),
            ],
            ..Default::default()
        };
        let roster: RosterMap = [("Jose Altuve".to_string(), "HOU".to_string())].into();

        let raw = pair_outcomes(&event, &roster);
        assert_eq!(raw.len(), 1);
        let over = raw[0].over.as_ref().unwrap();
        assert_eq!((over.book.as_str(), over.price), ("fanduel", -125));
        let under = raw[0].under.as_ref().unwrap();
        assert_eq!((under.book.as_str(), under.price), ("draftkings", 110));
        assert_eq!(raw[0].team.as_deref(), Some("HOU"));
        assert_eq!(raw[0].event_id.as_deref(), Some("evt"));
    }

    #[test]
    fn test_different_lines_are_separate_props() {
        let event = OddsApiEvent {
            bookmakers: vec![book(
                "draftkings",
                vec![
                    outcome("Over", "Jose Altuve", -140, 0.5),
                    outcome("Over", "Jose Altuve", 180, 1.5),
                ],
            )],
            ..Default::default()
        };
        assert_eq!(pair_outcomes(&event, &RosterMap::new()).len(), 2);
    }

    #[test]
    fn test_ingest_rejects_malformed_records() {
        let ok = RawProp {
            player: Some("Jose Altuve".into()),
            team: Some("HOU".into()),
            stat: Some("batter_hits".into()),
            line: Some(0.5),
            over: Some(PriceTick { book: "dk".into(), price: -110 }),
            under: Some(PriceTick { book: "dk".into(), price: -110 }),
            event_id: Some("evt".into()),
        };
        let no_team = RawProp { team: None, ..ok.clone() };
        let no_player = RawProp { player: Some("  ".into()), ..ok.clone() };
        let no_price = RawProp { over: None, under: None, ..ok.clone() };

        let batch = ingest(vec![ok, no_team, no_player, no_price]);
        assert_eq!(batch.props.len(), 1);
        assert_eq!(batch.rejected_total(), 3);
        assert_eq!(batch.rejected["unknown_team"], 1);
        assert_eq!(batch.rejected["missing_player"], 1);
        assert_eq!(batch.rejected["no_price"], 1);

        let record = &batch.props[0];
        assert_eq!(record.stat_label, "Hits");
        assert_eq!(record.fair.over, Some(0.5));
    }

    #[test]
    fn test_single_sided_fair_uses_implied() {
        let tick = PriceTick { book: "dk".into(), price: 100 };
        let fair = FairProbs::from_ticks(Some(&tick), None);
        assert_eq!(fair.over, Some(0.5));
        assert_eq!(fair.under, None);
    }

    #[test]
    fn test_stat_display_names() {
        assert_eq!(stat_display_name("pitcher_outs"), "Outs Recorded");
        assert_eq!(stat_display_name("player_reception_yds"), "Reception Yds");
    }

    #[test]
    fn test_batter_and_pitcher_labels_stay_distinct() {
        assert_eq!(stat_display_name("batter_strikeouts"), "Batter Strikeouts");
        assert_eq!(stat_display_name("pitcher_strikeouts"), "Pitcher Strikeouts");
        assert_ne!(stat_display_name("batter_walks"), stat_display_name("pitcher_walks"));
    }
}
