//! Group props by the matchup their team is playing in.
//!
//! A team that appears in two matchups at once (which a one-game-per-day
//! slate should never produce) is attributed to the first matchup in label
//! order; the conflict is logged and reported in `Partition::conflicts`.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::matchups::MatchupMap;
use crate::props::PropRecord;

/// Matchup label -> props for that game. Every current label is present.
pub type MatchupIndex = BTreeMap<String, Vec<PropRecord>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub index: MatchupIndex,
    /// Props whose team is in no current matchup.
    pub dropped: usize,
    /// Dropped count per unresolved team.
    pub unresolved: BTreeMap<String, usize>,
    /// Teams found in more than one matchup.
    pub conflicts: Vec<String>,
}

fn reverse_index(matchups: &MatchupMap) -> (BTreeMap<&str, &str>, Vec<String>) {
    let mut by_team: BTreeMap<&str, &str> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for (label, matchup) in matchups {
        for team in matchup.teams() {
            match by_team.entry(team) {
                Entry::Vacant(slot) => {
                    slot.insert(label.as_str());
                }
                Entry::Occupied(existing) if *existing.get() != label.as_str() => {
                    warn!(
                        "Team {} appears in '{}' and '{}'; keeping '{}'",
                        team,
                        existing.get(),
                        label,
                        existing.get()
                    );
                    conflicts.push(team.to_string());
                }
                Entry::Occupied(_) => {}
            }
        }
    }

    (by_team, conflicts)
}

/// Partition `props` by matchup. Pure and deterministic.
pub fn partition(props: &[PropRecord], matchups: &MatchupMap) -> Partition {
    let (by_team, conflicts) = reverse_index(matchups);

    let mut index: MatchupIndex = matchups.keys().map(|l| (l.clone(), Vec::new())).collect();
    let mut unresolved: BTreeMap<String, usize> = BTreeMap::new();
    let mut dropped = 0;

    for prop in props {
        let label = by_team.get(prop.team.as_str()).copied();
        match label.and_then(|l| index.get_mut(l)) {
            Some(bucket) => bucket.push(prop.clone()),
            None => {
                let err = ServiceError::UnresolvedTeam {
                    team: prop.team.clone(),
                };
                debug!("Dropping {} {}: {}", prop.player, prop.stat, err);
                dropped += 1;
                *unresolved.entry(prop.team.clone()).or_insert(0) += 1;
            }
        }
    }

    if dropped > 0 {
        warn!(
            "Dropped {} of {} props with no current matchup: {:?}",
            dropped,
            props.len(),
            unresolved
        );
    }

    Partition {
        index,
        dropped,
        unresolved,
        conflicts,
    }
}

/// Props for one label, or the not-found error listing valid labels.
pub fn lookup<'a>(index: &'a MatchupIndex, label: &str) -> Result<&'a [PropRecord], ServiceError> {
    let wanted = label.trim();
    index
        .get(wanted)
        .map(Vec::as_slice)
        .ok_or_else(|| ServiceError::UnknownMatchup {
            label: wanted.to_string(),
            available: index.keys().cloned().collect(),
        })
}
