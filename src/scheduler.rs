//! Timer-driven refresh jobs.
//!
//! Each (job, league) pair moves `Idle -> Fetching -> Partitioning ->
//! Writing -> Idle`. A trigger that arrives while its pair is not idle is
//! skipped, never queued. A failed fetch aborts the cycle before anything
//! is written, so the previous cache entry stays as it was.
//!
//! Request-triggered refreshes are also rate limited: after one is spawned
//! for a pair, further stale reads wait out `cooldown` before spawning
//! another.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::contextual::Contextualizer;
use crate::environment::{build_environments, EnvironmentMap};
use crate::error::Result;
use crate::health::HealthState;
use crate::matchups::MatchupResolver;
use crate::partition::{partition, MatchupIndex};
use crate::props::PropSource;
use crate::teams::League;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    Props,
    Environment,
}

impl Job {
    pub fn as_str(&self) -> &'static str {
        match self {
            Job::Props => "props",
            Job::Environment => "environment",
        }
    }

    /// Cache key the job writes for a league.
    pub fn cache_key(&self, league: League) -> String {
        format!("{}:{}", self.as_str(), league)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Fetching,
    Partitioning,
    Writing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// New entry written with this many records.
    Completed { records: usize },
    /// Another cycle for the same job and league was in flight.
    Skipped,
}

/// Cached payload of the props job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropsSnapshot {
    pub index: MatchupIndex,
    pub total_props: usize,
    pub dropped: usize,
    pub unresolved: BTreeMap<String, usize>,
    pub conflicts: Vec<String>,
    pub rejected: BTreeMap<String, usize>,
}

/// Default gap between request-triggered refreshes of one pair.
pub const DEFAULT_REFRESH_COOLDOWN_SECONDS: i64 = 300;

type StateMap = Mutex<HashMap<(Job, League), RefreshState>>;

/// Holds a (job, league) slot out of `Idle`; dropping it returns the slot.
struct CycleGuard<'a> {
    states: &'a StateMap,
    key: (Job, League),
}

impl<'a> CycleGuard<'a> {
    fn try_begin(states: &'a StateMap, key: (Job, League)) -> Option<Self> {
        let mut map = states.lock().unwrap_or_else(|p| p.into_inner());
        let slot = map.entry(key).or_default();
        if *slot != RefreshState::Idle {
            return None;
        }
        *slot = RefreshState::Fetching;
        Some(Self { states, key })
    }

    fn advance(&self, next: RefreshState) {
        self.states
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(self.key, next);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.advance(RefreshState::Idle);
    }
}

pub struct Refresher {
    resolver: Arc<MatchupResolver>,
    props_source: Arc<dyn PropSource>,
    props_cache: Arc<CacheStore<PropsSnapshot>>,
    environment_cache: Arc<CacheStore<EnvironmentMap>>,
    health: HealthState,
    states: StateMap,
    contextualizer: Option<Arc<Contextualizer>>,
    cooldown: ChronoDuration,
    last_spawned: Mutex<HashMap<(Job, League), DateTime<Utc>>>,
}

impl Refresher {
    pub fn new(
        resolver: Arc<MatchupResolver>,
        props_source: Arc<dyn PropSource>,
        props_cache: Arc<CacheStore<PropsSnapshot>>,
        environment_cache: Arc<CacheStore<EnvironmentMap>>,
        health: HealthState,
    ) -> Self {
        Self {
            resolver,
            props_source,
            props_cache,
            environment_cache,
            health,
            states: Mutex::new(HashMap::new()),
            contextualizer: None,
            cooldown: ChronoDuration::seconds(DEFAULT_REFRESH_COOLDOWN_SECONDS),
            last_spawned: Mutex::new(HashMap::new()),
        }
    }

    /// Attach contextual hit rates and edges to every prop on the slate.
    pub fn with_contextualizer(mut self, contextualizer: Arc<Contextualizer>) -> Self {
        self.contextualizer = Some(contextualizer);
        self
    }

    /// Minimum gap between request-triggered refreshes of one pair.
    pub fn with_cooldown(mut self, cooldown: ChronoDuration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn resolver(&self) -> &MatchupResolver {
        &self.resolver
    }

    pub fn state(&self, job: Job, league: League) -> RefreshState {
        self.states
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(job, league))
            .copied()
            .unwrap_or_default()
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Run one cycle and record the result in the health state.
    pub async fn run_cycle(&self, job: Job, league: League) -> Result<CycleOutcome> {
        let Some(guard) = CycleGuard::try_begin(&self.states, (job, league)) else {
            info!("{} refresh for {} already in flight, skipping", job, league);
            return Ok(CycleOutcome::Skipped);
        };

        let start = Instant::now();
        let key = job.cache_key(league);
        let result = match job {
            Job::Props => self.refresh_props(&guard, league, &key).await,
            Job::Environment => self.refresh_environment(&guard, league, &key).await,
        };
        drop(guard);

        match &result {
            Ok(written_at) => {
                let (at, records) = *written_at;
                self.health.record_success(&key, at, records).await;
                info!("Refreshed {} in {:?} ({} records)", key, start.elapsed(), records);
            }
            Err(e) => {
                self.health.record_error(&key, &e.to_string()).await;
                error!("Refresh of {} failed, keeping previous entry: {}", key, e);
            }
        }
        result.map(|(_, records)| CycleOutcome::Completed { records })
    }

    async fn refresh_props(
        &self,
        guard: &CycleGuard<'_>,
        league: League,
        key: &str,
    ) -> Result<(DateTime<Utc>, usize)> {
        let (matchups, batch) = tokio::join!(
            self.resolver.try_resolve(league),
            self.props_source.fetch_props(league)
        );
        let (matchups, _) = matchups?;
        let mut batch = batch?;

        // Game-log lookups count as fetching; props off the slate are skipped.
        if let Some(contextualizer) = &self.contextualizer {
            let on_slate = batch
                .props
                .iter_mut()
                .filter(|p| matchups.values().any(|m| m.contains(&p.team)));
            contextualizer.enrich(league, on_slate).await;
        }

        guard.advance(RefreshState::Partitioning);
        let split = partition(&batch.props, &matchups);
        let placed: usize = split.index.values().map(Vec::len).sum();
        let snapshot = PropsSnapshot {
            total_props: batch.props.len(),
            dropped: split.dropped,
            unresolved: split.unresolved,
            conflicts: split.conflicts,
            rejected: batch.rejected.into_iter().collect(),
            index: split.index,
        };

        guard.advance(RefreshState::Writing);
        let entry = self.props_cache.put(key, snapshot, league.as_str()).await?;
        Ok((entry.created_at, placed))
    }

    async fn refresh_environment(
        &self,
        guard: &CycleGuard<'_>,
        league: League,
        key: &str,
    ) -> Result<(DateTime<Utc>, usize)> {
        let (_, events) = self.resolver.try_resolve(league).await?;

        guard.advance(RefreshState::Partitioning);
        let environments = build_environments(league, &events);
        let count = environments.len();

        guard.advance(RefreshState::Writing);
        let entry = self
            .environment_cache
            .put(key, environments, league.as_str())
            .await?;
        Ok((entry.created_at, count))
    }

    /// Refresh every league once, in order. Failures are already logged.
    pub async fn run_all(&self, job: Job, leagues: &[League]) -> Vec<(League, Result<CycleOutcome>)> {
        let mut results = Vec::with_capacity(leagues.len());
        for &league in leagues {
            results.push((league, self.run_cycle(job, league).await));
        }
        results
    }

    /// Loop forever, refreshing `leagues` every `period`. The first tick
    /// fires immediately.
    pub async fn run(self: Arc<Self>, job: Job, leagues: Vec<League>, period: Duration) {
        info!(
            "Starting {} refresh loop for {:?} (interval: {}s)",
            job,
            leagues,
            period.as_secs()
        );
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.run_all(job, &leagues).await;
        }
    }

    /// Fire-and-forget refresh, used when a request finds stale data. At
    /// most one is spawned per pair and cooldown, whatever the outcome.
    /// Returns whether a refresh was spawned.
    pub fn spawn_refresh(self: &Arc<Self>, job: Job, league: League) -> bool {
        if self.state(job, league) != RefreshState::Idle {
            return false;
        }
        let now = self.props_cache.now();
        {
            let mut last = self.last_spawned.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(at) = last.get(&(job, league)) {
                if now - *at < self.cooldown {
                    debug!("{} refresh for {} spawned at {}, cooling down", job, league, at);
                    return false;
                }
            }
            last.insert((job, league), now);
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run_cycle(job, league).await {
                warn!("Background {} refresh for {} failed: {}", job, league, e);
            }
        });
        true
    }
}
