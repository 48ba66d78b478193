mod common;

use chrono::Duration;
use std::sync::Arc;
use tokio::sync::Notify;

use prop_ingestion::cache::{CacheBackend, CacheStore, FileBackend};
use prop_ingestion::clock::{Clock, ManualClock};
use prop_ingestion::contextual::{Confidence, Contextualizer, GameLogSource, Pick};
use prop_ingestion::environment::EnvironmentMap;
use prop_ingestion::health::HealthState;
use prop_ingestion::matchups::{MatchupResolver, ScheduleSource};
use prop_ingestion::props::PropSource;
use prop_ingestion::scheduler::{CycleOutcome, Job, PropsSnapshot, RefreshState, Refresher};
use prop_ingestion::teams::League;

use common::{
    clock, hitting_log, scenario_props, two_game_slate, FailingSchedule, FixedGameLogs,
    FixedSchedule, GatedProps, SwitchableProps,
};

struct Harness {
    refresher: Arc<Refresher>,
    props_cache: Arc<CacheStore<PropsSnapshot>>,
    file: Arc<FileBackend>,
    clock: ManualClock,
    _dir: tempfile::TempDir,
}

async fn harness(source: Arc<dyn PropSource>) -> Harness {
    harness_with(Arc::new(FixedSchedule(two_game_slate())), source, |r, _| r).await
}

/// Harness over any schedule; `customize` can attach extras to the
/// refresher before it is shared.
async fn harness_with<F>(
    schedule: Arc<dyn ScheduleSource>,
    source: Arc<dyn PropSource>,
    customize: F,
) -> Harness
where
    F: FnOnce(Refresher, &ManualClock) -> Refresher,
{
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let file = Arc::new(FileBackend::new(dir.path()).await.unwrap());
    let primary: Arc<dyn CacheBackend> = file.clone();
    let backends = vec![primary];
    let props_cache = Arc::new(CacheStore::new(backends.clone(), Arc::new(clock.clone())));
    let environment_cache: Arc<CacheStore<EnvironmentMap>> =
        Arc::new(CacheStore::new(backends, Arc::new(clock.clone())));
    let resolver = Arc::new(MatchupResolver::new(schedule));

    let refresher = Refresher::new(
        resolver,
        source,
        props_cache.clone(),
        environment_cache,
        HealthState::new(),
    );
    let refresher = Arc::new(customize(refresher, &clock));
    Harness {
        refresher,
        props_cache,
        file,
        clock,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_props_cycle_writes_partitioned_snapshot() {
    let h = harness(Arc::new(SwitchableProps::new(scenario_props()))).await;

    let outcome = h.refresher.run_cycle(Job::Props, League::Mlb).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { records: 119 });

    let entry = h.props_cache.get("props:mlb").unwrap();
    assert_eq!(entry.created_at, h.clock.now());
    assert_eq!(entry.payload.total_props, 120);
    assert_eq!(entry.payload.dropped, 1);
    assert_eq!(entry.payload.index.len(), 2);
    assert!(h.file.path_for("props:mlb").exists());
    assert_eq!(h.refresher.state(Job::Props, League::Mlb), RefreshState::Idle);

    let jobs = h.refresher.health().snapshot().await;
    assert_eq!(jobs["props:mlb"].last_count, 119);
}

#[tokio::test]
async fn test_failed_fetch_leaves_stored_entry_untouched() {
    let source = Arc::new(SwitchableProps::new(scenario_props()));
    let h = harness(source.clone()).await;

    h.refresher.run_cycle(Job::Props, League::Mlb).await.unwrap();
    let before = h.props_cache.get("props:mlb").unwrap();
    let bytes = std::fs::read(h.file.path_for("props:mlb")).unwrap();

    h.clock.advance(Duration::hours(1));
    source.set_failing(true);
    assert!(h.refresher.run_cycle(Job::Props, League::Mlb).await.is_err());

    let after = h.props_cache.get("props:mlb").unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(std::fs::read(h.file.path_for("props:mlb")).unwrap(), bytes);
    assert_eq!(h.refresher.state(Job::Props, League::Mlb), RefreshState::Idle);

    let jobs = h.refresher.health().snapshot().await;
    assert_eq!(jobs["props:mlb"].consecutive_errors, 1);
}

#[tokio::test]
async fn test_overlapping_trigger_is_skipped() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let source = Arc::new(GatedProps {
        entered: entered.clone(),
        release: release.clone(),
        props: scenario_props(),
    });
    let h = harness(source).await;

    let refresher = h.refresher.clone();
    let first = tokio::spawn(async move { refresher.run_cycle(Job::Props, League::Mlb).await });

    entered.notified().await;
    assert_eq!(h.refresher.state(Job::Props, League::Mlb), RefreshState::Fetching);
    let second = h.refresher.run_cycle(Job::Props, League::Mlb).await.unwrap();
    assert_eq!(second, CycleOutcome::Skipped);

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first, CycleOutcome::Completed { records: 119 });
    assert_eq!(h.refresher.state(Job::Props, League::Mlb), RefreshState::Idle);
}

#[tokio::test]
async fn test_environment_cycle_writes_map() {
    let h = harness(Arc::new(SwitchableProps::new(Vec::new()))).await;
    // The fixture slate carries no totals, so every game is skipped.
    let outcome = h
        .refresher
        .run_cycle(Job::Environment, League::Mlb)
        .await
        .unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { records: 0 });
    assert!(h.file.path_for("environment:mlb").exists());
}

#[tokio::test]
async fn test_resolve_degrades_to_empty_map() {
    let resolver = MatchupResolver::new(Arc::new(FailingSchedule));
    assert!(resolver.try_resolve(League::Mlb).await.is_err());
    assert!(resolver.resolve(League::Mlb).await.is_empty());

    let resolver = MatchupResolver::new(Arc::new(FixedSchedule(two_game_slate())));
    assert_eq!(resolver.resolve(League::Mlb).await.len(), 2);
}

#[tokio::test]
async fn test_failed_schedule_leaves_stored_entry_untouched() {
    let source = Arc::new(SwitchableProps::new(scenario_props()));
    let h = harness(source.clone()).await;
    h.refresher.run_cycle(Job::Props, League::Mlb).await.unwrap();
    let bytes = std::fs::read(h.file.path_for("props:mlb")).unwrap();

    // Same directory, but the schedule is now down.
    let backend: Arc<dyn CacheBackend> = h.file.clone();
    let props_cache: Arc<CacheStore<PropsSnapshot>> =
        Arc::new(CacheStore::new(vec![backend.clone()], Arc::new(h.clock.clone())));
    assert!(props_cache.hydrate("props:mlb").await);
    let before = props_cache.get("props:mlb").unwrap();
    let refresher = Refresher::new(
        Arc::new(MatchupResolver::new(Arc::new(FailingSchedule))),
        source.clone(),
        props_cache.clone(),
        Arc::new(CacheStore::new(vec![backend], Arc::new(h.clock.clone()))),
        HealthState::new(),
    );

    h.clock.advance(Duration::hours(1));
    assert!(refresher.run_cycle(Job::Props, League::Mlb).await.is_err());
    assert!(refresher.run_cycle(Job::Environment, League::Mlb).await.is_err());

    assert!(Arc::ptr_eq(&before, &props_cache.get("props:mlb").unwrap()));
    assert_eq!(std::fs::read(h.file.path_for("props:mlb")).unwrap(), bytes);
    assert!(!h.file.path_for("environment:mlb").exists());
    assert_eq!(refresher.state(Job::Props, League::Mlb), RefreshState::Idle);
    let jobs = refresher.health().snapshot().await;
    assert_eq!(jobs["props:mlb"].consecutive_errors, 1);
    assert_eq!(jobs["environment:mlb"].consecutive_errors, 1);
}

/// Poll until the background refresh has recorded `errors` failures.
async fn wait_for_errors(refresher: &Refresher, errors: usize) {
    for _ in 0..400 {
        let jobs = refresher.health().snapshot().await;
        if jobs.get("props:mlb").map_or(false, |j| j.consecutive_errors >= errors) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("background refresh never finished");
}

#[tokio::test]
async fn test_spawned_refreshes_respect_cooldown() {
    let source = Arc::new(SwitchableProps::new(scenario_props()));
    source.set_failing(true);
    let h = harness_with(
        Arc::new(FixedSchedule(two_game_slate())),
        source.clone(),
        |r, _| r.with_cooldown(Duration::minutes(5)),
    )
    .await;

    assert!(h.refresher.spawn_refresh(Job::Props, League::Mlb));
    wait_for_errors(&h.refresher, 1).await;
    for _ in 0..20 {
        assert!(!h.refresher.spawn_refresh(Job::Props, League::Mlb));
    }
    // Other pairs have their own window.
    assert!(h.refresher.spawn_refresh(Job::Environment, League::Mlb));

    h.clock.advance(Duration::minutes(4));
    assert!(!h.refresher.spawn_refresh(Job::Props, League::Mlb));
    assert_eq!(source.calls(), 1);

    h.clock.advance(Duration::minutes(1));
    assert!(h.refresher.spawn_refresh(Job::Props, League::Mlb));
    wait_for_errors(&h.refresher, 2).await;
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_props_cycle_attaches_contextual_edges() {
    let mut logs = FixedGameLogs::default();
    // Player 0 (HOU) had two hits in 7 of his last 10 games.
    logs.logs.insert("Player 0".to_string(), hitting_log(10, 7));
    logs.failing.push("Player 1".to_string());
    let logs = Arc::new(logs);

    let source: Arc<dyn GameLogSource> = logs.clone();
    let h = harness_with(
        Arc::new(FixedSchedule(two_game_slate())),
        Arc::new(SwitchableProps::new(scenario_props())),
        |r, clock| {
            let contextualizer = Contextualizer::new(source, Arc::new(clock.clone()), 6.0, Duration::hours(6));
            r.with_contextualizer(Arc::new(contextualizer))
        },
    )
    .await;

    h.refresher.run_cycle(Job::Props, League::Mlb).await.unwrap();
    let entry = h.props_cache.get("props:mlb").unwrap();
    let find = |name: &str| {
        entry
            .payload
            .index
            .values()
            .flatten()
            .find(|p| p.player == name)
            .cloned()
            .unwrap()
    };

    let hot = find("Player 0");
    let ctx = hot.contextual.as_ref().unwrap();
    assert_eq!((ctx.over, ctx.games, ctx.fallback), (0.7, 10, false));
    assert_eq!(ctx.confidence, Confidence::High);
    // Fair over of -120/+100 is 52.17%.
    assert_eq!(hot.ai.edge_over, Some(17.8));
    assert_eq!(hot.ai.edge_under, Some(-17.8));
    assert_eq!(hot.ai.pick, Some(Pick::Over));

    // A failed lookup and an empty log both fall back to the league average.
    for name in ["Player 1", "Player 2"] {
        let p = find(name);
        let ctx = p.contextual.as_ref().unwrap();
        assert!(ctx.fallback);
        assert_eq!(ctx.over, 0.35);
        assert!(p.ai.edge_over.is_some());
        assert_eq!(p.ai.pick, None);
    }

    // Props off the slate are never looked up.
    let requested = logs.requested();
    assert!(!requested.iter().any(|n| n == "Byron Buxton"));
    assert_eq!(requested.len(), 119);

    // Logs are reused while fresh.
    h.refresher.run_cycle(Job::Props, League::Mlb).await.unwrap();
    assert_eq!(logs.requested().len(), 119 + 1);
}
