use anyhow::{anyhow, Result};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use prop_ingestion::ai::{AiAnalyst, OpenAiConfig, OpenAiSummarizer, Summarizer};
use prop_ingestion::cache::{CacheBackend, CacheStore, FileBackend, RedisBackend};
use prop_ingestion::clock::{Clock, SystemClock};
use prop_ingestion::config::Config;
use prop_ingestion::contextual::{edge_threshold_pp, Contextualizer, GameLogSource, MlbGameLogClient};
use prop_ingestion::health::HealthState;
use prop_ingestion::matchups::{MatchupResolver, ScheduleSource};
use prop_ingestion::odds::{OddsApiClient, OddsApiConfig};
use prop_ingestion::props::{OddsPropFetcher, PropSource};
use prop_ingestion::roster::{RosterSource, StatsRosterClient};
use prop_ingestion::routes::{create_router, AppState};
use prop_ingestion::scheduler::{Job, Refresher};

const REDIS_KEY_PREFIX: &str = "prop_ingestion:";
const REDIS_CONNECT_ATTEMPTS: u32 = 3;

async fn cache_backends(config: &Config) -> Result<Vec<Arc<dyn CacheBackend>>> {
    let file = FileBackend::new(&config.cache_dir).await?;
    info!("Cache directory: {}", file.dir().display());
    let mut backends: Vec<Arc<dyn CacheBackend>> = vec![Arc::new(file)];

    if let Some(url) = &config.redis_url {
        match RedisBackend::connect_with_retry(url, REDIS_KEY_PREFIX, REDIS_CONNECT_ATTEMPTS).await {
            Ok(redis) => backends.push(Arc::new(redis)),
            Err(e) => warn!("Continuing without Redis mirror: {}", e),
        }
    }
    Ok(backends)
}

fn summarizer(config: &Config) -> Result<Option<Arc<dyn Summarizer>>> {
    let Some(api_key) = config.openai_api_key.clone() else {
        warn!("OPENAI_API_KEY not set; AI analysis disabled");
        return Ok(None);
    };
    let client = OpenAiSummarizer::new(OpenAiConfig {
        api_key,
        base_url: config.openai_base_url.clone(),
        model: config.openai_model.clone(),
        timeout: config.upstream_timeout(),
    })?;
    Ok(Some(Arc::new(client)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Local development only; deployments set real env vars or mount secrets
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("prop_ingestion=info".parse()?),
        )
        .init();

    info!("Prop ingestion service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Leagues: {:?}", config.leagues);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let odds = Arc::new(OddsApiClient::new(
        OddsApiConfig {
            api_key: config.odds_api_key.clone(),
            base_url: config.odds_api_base_url.clone(),
            preferred_bookmakers: config.preferred_bookmakers.clone(),
            lookahead_hours: config.lookahead_hours,
            timeout: config.upstream_timeout(),
            max_retries: config.upstream_max_retries,
        },
        clock.clone(),
    )?);
    let rosters: Arc<dyn RosterSource> = Arc::new(StatsRosterClient::new(config.upstream_timeout())?);
    let props_source: Arc<dyn PropSource> = Arc::new(OddsPropFetcher::new(
        odds.clone(),
        rosters,
        clock.clone(),
        ChronoDuration::seconds(config.roster_max_age_seconds),
    ));
    let schedule: Arc<dyn ScheduleSource> = odds;
    let resolver = Arc::new(MatchupResolver::new(schedule));

    let backends = cache_backends(&config).await?;
    let props_cache = Arc::new(CacheStore::new(backends.clone(), clock.clone()));
    let environment_cache = Arc::new(CacheStore::new(backends.clone(), clock.clone()));
    let ai_cache = CacheStore::new(backends, clock.clone());

    // Serve the last persisted snapshot until the first refresh lands
    for &league in &config.leagues {
        props_cache.hydrate(&Job::Props.cache_key(league)).await;
        environment_cache
            .hydrate(&Job::Environment.cache_key(league))
            .await;
    }

    let game_logs: Arc<dyn GameLogSource> = Arc::new(MlbGameLogClient::new(config.upstream_timeout())?);
    let min_edge_pp = edge_threshold_pp(config.ai_min_edge);
    info!("Contextual picks need an edge of {:.1} points", min_edge_pp);
    let contextualizer = Arc::new(Contextualizer::new(
        game_logs,
        clock.clone(),
        min_edge_pp,
        ChronoDuration::seconds(config.game_log_max_age_seconds),
    ));

    let health = HealthState::new();
    let refresher = Arc::new(
        Refresher::new(
            resolver,
            props_source,
            props_cache.clone(),
            environment_cache.clone(),
            health.clone(),
        )
        .with_contextualizer(contextualizer)
        .with_cooldown(ChronoDuration::seconds(config.refresh_cooldown_seconds)),
    );

    // One-shot mode: refresh every league once and exit
    if config.run_once {
        info!("Running in one-shot mode (RUN_ONCE=true)");
        let mut failures = 0;
        for job in [Job::Props, Job::Environment] {
            for (league, result) in refresher.run_all(job, &config.leagues).await {
                match result {
                    Ok(outcome) => info!("One-shot {} refresh for {}: {:?}", job, league, outcome),
                    Err(e) => {
                        error!("One-shot {} refresh for {} failed: {}", job, league, e);
                        failures += 1;
                    }
                }
            }
        }
        if failures > 0 {
            return Err(anyhow!("{} one-shot refreshes failed", failures));
        }
        return Ok(());
    }

    let analyst = Arc::new(AiAnalyst::new(
        summarizer(&config)?,
        ai_cache,
        ChronoDuration::seconds(config.ai_max_age_seconds),
    ));

    let state = AppState {
        leagues: Arc::new(config.leagues.clone()),
        props_cache,
        environment_cache,
        analyst,
        refresher: refresher.clone(),
        health,
        props_max_age: ChronoDuration::seconds(config.props_max_age_seconds),
        cron_key: config.cron_key.clone(),
        perf_warn: Duration::from_millis(config.perf_warn_ms),
    };
    if state.cron_key.is_none() {
        warn!("CRON_KEY not set; /_cron/prewarm will reject every request");
    }

    tokio::spawn(refresher.clone().run(
        Job::Props,
        config.leagues.clone(),
        Duration::from_secs(config.props_refresh_seconds),
    ));
    tokio::spawn(refresher.run(
        Job::Environment,
        config.leagues.clone(),
        Duration::from_secs(config.environment_refresh_seconds),
    ));

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);

    let app = create_router(state);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // Handle shutdown gracefully
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        result = server => {
            match result {
                Ok(Ok(())) => info!("HTTP server stopped"),
                Ok(Err(e)) => error!("HTTP server error: {:?}", e),
                Err(e) => error!("HTTP server task failed: {:?}", e),
            }
        }
        _ = ctrl_c => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
