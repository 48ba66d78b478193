//! HTTP surface: matchup-scoped props, environments, recent-form trends,
//! AI analysis and the betting calculators.

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ai::AiAnalyst;
use crate::cache::{CacheEntry, CacheStore};
use crate::environment::EnvironmentMap;
use crate::error::{Result, ServiceError};
use crate::health::{HealthState, DEGRADED_AFTER, UNAVAILABLE_AFTER};
use crate::partition::lookup;
use crate::props::PropRecord;
use crate::probability::{
    calculate_edge, implied_probability, kelly_bet_size, parlay_edge, prob_to_american,
};
use crate::scheduler::{CycleOutcome, Job, PropsSnapshot, Refresher};
use crate::teams::League;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub leagues: Arc<Vec<League>>,
    pub props_cache: Arc<CacheStore<PropsSnapshot>>,
    pub environment_cache: Arc<CacheStore<EnvironmentMap>>,
    pub analyst: Arc<AiAnalyst>,
    pub refresher: Arc<Refresher>,
    pub health: HealthState,
    pub props_max_age: ChronoDuration,
    pub cron_key: Option<String>,
    pub perf_warn: Duration,
}

impl AppState {
    /// League from a query or path value; defaults to the first configured one.
    fn league(&self, raw: Option<&str>) -> Result<League> {
        let league = match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw.parse::<League>()?,
            None => self
                .leagues
                .first()
                .copied()
                .ok_or_else(|| ServiceError::UnknownLeague(String::new()))?,
        };
        if !self.leagues.contains(&league) {
            return Err(ServiceError::UnknownLeague(league.to_string()));
        }
        Ok(league)
    }

    /// Current props snapshot. A stale or missing entry schedules a
    /// background refresh and the request proceeds with what is cached.
    fn props_snapshot(&self, league: League) -> Option<Arc<CacheEntry<PropsSnapshot>>> {
        let entry = self.props_cache.get(&Job::Props.cache_key(league));
        let now = self.props_cache.now();
        let stale = entry
            .as_ref()
            .map_or(true, |e| !e.is_fresh(now, self.props_max_age));
        if stale {
            info!("Props for {} missing or stale, scheduling refresh", league);
            self.refresher.spawn_refresh(Job::Props, league);
        }
        entry
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Props
        .route("/player_props", get(player_props))
        .route("/api/:league/props", get(league_props))
        .route("/api/:league/environment", get(league_environment))
        .route("/api/:league/matchups", get(league_matchups))
        .route("/api/trends/l10", get(trends_l10))
        // AI analysis
        .route("/ai_suggestion_result", get(ai_suggestion_result))
        // Calculators
        .route("/api/calculator", get(calculator))
        .route("/api/parlay", get(parlay))
        // Ops
        .route("/healthz", get(health_handler))
        .route("/ping", get(ping))
        .route("/_cron/prewarm", get(cron_prewarm))
        .route("/_perf/cache", get(perf_cache))
        .layer(middleware::from_fn_with_state(state.clone(), track_request))
        .with_state(state)
}

/// Wraps each request in a span carrying its request id and warns on slow
/// responses.
async fn track_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!("request", id = %request_id, %method, %path);
    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let elapsed = start.elapsed();

    span.in_scope(|| {
        if elapsed > state.perf_warn {
            warn!(
                "Slow request: {} {} took {}ms (status {})",
                method,
                path,
                elapsed.as_millis(),
                response.status()
            );
        }
    });
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[derive(Debug, Deserialize)]
pub struct PropsQuery {
    pub league: Option<String>,
    pub matchup: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MatchupQuery {
    pub matchup: Option<String>,
}

fn props_response(state: &AppState, league: League, matchup: Option<&str>) -> Result<Response> {
    let entry = state.props_snapshot(league);
    let empty = PropsSnapshot::default();
    let snapshot = entry.as_ref().map(|e| &e.payload).unwrap_or(&empty);

    if let Some(label) = matchup.filter(|m| !m.trim().is_empty()) {
        let props = lookup(&snapshot.index, label)?;
        return Ok(Json(props).into_response());
    }

    let generated_at: Option<DateTime<Utc>> = entry.as_ref().map(|e| e.created_at);
    Ok(Json(json!({
        "league": league,
        "generated_at": generated_at,
        "matchups": snapshot.index,
        "total_props": snapshot.total_props,
        "dropped": snapshot.dropped,
        "unresolved": snapshot.unresolved,
    }))
    .into_response())
}

/// GET /player_props
async fn player_props(
    State(state): State<AppState>,
    Query(query): Query<PropsQuery>,
) -> Result<Response> {
    let league = state.league(query.league.as_deref())?;
    props_response(&state, league, query.matchup.as_deref())
}

/// GET /api/:league/props
async fn league_props(
    State(state): State<AppState>,
    Path(league): Path<String>,
    Query(query): Query<MatchupQuery>,
) -> Result<Response> {
    let league = state.league(Some(&league))?;
    props_response(&state, league, query.matchup.as_deref())
}

/// GET /api/:league/environment
async fn league_environment(
    State(state): State<AppState>,
    Path(league): Path<String>,
) -> Result<Json<EnvironmentMap>> {
    let league = state.league(Some(&league))?;
    let map = state
        .environment_cache
        .get(&Job::Environment.cache_key(league))
        .map(|e| e.payload.clone())
        .unwrap_or_default();
    Ok(Json(map))
}

/// GET /api/:league/matchups
///
/// Live schedule; an upstream failure reads as an empty slate.
async fn league_matchups(
    State(state): State<AppState>,
    Path(league): Path<String>,
) -> Result<Json<Value>> {
    let league = state.league(Some(&league))?;
    let matchups = state.refresher.resolver().resolve(league).await;
    Ok(Json(json!({
        "league": league,
        "count": matchups.len(),
        "matchups": matchups,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    pub league: Option<String>,
    pub matchup: Option<String>,
    pub player: Option<String>,
}

/// GET /api/trends/l10
///
/// Last-ten-game over rates already attached to the cached props.
async fn trends_l10(
    State(state): State<AppState>,
    Query(query): Query<TrendsQuery>,
) -> Result<Json<Value>> {
    let league = state.league(query.league.as_deref())?;
    let entry = state.props_snapshot(league);
    let empty = PropsSnapshot::default();
    let snapshot = entry.as_ref().map(|e| &e.payload).unwrap_or(&empty);

    let props: Vec<&PropRecord> = match query.matchup.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(label) => lookup(&snapshot.index, label)?.iter().collect(),
        None => snapshot.index.values().flatten().collect(),
    };
    let player = query.player.as_deref().map(str::trim).filter(|p| !p.is_empty());

    let results: Vec<Value> = props
        .into_iter()
        .filter(|p| player.map_or(true, |name| p.player.eq_ignore_ascii_case(name)))
        .filter_map(|p| {
            let ctx = p.contextual.as_ref()?;
            Some(json!({
                "player": p.player,
                "team": p.team,
                "stat": p.stat,
                "stat_label": p.stat_label,
                "line": p.line,
                "hit_rate": ctx.over,
                "games": ctx.games,
                "confidence": ctx.confidence,
                "fallback": ctx.fallback,
                "edge_over": p.ai.edge_over,
                "pick": p.ai.pick,
            }))
        })
        .collect();
    Ok(Json(json!({ "league": league, "results": results })))
}

#[derive(Debug, Deserialize)]
pub struct AiQuery {
    pub league: Option<String>,
    pub matchup: Option<String>,
    pub nocache: Option<String>,
}

/// GET /ai_suggestion_result
async fn ai_suggestion_result(
    State(state): State<AppState>,
    Query(query): Query<AiQuery>,
) -> Result<Response> {
    let league = state.league(query.league.as_deref())?;
    let label = query
        .matchup
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ServiceError::InvalidInput("matchup is required".to_string()))?;

    let entry = state.props_snapshot(league);
    let empty = PropsSnapshot::default();
    let snapshot = entry.as_ref().map(|e| &e.payload).unwrap_or(&empty);
    let props = lookup(&snapshot.index, label)?;
    let props_as_of = entry
        .as_ref()
        .map(|e| e.created_at)
        .unwrap_or_else(|| state.props_cache.now());
    let force = matches!(query.nocache.as_deref(), Some("1") | Some("true"));

    match state
        .analyst
        .analyze(league, label, props, props_as_of, force)
        .await
    {
        Ok(result) => Ok(Json(result).into_response()),
        Err(e) => {
            warn!("AI analysis for {} {} unavailable: {}", league, label, e);
            Ok(Json(json!({
                "league": league,
                "matchup": label,
                "summary": null,
                "available": false,
                "reason": e.to_string(),
            }))
            .into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CalculatorQuery {
    pub prob: Option<String>,
    pub odds: Option<String>,
    pub bankroll: Option<String>,
}

fn required<T: std::str::FromStr>(name: &str, raw: Option<&str>) -> Result<T> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::InvalidInput(format!("{} is required", name)))?;
    raw.parse()
        .map_err(|_| ServiceError::InvalidInput(format!("{} has invalid value '{}'", name, raw)))
}

/// GET /api/calculator
async fn calculator(Query(query): Query<CalculatorQuery>) -> Result<Json<Value>> {
    let prob: f64 = required("prob", query.prob.as_deref())?;
    let odds: i32 = required("odds", query.odds.as_deref())?;
    let edge = calculate_edge(prob, odds)?;

    let mut body = json!({
        "implied_probability": implied_probability(odds),
        "fair_odds": prob_to_american(prob),
        "edge": edge,
    });
    if query.bankroll.is_some() {
        let bankroll: f64 = required("bankroll", query.bankroll.as_deref())?;
        body["kelly_stake"] = json!(kelly_bet_size(prob, odds, bankroll)?);
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct ParlayQuery {
    pub probs: Option<String>,
    pub odds: Option<String>,
}

/// GET /api/parlay
async fn parlay(Query(query): Query<ParlayQuery>) -> Result<Json<Value>> {
    let raw = query
        .probs
        .as_deref()
        .ok_or_else(|| ServiceError::InvalidInput("probs is required".to_string()))?;
    let probs = raw
        .split(',')
        .map(|p| required::<f64>("probs", Some(p)))
        .collect::<Result<Vec<_>>>()?;
    let odds: i32 = required("odds", query.odds.as_deref())?;
    Ok(Json(json!(parlay_edge(&probs, odds)?)))
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let jobs = state.health.snapshot().await;
    let errors = state.health.worst_errors().await;

    let status = if errors > DEGRADED_AFTER { "degraded" } else { "ok" };
    let http_status = if errors > UNAVAILABLE_AFTER {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "prop-ingestion",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "leagues": state.leagues.as_slice(),
            "jobs": jobs,
        })),
    )
}

async fn ping() -> Json<Value> {
    Json(json!({ "status": "running" }))
}

#[derive(Debug, Deserialize)]
pub struct PrewarmQuery {
    pub key: Option<String>,
    pub leagues: Option<String>,
}

fn describe(result: &Result<CycleOutcome>) -> String {
    match result {
        Ok(CycleOutcome::Completed { records }) => format!("ok: {} records", records),
        Ok(CycleOutcome::Skipped) => "skipped: refresh in flight".to_string(),
        Err(e) => format!("error: {}", e),
    }
}

/// GET /_cron/prewarm
async fn cron_prewarm(
    State(state): State<AppState>,
    Query(query): Query<PrewarmQuery>,
) -> Response {
    let authorized = matches!(
        (&state.cron_key, &query.key),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response();
    }

    let requested: Vec<String> = match &query.leagues {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => state.leagues.iter().map(|l| l.to_string()).collect(),
    };

    let mut out = serde_json::Map::new();
    for name in requested {
        let league = match state.league(Some(&name)) {
            Ok(league) => league,
            Err(_) => {
                out.insert(name, json!("skipped: unsupported"));
                continue;
            }
        };
        let props = state.refresher.run_cycle(Job::Props, league).await;
        let environment = state.refresher.run_cycle(Job::Environment, league).await;
        out.insert(
            league.to_string(),
            json!({
                "props": describe(&props),
                "environment": describe(&environment),
            }),
        );
    }
    out.insert("status".to_string(), json!("ok"));
    Json(Value::Object(out)).into_response()
}

/// GET /_perf/cache
async fn perf_cache(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "cache": {
            "props": state.props_cache.metrics(),
            "environment": state.environment_cache.metrics(),
            "ai": state.analyst.cache().metrics(),
        }
    }))
}
