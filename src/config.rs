use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::teams::League;

const ODDS_API_KEY_SECRET: &str = "/run/secrets/odds_api_key";

/// Configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub odds_api_key: String,
    pub odds_api_base_url: String,
    pub leagues: Vec<League>,
    pub preferred_bookmakers: Vec<String>,
    pub lookahead_hours: i64,
    pub cache_dir: PathBuf,
    /// Optional Redis mirror for cache entries.
    pub redis_url: Option<String>,
    pub http_port: u16,
    pub props_refresh_seconds: u64,
    pub environment_refresh_seconds: u64,
    pub props_max_age_seconds: i64,
    /// Minimum gap between refreshes triggered by stale reads.
    pub refresh_cooldown_seconds: i64,
    pub ai_max_age_seconds: i64,
    pub roster_max_age_seconds: i64,
    pub game_log_max_age_seconds: i64,
    /// Edge needed for a pick: a fraction up to 1, percentage points above.
    pub ai_min_edge: f64,
    pub upstream_timeout_seconds: u64,
    pub upstream_max_retries: u32,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    /// Shared secret for `/_cron/prewarm`. Unset disables the route.
    pub cron_key: Option<String>,
    pub perf_warn_ms: u64,
    /// If true, refresh every league once and exit (no serving)
    pub run_once: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset for optional keys.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // API key: env first, then the Docker secret mount
        let odds_api_key = match lookup("THE_ODDS_API_KEY").or_else(|| lookup("ODDS_API_KEY")) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            Some(_) => return Err(anyhow!("THE_ODDS_API_KEY is set but empty")),
            None => read_secret_file(ODDS_API_KEY_SECRET, "odds_api_key")?,
        };

        // Prevent accidental use of sample/placeholder keys
        let key_lower = odds_api_key.to_lowercase();
        if key_lower.contains("change_me")
            || key_lower.contains("your_")
            || key_lower.starts_with("sample")
        {
            return Err(anyhow!(
                "THE_ODDS_API_KEY appears to be a placeholder value; replace with your real key"
            ));
        }

        let ai_min_edge: f64 = parse_or(&get, "AI_MIN_EDGE", 0.06)?;
        if !ai_min_edge.is_finite() || ai_min_edge < 0.0 {
            return Err(anyhow!("AI_MIN_EDGE must be a non-negative number"));
        }

        let leagues = match get("LEAGUES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<League>().map_err(|e| anyhow!("LEAGUES: {}", e)))
                .collect::<Result<Vec<_>>>()?,
            None => League::ALL.to_vec(),
        };
        if leagues.is_empty() {
            return Err(anyhow!("LEAGUES must name at least one league"));
        }

        let preferred_bookmakers = get("PREFERRED_BOOKMAKERS")
            .unwrap_or_else(|| "draftkings,fanduel,betmgm".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            odds_api_key,
            odds_api_base_url: get("ODDS_API_BASE_URL")
                .unwrap_or_else(|| "https://api.the-odds-api.com".to_string()),
            leagues,
            preferred_bookmakers,
            lookahead_hours: parse_or(&get, "LOOKAHEAD_HOURS", 24)?,
            cache_dir: PathBuf::from(get("CACHE_DIR").unwrap_or_else(|| "cache".to_string())),
            redis_url: get("REDIS_URL"),
            http_port: parse_or(&get, "HTTP_PORT", 5001)?,
            props_refresh_seconds: parse_or(&get, "PROPS_REFRESH_SECONDS", 3600)?,
            environment_refresh_seconds: parse_or(&get, "ENVIRONMENT_REFRESH_SECONDS", 43200)?,
            props_max_age_seconds: parse_or(&get, "PROPS_MAX_AGE_SECONDS", 5400)?,
            refresh_cooldown_seconds: parse_or(&get, "PROPS_REFRESH_COOLDOWN_SECONDS", 300)?,
            ai_max_age_seconds: parse_or(&get, "AI_MAX_AGE_SECONDS", 21600)?,
            roster_max_age_seconds: parse_or(&get, "ROSTER_MAX_AGE_SECONDS", 43200)?,
            game_log_max_age_seconds: parse_or(&get, "GAME_LOG_MAX_AGE_SECONDS", 21600)?,
            ai_min_edge,
            upstream_timeout_seconds: parse_or(&get, "UPSTREAM_TIMEOUT_SECONDS", 20)?,
            upstream_max_retries: parse_or(&get, "UPSTREAM_MAX_RETRIES", 2)?,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            cron_key: get("CRON_KEY"),
            perf_warn_ms: parse_or(&get, "PERF_WARN_MS", 400)?,
            run_once: get("RUN_ONCE")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
        })
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_seconds)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

/// Read a secret from a Docker secret file
fn read_secret_file(file_path: &str, secret_name: &str) -> Result<String> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .context(format!(
            "Secret {} not set in the environment and not found at {}",
            secret_name, file_path
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("THE_ODDS_API_KEY", "abc123")])).unwrap();
        assert_eq!(config.odds_api_key, "abc123");
        assert_eq!(config.http_port, 5001);
        assert_eq!(config.props_refresh_seconds, 3600);
        assert_eq!(config.environment_refresh_seconds, 43200);
        assert_eq!(config.leagues, vec![League::Mlb, League::Nfl]);
        assert_eq!(config.preferred_bookmakers, vec!["draftkings", "fanduel", "betmgm"]);
        assert!(config.redis_url.is_none());
        assert!(!config.run_once);
        assert_eq!(config.refresh_cooldown_seconds, 300);
        assert_eq!(config.ai_min_edge, 0.06);
        assert_eq!(config.game_log_max_age_seconds, 21600);
    }

    #[test]
    fn test_overrides_and_alias_key() {
        let config = Config::from_lookup(lookup(&[
            ("ODDS_API_KEY", "abc123"),
            ("LEAGUES", "mlb"),
            ("HTTP_PORT", "8080"),
            ("REDIS_URL", ""),
            ("RUN_ONCE", "TRUE"),
            ("AI_MIN_EDGE", "4.5"),
            ("PROPS_REFRESH_COOLDOWN_SECONDS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.ai_min_edge, 4.5);
        assert_eq!(config.refresh_cooldown_seconds, 60);
        assert_eq!(config.leagues, vec![League::Mlb]);
        assert_eq!(config.http_port, 8080);
        assert!(config.redis_url.is_none());
        assert!(config.run_once);
    }

    #[test]
    fn test_rejects_placeholder_key() {
        let err = Config::from_lookup(lookup(&[("THE_ODDS_API_KEY", "your_key_here")])).unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("THE_ODDS_API_KEY", "k"), ("HTTP_PORT", "http")])).is_err());
        assert!(Config::from_lookup(lookup(&[("THE_ODDS_API_KEY", "k"), ("LEAGUES", "cricket")])).is_err());
        assert!(Config::from_lookup(lookup(&[("THE_ODDS_API_KEY", "k"), ("AI_MIN_EDGE", "-1")])).is_err());
    }
}
