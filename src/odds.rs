//! The Odds API client: schedule, event list and per-event prop markets.

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Result, ServiceError};
use crate::teams::League;

/// The Odds API event structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct OddsApiEvent {
    pub id: String,
    pub sport_key: String,
    pub sport_title: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub home_team: String,
    pub away_team: String,
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Bookmaker {
    pub key: String,
    pub title: String,
    pub last_update: Option<DateTime<Utc>>,
    pub markets: Vec<Market>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Market {
    pub key: String,
    pub last_update: Option<DateTime<Utc>>,
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Outcome {
    /// Team name for game markets; "Over"/"Under"/"Yes"/"No" for props.
    pub name: String,
    /// Player name for prop markets.
    pub description: Option<String>,
    pub price: Option<i32>,
    pub point: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OddsApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub preferred_bookmakers: Vec<String>,
    pub lookahead_hours: i64,
    pub timeout: Duration,
    pub max_retries: u32,
}

type DirectLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

pub struct OddsApiClient {
    config: OddsApiConfig,
    http_client: reqwest::Client,
    rate_limiter: DirectLimiter,
    clock: Arc<dyn Clock>,
}

/// Format accepted by the `commenceTimeFrom`/`commenceTimeTo` parameters.
pub fn api_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

impl OddsApiClient {
    pub fn new(config: OddsApiConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        // 45 requests per minute (The Odds API limit)
        let per_minute = NonZeroU32::new(45).context("rate limit must be non-zero")?;
        let rate_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
            rate_limiter,
            clock,
        })
    }

    /// `commenceTimeFrom`/`commenceTimeTo` bounds: now through the lookahead.
    fn window(&self) -> (String, String) {
        let now = self.clock.now();
        let end = now + ChronoDuration::hours(self.config.lookahead_hours);
        (api_timestamp(now), api_timestamp(end))
    }

    /// GET a JSON document, retrying transport errors, 429 and 5xx with
    /// exponential backoff. Other statuses fail immediately.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/v4{}", self.config.base_url.trim_end_matches('/'), path);
        let mut attempt = 0;

        loop {
            self.rate_limiter.until_ready().await;

            let outcome = self
                .http_client
                .get(&url)
                .query(&[("apiKey", self.config.api_key.as_str())])
                .query(params)
                .send()
                .await;

            let retryable = match outcome {
                Ok(response) => {
                    if let Some(remaining) = response.headers().get("x-requests-remaining") {
                        debug!(
                            "API requests remaining: {}",
                            remaining.to_str().unwrap_or("?")
                        );
                    }

                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| ServiceError::upstream("odds", e))?;

                    if status.is_success() {
                        return serde_json::from_str(&body).map_err(|e| {
                            ServiceError::upstream("odds", format!("unparseable response from {}: {}", path, e))
                        });
                    }

                    let reason = format!("status {}: {}", status, body);
                    if status.is_server_error() || status.as_u16() == 429 {
                        reason
                    } else {
                        return Err(ServiceError::upstream("odds", reason));
                    }
                }
                Err(e) => e.to_string(),
            };

            attempt += 1;
            if attempt > self.config.max_retries {
                return Err(ServiceError::upstream(
                    "odds",
                    format!("{} failed after {} attempts: {}", path, attempt, retryable),
                ));
            }
            warn!("Odds API attempt {} for {} failed: {}. Retrying...", attempt, path, retryable);
            tokio::time::sleep(Duration::from_millis(500 * 2u64.pow(attempt))).await;
        }
    }

    fn bookmaker_filter(&self) -> Option<String> {
        if self.config.preferred_bookmakers.is_empty() {
            None
        } else {
            Some(self.config.preferred_bookmakers.join(","))
        }
    }

    /// Scheduled games with moneyline and totals markets.
    pub async fn fetch_schedule(&self, league: League) -> Result<Vec<OddsApiEvent>> {
        let (from, to) = self.window();
        let path = format!("/sports/{}/odds", league.sport_key());
        let base = vec![
            ("regions", "us".to_string()),
            ("markets", "h2h,totals".to_string()),
            ("oddsFormat", "american".to_string()),
            ("commenceTimeFrom", from),
            ("commenceTimeTo", to),
        ];

        if let Some(books) = self.bookmaker_filter() {
            let mut params = base.clone();
            params.push(("bookmakers", books));
            let events: Vec<OddsApiEvent> = self.get_json(&path, &params).await?;
            if !events.is_empty() {
                info!("Fetched {} {} games from preferred books", events.len(), league);
                return Ok(events);
            }
            warn!("No {} games from preferred books, falling back to all books", league);
        }

        let events: Vec<OddsApiEvent> = self.get_json(&path, &base).await?;
        info!("Fetched {} {} games", events.len(), league);
        Ok(events)
    }

    /// Upcoming events (no odds) inside the lookahead window.
    pub async fn fetch_events(&self, league: League) -> Result<Vec<OddsApiEvent>> {
        let (from, to) = self.window();
        let path = format!("/sports/{}/events", league.sport_key());
        let events: Vec<OddsApiEvent> = self
            .get_json(&path, &[("commenceTimeFrom", from), ("commenceTimeTo", to)])
            .await?;
        info!("Found {} {} events", events.len(), league);
        Ok(events)
    }

    /// Prop markets for one event. An empty preferred-book response is
    /// retried once without the bookmaker filter.
    pub async fn fetch_event_odds(
        &self,
        league: League,
        event_id: &str,
        markets: &[&str],
    ) -> Result<OddsApiEvent> {
        let path = format!("/sports/{}/events/{}/odds", league.sport_key(), event_id);
        let base = vec![
            ("regions", "us".to_string()),
            ("markets", markets.join(",")),
            ("oddsFormat", "american".to_string()),
        ];

        if let Some(books) = self.bookmaker_filter() {
            let mut params = base.clone();
            params.push(("bookmakers", books));
            let event: OddsApiEvent = self.get_json(&path, &params).await?;
            if !event.bookmakers.is_empty() {
                return Ok(event);
            }
        }

        self.get_json(&path, &base).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn client(clock: ManualClock) -> OddsApiClient {
        let config = OddsApiConfig {
            api_key: "k".to_string(),
            base_url: "http://localhost".to_string(),
            preferred_bookmakers: Vec::new(),
            lookahead_hours: 24,
            timeout: Duration::from_secs(1),
            max_retries: 0,
        };
        OddsApiClient::new(config, Arc::new(clock)).unwrap()
    }

    #[test]
    fn test_window_follows_injected_clock() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 7, 4, 16, 0, 0).unwrap());
        let odds = client(clock.clone());
        assert_eq!(
            odds.window(),
            ("2025-07-04T16:00:00Z".to_string(), "2025-07-05T16:00:00Z".to_string())
        );

        clock.advance(ChronoDuration::hours(3));
        assert_eq!(odds.window().0, "2025-07-04T19:00:00Z");
    }

    #[test]
    fn test_api_timestamp_has_no_fraction() {
        let t = Utc.with_ymd_and_hms(2025, 7, 4, 18, 5, 9).unwrap();
        assert_eq!(api_timestamp(t), "2025-07-04T18:05:09Z");
    }

    #[test]
    fn test_parse_prop_event() {
        let body = r#"{
            "id": "abc123",
            "sport_key": "baseball_mlb",
            "commence_time": "2025-07-04T23:10:00Z",
            "home_team": "Seattle Mariners",
            "away_team": "Houston Astros",
            "bookmakers": [{
                "key": "draftkings",
                "title": "DraftKings",
                "markets": [{
                    "key": "batter_hits",
                    "outcomes": [
                        {"name": "Over", "description": "Jose Altuve", "price": -140, "point": 0.5},
                        {"name": "Under", "description": "Jose Altuve", "price": 110, "point": 0.5}
                    ]
                }]
            }]
        }"#;
        let event: OddsApiEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.away_team, "Houston Astros");
        let outcome = &event.bookmakers[0].markets[0].outcomes[0];
        assert_eq!(outcome.description.as_deref(), Some("Jose Altuve"));
        assert_eq!(outcome.price, Some(-140));
        assert_eq!(outcome.point, Some(0.5));
        // Missing fields default rather than fail.
        assert!(event.sport_title.is_empty());
    }
}
