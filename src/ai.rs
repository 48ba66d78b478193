//! Matchup-scoped AI analysis: one summary per (league, matchup), cached.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::error::{Result, ServiceError};
use crate::props::PropRecord;
use crate::teams::League;

/// Props included in one prompt.
const MAX_PROMPT_PROPS: usize = 40;

#[async_trait]
pub trait Summarizer: Send + Sync {
    fn model(&self) -> &str;
    async fn summarize(&self, system: &str, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiSummarizer {
    config: OpenAiConfig,
    http: reqwest::Client,
}

impl OpenAiSummarizer {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create language-model HTTP client")?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn summarize(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.3,
            max_tokens: 700,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::upstream("llm", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::upstream("llm", format!("status {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::upstream("llm", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::upstream("llm", "empty completion"))
    }
}

pub fn system_prompt() -> &'static str {
    "You are a sports betting analyst. You receive player prop lines for a single game \
     with the best available prices, no-vig fair probabilities and the over rate across \
     each player's last ten games. Pick at most five props \
     with the strongest case, say OVER or UNDER for each, and give one sentence of reasoning. \
     Only discuss the players listed. Be concise."
}

fn fmt_price(price: Option<i32>) -> String {
    match price {
        Some(p) if p > 0 => format!("+{}", p),
        Some(p) => p.to_string(),
        None => "-".to_string(),
    }
}

fn fmt_prob(p: Option<f64>) -> String {
    p.map(|p| format!("{:.1}%", p * 100.0))
        .unwrap_or_else(|| "-".to_string())
}

pub fn build_prompt(league: League, matchup: &str, props: &[PropRecord]) -> String {
    let mut prompt = format!(
        "{} game: {}\n{} props (player | team | stat | line | over | under | fair over | fair under | L10 over):\n",
        league.as_str().to_uppercase(),
        matchup,
        props.len()
    );
    for p in props.iter().take(MAX_PROMPT_PROPS) {
        let _ = writeln!(
            prompt,
            "{} | {} | {} | {} | {} | {} | {} | {} | {}",
            p.player,
            p.team,
            p.stat_label,
            p.line.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string()),
            fmt_price(p.over.as_ref().map(|t| t.price)),
            fmt_price(p.under.as_ref().map(|t| t.price)),
            fmt_prob(p.fair.over),
            fmt_prob(p.fair.under),
            fmt_prob(p.contextual.as_ref().map(|c| c.over)),
        );
    }
    if props.len() > MAX_PROMPT_PROPS {
        let _ = writeln!(prompt, "({} more omitted)", props.len() - MAX_PROMPT_PROPS);
    }
    prompt
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSummary {
    pub league: League,
    pub matchup: String,
    pub model: String,
    pub summary: String,
    pub prop_count: usize,
    /// Timestamp of the props snapshot the summary was computed from.
    pub props_as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiResult {
    #[serde(flatten)]
    pub summary: AiSummary,
    pub generated_at: DateTime<Utc>,
    pub cached: bool,
    /// Served from cache because the summarizer failed.
    pub stale: bool,
}

pub fn cache_key(league: League, matchup: &str) -> String {
    format!("ai:{}:{}", league, matchup)
}

pub struct AiAnalyst {
    summarizer: Option<Arc<dyn Summarizer>>,
    cache: CacheStore<AiSummary>,
    max_age: ChronoDuration,
}

impl AiAnalyst {
    pub fn new(
        summarizer: Option<Arc<dyn Summarizer>>,
        cache: CacheStore<AiSummary>,
        max_age: ChronoDuration,
    ) -> Self {
        Self {
            summarizer,
            cache,
            max_age,
        }
    }

    pub fn cache(&self) -> &CacheStore<AiSummary> {
        &self.cache
    }

    /// Summary for one matchup's props. Reuses a cached summary when it is
    /// younger than the max age and built from the same props snapshot.
    pub async fn analyze(
        &self,
        league: League,
        matchup: &str,
        props: &[PropRecord],
        props_as_of: DateTime<Utc>,
        force_refresh: bool,
    ) -> Result<AiResult> {
        let key = cache_key(league, matchup);
        self.cache.hydrate(&key).await;
        let cached = self.cache.get(&key);
        let now = self.cache.now();

        if let Some(entry) = &cached {
            if !force_refresh
                && entry.is_fresh(now, self.max_age)
                && entry.payload.props_as_of == props_as_of
            {
                return Ok(AiResult {
                    summary: entry.payload.clone(),
                    generated_at: entry.created_at,
                    cached: true,
                    stale: false,
                });
            }
        }

        let computed = match &self.summarizer {
            Some(summarizer) => {
                let prompt = build_prompt(league, matchup, props);
                summarizer
                    .summarize(system_prompt(), &prompt)
                    .await
                    .map(|text| (summarizer.model().to_string(), text))
            }
            None => Err(ServiceError::upstream("llm", "no language model configured")),
        };

        match computed {
            Ok((model, text)) => {
                let summary = AiSummary {
                    league,
                    matchup: matchup.to_string(),
                    model,
                    summary: text,
                    prop_count: props.len(),
                    props_as_of,
                };
                let entry = match self.cache.put(&key, summary.clone(), league.as_str()).await {
                    Ok(entry) => entry.created_at,
                    Err(e) => {
                        warn!("Failed to cache AI summary for {}: {}", key, e);
                        now
                    }
                };
                info!("AI summary computed for {} ({} props)", key, props.len());
                Ok(AiResult {
                    summary,
                    generated_at: entry,
                    cached: false,
                    stale: false,
                })
            }
            Err(e) => match cached {
                Some(entry) => {
                    warn!("Summarizer failed for {}, serving cached summary: {}", key, e);
                    Ok(AiResult {
                        summary: entry.payload.clone(),
                        generated_at: entry.created_at,
                        cached: true,
                        stale: true,
                    })
                }
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::{FairProbs, PriceTick};

    #[test]
    fn test_prompt_lists_only_given_props() {
        let prop = PropRecord {
            player: "Jose Altuve".to_string(),
            team: "HOU".to_string(),
            stat: "batter_hits".to_string(),
            stat_label: "Hits".to_string(),
            line: Some(0.5),
            over: Some(PriceTick { book: "dk".into(), price: -140 }),
            under: Some(PriceTick { book: "dk".into(), price: 110 }),
            event_id: "g1".to_string(),
            fair: FairProbs { over: Some(0.5614), under: Some(0.4386) },
            contextual: None,
            ai: Default::default(),
        };
        let prompt = build_prompt(League::Mlb, "HOU @ SEA", &[prop]);
        assert!(prompt.starts_with("MLB game: HOU @ SEA"));
        assert!(prompt.contains("Jose Altuve | HOU | Hits | 0.5 | -140 | +110 | 56.1% | 43.9% | -"));
    }

    #[test]
    fn test_cache_key_includes_label() {
        assert_ne!(
            cache_key(League::Mlb, "HOU @ SEA"),
            cache_key(League::Mlb, "BAL @ CLE")
        );
    }
}
