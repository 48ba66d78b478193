//! Error taxonomy shared by the ingestion pipeline and the HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Odds, stats, language-model or cache-mirror call failed or timed out.
    #[error("upstream {service} unavailable: {reason}")]
    UpstreamUnavailable { service: &'static str, reason: String },

    /// Requested label is not in the current index.
    #[error("matchup '{label}' not found")]
    UnknownMatchup {
        label: String,
        available: Vec<String>,
    },

    /// Prop team does not belong to any current matchup.
    #[error("team '{team}' is not part of any current matchup")]
    UnresolvedTeam { team: String },

    /// Nothing cached yet for a key.
    #[error("no cached entry for '{0}'")]
    CacheMiss(String),

    #[error("unsupported league '{0}'")]
    UnknownLeague(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cache persistence failed: {0}")]
    Persistence(String),
}

impl ServiceError {
    pub fn upstream(service: &'static str, reason: impl std::fmt::Display) -> Self {
        ServiceError::UpstreamUnavailable {
            service,
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Persistence(e.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ServiceError::UnknownMatchup { available, .. } => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": self.to_string(),
                    "available_matchups": available,
                }),
            ),
            ServiceError::UnknownLeague(_) | ServiceError::InvalidInput(_) => {
                (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() }))
            }
            ServiceError::UpstreamUnavailable { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": self.to_string() }),
            ),
            ServiceError::UnresolvedTeam { .. }
            | ServiceError::CacheMiss(_)
            | ServiceError::Persistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Malformed upstream record, rejected before it reaches the pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("player '{0}' has no known team")]
    UnknownPlayerTeam(String),

    #[error("no priced side for {player} {stat}")]
    NoPrice { player: String, stat: String },
}
