//! Player prop aggregation service.
//!
//! Props are pulled from The Odds API, attributed to teams via roster
//! lookups, scored against each player's recent games, grouped by today's
//! matchups and cached per league. A refresh
//! scheduler rewrites the cache on fixed intervals; the HTTP layer only
//! reads it.

pub mod ai;
pub mod cache;
pub mod clock;
pub mod config;
pub mod contextual;
pub mod environment;
pub mod error;
pub mod health;
pub mod matchups;
pub mod odds;
pub mod partition;
pub mod probability;
pub mod props;
pub mod roster;
pub mod routes;
pub mod scheduler;
pub mod teams;

pub use error::{Result, ServiceError};
