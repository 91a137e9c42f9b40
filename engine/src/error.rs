//! Error taxonomy for the orchestration engine.
//!
//! Nothing here is fatal to the process: every error is reported back to the
//! player that caused it and the offending session is left consistent.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("tournament not found: {0}")]
    TournamentNotFound(String),

    #[error("match not found: {0}")]
    MatchNotFound(String),

    /// Operation refused because the target is in the wrong lifecycle state,
    /// e.g. readying a match that is already active.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Capacity or request validation failure, reported at the boundary
    /// before any mutation.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Enqueue refused because the player already owns a live session.
    #[error("already in game {0}")]
    AlreadyInGame(String),
}
