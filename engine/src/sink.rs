//! Result persistence boundary.
//!
//! The engine only ever talks to finished-match storage through this trait.
//! Calls happen off the physics critical path (fire-and-forget with logged
//! failure) and must be idempotent: completion paths can race, so storage is
//! guarded by [`ResultSink::has_stored_result`] in addition to the session's
//! in-memory flag.

use proto::PlayerId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Everything needed to persist one completed match.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub session_id: String,
    pub participants: [PlayerId; 2],
    pub scores: HashMap<PlayerId, u32>,
    pub winner_id: Option<PlayerId>,
    pub started_at: Option<SystemTime>,
    pub completed_at: SystemTime,
}

pub trait ResultSink: Send + Sync {
    /// True when a result for this session id was already persisted.
    fn has_stored_result(&self, session_id: &str) -> Result<bool, SinkError>;

    /// Persists the match result, returning the persisted id.
    fn store_match_result(&self, record: &MatchRecord) -> Result<String, SinkError>;

    /// Records the display-history row for a persisted match.
    fn record_match_history(
        &self,
        persisted_id: &str,
        display_names: &HashMap<PlayerId, String>,
        scores: &HashMap<PlayerId, u32>,
        duration_ms: u64,
    ) -> Result<(), SinkError>;

    /// Updates one human participant's aggregate statistics. Must be called
    /// at most once per human per match, never for bot identities.
    fn update_player_stats(
        &self,
        player: &PlayerId,
        won: bool,
        duration_ms: u64,
        reward_earned: u32,
    ) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerStatsRow {
    pub total_games: u32,
    pub total_wins: u32,
    pub total_reward: u64,
}

#[derive(Default)]
struct MemorySinkState {
    results: HashMap<String, MatchRecord>,
    history: Vec<String>,
    stats: HashMap<PlayerId, PlayerStatsRow>,
}

/// Mutex-guarded in-memory sink for tests and the demo binary.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemorySinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result_count(&self) -> usize {
        self.state.lock().unwrap().results.len()
    }

    pub fn stats_for(&self, player: &PlayerId) -> Option<PlayerStatsRow> {
        self.state.lock().unwrap().stats.get(player).cloned()
    }

    pub fn stats_len(&self) -> usize {
        self.state.lock().unwrap().stats.len()
    }

    pub fn result_for(&self, session_id: &str) -> Option<MatchRecord> {
        self.state.lock().unwrap().results.get(session_id).cloned()
    }
}

impl ResultSink for MemorySink {
    fn has_stored_result(&self, session_id: &str) -> Result<bool, SinkError> {
        Ok(self.state.lock().unwrap().results.contains_key(session_id))
    }

    fn store_match_result(&self, record: &MatchRecord) -> Result<String, SinkError> {
        let mut state = self.state.lock().unwrap();
        state
            .results
            .insert(record.session_id.clone(), record.clone());
        Ok(record.session_id.clone())
    }

    fn record_match_history(
        &self,
        persisted_id: &str,
        _display_names: &HashMap<PlayerId, String>,
        _scores: &HashMap<PlayerId, u32>,
        _duration_ms: u64,
    ) -> Result<(), SinkError> {
        self.state
            .lock()
            .unwrap()
            .history
            .push(persisted_id.to_string());
        Ok(())
    }

    fn update_player_stats(
        &self,
        player: &PlayerId,
        won: bool,
        _duration_ms: u64,
        reward_earned: u32,
    ) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        let row = state.stats.entry(player.clone()).or_default();
        row.total_games += 1;
        if won {
            row.total_wins += 1;
        }
        row.total_reward += u64::from(reward_earned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str) -> MatchRecord {
        let mut scores = HashMap::new();
        scores.insert("alice".to_string(), 3);
        scores.insert("bob".to_string(), 1);
        MatchRecord {
            session_id: session_id.to_string(),
            participants: ["alice".to_string(), "bob".to_string()],
            scores,
            winner_id: Some("alice".to_string()),
            started_at: Some(SystemTime::now()),
            completed_at: SystemTime::now(),
        }
    }

    #[test]
    fn stored_result_is_visible_to_idempotency_check() {
        let sink = MemorySink::new();
        assert!(!sink.has_stored_result("game-1").unwrap());

        sink.store_match_result(&record("game-1")).unwrap();
        assert!(sink.has_stored_result("game-1").unwrap());
        assert_eq!(sink.result_count(), 1);
    }

    #[test]
    fn stats_accumulate_per_player() {
        let sink = MemorySink::new();
        let alice = "alice".to_string();

        sink.update_player_stats(&alice, true, 60_000, 100).unwrap();
        sink.update_player_stats(&alice, false, 60_000, 10).unwrap();

        let row = sink.stats_for(&alice).unwrap();
        assert_eq!(row.total_games, 2);
        assert_eq!(row.total_wins, 1);
        assert_eq!(row.total_reward, 110);
    }
}
