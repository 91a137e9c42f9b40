//! Session: the aggregate root of one match.
//!
//! A session owns exactly two participants (index 0 = left paddle), the
//! authoritative physics state, and every timer bound to its lifecycle. All
//! timer handles are aborted exactly once on any terminal transition;
//! leaking a ticking timer past completion is the failure mode this module
//! exists to prevent.

use crate::bot::BOT_ID_PREFIX;
use crate::physics::PhysicsState;
use crate::registry::ConnectionToken;
use proto::{PlayerId, SessionPhase, Side};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;

pub type SessionId = String;

/// Participant kind, resolved from the identity prefix exactly once at
/// session creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participant {
    Human(PlayerId),
    Bot(PlayerId),
}

impl Participant {
    pub fn from_id(id: PlayerId) -> Self {
        if id.starts_with(BOT_ID_PREFIX) {
            Participant::Bot(id)
        } else {
            Participant::Human(id)
        }
    }

    pub fn id(&self) -> &PlayerId {
        match self {
            Participant::Human(id) | Participant::Bot(id) => id,
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, Participant::Bot(_))
    }
}

/// Timer handles owned by a session. Cancellation is idempotent: every
/// handle is taken out of its slot before being aborted.
#[derive(Debug, Default)]
pub struct SessionTimers {
    pub ready_timeout: Option<JoinHandle<()>>,
    pub match_timer: Option<JoinHandle<()>>,
    pub tick_task: Option<JoinHandle<()>>,
    pub bot_task: Option<JoinHandle<()>>,
}

impl SessionTimers {
    pub fn cancel_ready_timeout(&mut self) {
        if let Some(handle) = self.ready_timeout.take() {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for handle in [
            self.ready_timeout.take(),
            self.match_timer.take(),
            self.tick_task.take(),
            self.bot_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

pub struct Session {
    pub id: SessionId,
    /// Fixed order: index 0 = left paddle, index 1 = right.
    pub participants: [Participant; 2],
    pub mode: String,
    pub status: SessionPhase,
    pub ready: HashSet<PlayerId>,
    /// Connection binding active for each human participant when it joined
    /// (refreshed on re-register), so a stale disconnect cannot kill a
    /// session the player already reconnected to.
    pub bindings: HashMap<PlayerId, ConnectionToken>,
    pub physics: PhysicsState,
    pub duration: Duration,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub started_instant: Option<Instant>,
    pub ended_at: Option<SystemTime>,
    pub rewards: HashMap<PlayerId, u32>,
    pub result_saved: bool,
    /// Set when this session is a tournament match: (tournament id, match id).
    pub tournament: Option<(String, String)>,
    pub timers: SessionTimers,
}

impl Session {
    pub fn new(
        id: SessionId,
        left: Participant,
        right: Participant,
        mode: &str,
        duration: Duration,
    ) -> Self {
        let mut ready = HashSet::new();
        // Bots never send a ready signal; they are ready at creation.
        for participant in [&left, &right] {
            if participant.is_bot() {
                ready.insert(participant.id().clone());
            }
        }

        Self {
            id,
            participants: [left, right],
            mode: mode.to_string(),
            status: SessionPhase::Forming,
            ready,
            bindings: HashMap::new(),
            physics: PhysicsState::new(),
            duration,
            created_at: SystemTime::now(),
            started_at: None,
            started_instant: None,
            ended_at: None,
            rewards: HashMap::new(),
            result_saved: false,
            tournament: None,
            timers: SessionTimers::default(),
        }
    }

    pub fn player_ids(&self) -> [PlayerId; 2] {
        [
            self.participants[0].id().clone(),
            self.participants[1].id().clone(),
        ]
    }

    pub fn side_of(&self, player: &PlayerId) -> Option<Side> {
        if self.participants[0].id() == player {
            Some(Side::Left)
        } else if self.participants[1].id() == player {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn opponent_of(&self, player: &PlayerId) -> Option<&Participant> {
        self.side_of(player)
            .map(|side| &self.participants[side.opposite().index()])
    }

    /// Marks the player ready. Returns false for identities that are not
    /// participants.
    pub fn mark_ready(&mut self, player: &PlayerId) -> bool {
        if self.side_of(player).is_none() {
            return false;
        }
        self.ready.insert(player.clone());
        true
    }

    pub fn all_ready(&self) -> bool {
        self.participants
            .iter()
            .all(|p| self.ready.contains(p.id()))
    }

    pub fn not_ready_players(&self) -> Vec<PlayerId> {
        self.participants
            .iter()
            .filter(|p| !self.ready.contains(p.id()))
            .map(|p| p.id().clone())
            .collect()
    }

    pub fn bot(&self) -> Option<(&Participant, Side)> {
        if self.participants[0].is_bot() {
            Some((&self.participants[0], Side::Left))
        } else if self.participants[1].is_bot() {
            Some((&self.participants[1], Side::Right))
        } else {
            None
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SessionPhase::Completed | SessionPhase::Abandoned
        )
    }

    pub fn time_left(&self, now: Instant) -> Duration {
        match self.started_instant {
            Some(started) => self
                .duration
                .saturating_sub(now.saturating_duration_since(started)),
            None => self.duration,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self.started_instant {
            Some(started) => started.elapsed().as_millis() as u64,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(left: &str, right: &str) -> Session {
        Session::new(
            "game-1".to_string(),
            Participant::from_id(left.to_string()),
            Participant::from_id(right.to_string()),
            "classic",
            Duration::from_secs(60),
        )
    }

    #[test]
    fn participant_kind_resolved_from_prefix_once() {
        assert!(Participant::from_id("bot-123".to_string()).is_bot());
        assert!(!Participant::from_id("alice".to_string()).is_bot());
        // A human whose name merely contains "bot" stays human.
        assert!(!Participant::from_id("robot_fan".to_string()).is_bot());
    }

    #[test]
    fn bots_are_auto_ready_at_creation() {
        let s = session("alice", "bot-42");
        assert!(s.ready.contains("bot-42"));
        assert!(!s.all_ready());
        assert_eq!(s.not_ready_players(), vec!["alice".to_string()]);
    }

    #[test]
    fn both_ready_after_human_signals() {
        let mut s = session("alice", "bob");
        assert!(s.mark_ready(&"alice".to_string()));
        assert!(!s.all_ready());
        assert!(s.mark_ready(&"bob".to_string()));
        assert!(s.all_ready());
    }

    #[test]
    fn non_participant_cannot_ready() {
        let mut s = session("alice", "bob");
        assert!(!s.mark_ready(&"mallory".to_string()));
    }

    #[test]
    fn sides_are_fixed_at_creation() {
        let s = session("alice", "bob");
        assert_eq!(s.side_of(&"alice".to_string()), Some(Side::Left));
        assert_eq!(s.side_of(&"bob".to_string()), Some(Side::Right));
        assert_eq!(s.side_of(&"mallory".to_string()), None);
        assert_eq!(
            s.opponent_of(&"alice".to_string()).map(|p| p.id().clone()),
            Some("bob".to_string())
        );
    }

    #[test]
    fn bot_side_lookup() {
        let s = session("alice", "bot-7");
        let (bot, side) = s.bot().unwrap();
        assert_eq!(bot.id(), "bot-7");
        assert_eq!(side, Side::Right);
        assert!(session("alice", "bob").bot().is_none());
    }

    #[test]
    fn time_left_counts_down_from_duration() {
        let mut s = session("alice", "bob");
        let now = Instant::now();
        assert_eq!(s.time_left(now), Duration::from_secs(60));

        s.started_instant = Some(now - Duration::from_secs(20));
        let left = s.time_left(now);
        assert!(left <= Duration::from_secs(40));
        assert!(left >= Duration::from_secs(39));
    }
}
