//! FIFO matchmaking queue.
//!
//! Fairness comes from ordering, not rating: a periodic tick pairs the two
//! oldest waiting players, and a lone player who has waited past the bot
//! threshold is matched against a freshly minted bot. The queue itself is
//! pure data; the engine drives [`MatchmakingQueue::tick`] from its interval
//! timer and owns the resulting session creation.

use proto::PlayerId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub player: PlayerId,
    pub mode: String,
    pub enqueued_at: Instant,
}

/// Pairing decision produced by one matchmaking tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pairing {
    /// The two oldest waiting players.
    Humans(PlayerId, PlayerId, String),
    /// A lone player whose wait exceeded the bot threshold.
    WithBot(PlayerId, String),
}

pub struct MatchmakingQueue {
    entries: VecDeque<QueueEntry>,
    bot_wait_threshold: Duration,
}

impl MatchmakingQueue {
    pub fn new(bot_wait_threshold: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            bot_wait_threshold,
        }
    }

    /// Appends the player with a timestamp. Returns false when the player is
    /// already queued (deduplicated, original position kept).
    pub fn enqueue(&mut self, player: &PlayerId, mode: &str, now: Instant) -> bool {
        if self.contains(player) {
            return false;
        }
        self.entries.push_back(QueueEntry {
            player: player.clone(),
            mode: mode.to_string(),
            enqueued_at: now,
        });
        true
    }

    /// Removes the player unconditionally. Returns true if they were queued.
    pub fn dequeue(&mut self, player: &PlayerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.player != player);
        self.entries.len() != before
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.entries.iter().any(|e| &e.player == player)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops entries for players the engine has discovered to already own a
    /// session (they should never be paired again).
    pub fn retain<F>(&mut self, keep: F)
    where
        F: Fn(&PlayerId) -> bool,
    {
        self.entries.retain(|e| keep(&e.player));
    }

    /// Runs one pairing pass:
    /// 1. two or more waiting: pop the two oldest (FIFO), pair them;
    /// 2. exactly one waiting: bot match if and only if the wait exceeds the
    ///    bot threshold, never earlier;
    /// 3. otherwise nothing this tick.
    pub fn tick(&mut self, now: Instant) -> Option<Pairing> {
        if self.entries.len() >= 2 {
            let first = self.entries.pop_front().expect("len checked");
            let second = self.entries.pop_front().expect("len checked");
            return Some(Pairing::Humans(first.player, second.player, first.mode));
        }

        if let Some(front) = self.entries.front() {
            if now.duration_since(front.enqueued_at) > self.bot_wait_threshold {
                let entry = self.entries.pop_front().expect("front checked");
                return Some(Pairing::WithBot(entry.player, entry.mode));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_WAIT: Duration = Duration::from_secs(10);

    fn queue() -> MatchmakingQueue {
        MatchmakingQueue::new(BOT_WAIT)
    }

    #[test]
    fn pairs_two_oldest_first() {
        let mut q = queue();
        let now = Instant::now();

        q.enqueue(&"a".to_string(), "classic", now - Duration::from_secs(3));
        q.enqueue(&"b".to_string(), "classic", now - Duration::from_secs(2));
        q.enqueue(&"c".to_string(), "classic", now - Duration::from_secs(1));

        match q.tick(now) {
            Some(Pairing::Humans(p1, p2, mode)) => {
                assert_eq!(p1, "a");
                assert_eq!(p2, "b");
                assert_eq!(mode, "classic");
            }
            other => panic!("Expected human pairing, got {:?}", other),
        }
        assert_eq!(q.len(), 1);
        assert!(q.contains(&"c".to_string()));
    }

    #[test]
    fn enqueue_deduplicates() {
        let mut q = queue();
        let now = Instant::now();

        assert!(q.enqueue(&"a".to_string(), "classic", now));
        assert!(!q.enqueue(&"a".to_string(), "classic", now));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn lone_player_waits_for_bot_threshold() {
        let mut q = queue();
        let now = Instant::now();

        q.enqueue(&"a".to_string(), "classic", now - Duration::from_secs(5));
        assert_eq!(q.tick(now), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn lone_player_gets_bot_after_threshold() {
        let mut q = queue();
        let now = Instant::now();

        q.enqueue(&"a".to_string(), "classic", now - Duration::from_secs(11));
        match q.tick(now) {
            Some(Pairing::WithBot(player, mode)) => {
                assert_eq!(player, "a");
                assert_eq!(mode, "classic");
            }
            other => panic!("Expected bot pairing, got {:?}", other),
        }
        assert!(q.is_empty());
    }

    #[test]
    fn empty_queue_tick_is_noop() {
        let mut q = queue();
        assert_eq!(q.tick(Instant::now()), None);
    }

    #[test]
    fn dequeue_removes_unconditionally() {
        let mut q = queue();
        let now = Instant::now();

        q.enqueue(&"a".to_string(), "classic", now);
        q.enqueue(&"b".to_string(), "classic", now);

        assert!(q.dequeue(&"a".to_string()));
        assert!(!q.dequeue(&"a".to_string()));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn retain_drops_players_with_sessions() {
        let mut q = queue();
        let now = Instant::now();

        q.enqueue(&"a".to_string(), "classic", now);
        q.enqueue(&"b".to_string(), "classic", now);

        q.retain(|p| p != "a");
        assert!(!q.contains(&"a".to_string()));
        assert!(q.contains(&"b".to_string()));
    }
}
