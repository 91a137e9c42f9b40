//! Connection registry: the only component that can push a message to a
//! player.
//!
//! The registry owns the identity -> outbound channel mapping. Everything
//! else in the engine holds identities only and resolves through here before
//! sending. Each registration mints a fresh [`ConnectionToken`]; a late
//! disconnect for a token that is no longer on record is ignored, which is
//! what keeps a reconnecting player's new channel safe from their old
//! socket's shutdown.

use log::debug;
use proto::{PlayerId, ServerMessage};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Opaque binding token, unique per `register` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionToken(u64);

pub type OutboundSender = mpsc::UnboundedSender<ServerMessage>;

struct Binding {
    token: ConnectionToken,
    sender: OutboundSender,
}

pub struct ConnectionRegistry {
    connections: HashMap<PlayerId, Binding>,
    next_token: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_token: 1,
        }
    }

    /// Binds `sender` as the live channel for `player`, replacing any prior
    /// binding. Last writer wins, which is what supports reconnection
    /// without an explicit unregister.
    pub fn register(&mut self, player: &PlayerId, sender: OutboundSender) -> ConnectionToken {
        let token = ConnectionToken(self.next_token);
        self.next_token += 1;
        self.connections.insert(
            player.clone(),
            Binding {
                token,
                sender,
            },
        );
        debug!("Registered connection {:?} for {}", token, player);
        token
    }

    /// Removes the binding only if `token` is still the one on record.
    /// Returns true if a binding was removed.
    pub fn unregister(&mut self, player: &PlayerId, token: ConnectionToken) -> bool {
        match self.connections.get(player) {
            Some(binding) if binding.token == token => {
                self.connections.remove(player);
                debug!("Unregistered connection {:?} for {}", token, player);
                true
            }
            Some(_) => {
                debug!(
                    "Ignoring unregister of stale connection {:?} for {}",
                    token, player
                );
                false
            }
            None => false,
        }
    }

    /// Token currently bound for `player`, if any.
    pub fn current_token(&self, player: &PlayerId) -> Option<ConnectionToken> {
        self.connections.get(player).map(|b| b.token)
    }

    /// Best-effort delivery: silently no-ops when the player has no live
    /// channel. Callers cannot distinguish offline from transient, so this
    /// never surfaces an error.
    pub fn send_to(&self, player: &PlayerId, message: ServerMessage) {
        match self.connections.get(player) {
            Some(binding) => {
                if binding.sender.send(message).is_err() {
                    debug!("Dropped message for {}: channel closed", player);
                }
            }
            None => debug!("No live connection for {}", player),
        }
    }

    /// Fans `message` out to every identity. `match_ended` is personalized
    /// per recipient: the recipient's entry from the rewards map is copied
    /// into `reward_earned` on a private clone, never on a shared message.
    pub fn broadcast(&self, players: &[PlayerId], message: &ServerMessage) {
        for player in players {
            let personalized = match message {
                ServerMessage::MatchEnded {
                    game_id,
                    winner_id,
                    is_tie,
                    final_scores,
                    rewards,
                    duration_ms,
                    ..
                } => ServerMessage::MatchEnded {
                    game_id: game_id.clone(),
                    winner_id: winner_id.clone(),
                    is_tie: *is_tie,
                    final_scores: final_scores.clone(),
                    rewards: rewards.clone(),
                    reward_earned: rewards.get(player).copied().unwrap_or(0),
                    duration_ms: *duration_ms,
                },
                other => other.clone(),
            };
            self.send_to(player, personalized);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::{WIN_REWARD, LOSS_REWARD};
    use std::collections::HashMap;

    fn channel() -> (OutboundSender, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_replaces_prior_binding() {
        let mut registry = ConnectionRegistry::new();
        let player = "alice".to_string();

        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();

        let token1 = registry.register(&player, tx1);
        let token2 = registry.register(&player, tx2);
        assert_ne!(token1, token2);
        assert_eq!(registry.len(), 1);

        registry.send_to(
            &player,
            ServerMessage::Error {
                message: "ping".to_string(),
            },
        );
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn stale_unregister_does_not_evict_newer_connection() {
        let mut registry = ConnectionRegistry::new();
        let player = "alice".to_string();

        let (tx1, _rx1) = channel();
        let (tx2, mut rx2) = channel();

        let old_token = registry.register(&player, tx1);
        let new_token = registry.register(&player, tx2);

        assert!(!registry.unregister(&player, old_token));
        assert_eq!(registry.current_token(&player), Some(new_token));

        registry.send_to(
            &player,
            ServerMessage::Error {
                message: "still here".to_string(),
            },
        );
        assert!(rx2.try_recv().is_ok());

        assert!(registry.unregister(&player, new_token));
        assert!(registry.is_empty());
    }

    #[test]
    fn send_to_offline_player_is_silent() {
        let registry = ConnectionRegistry::new();
        registry.send_to(
            &"ghost".to_string(),
            ServerMessage::Error {
                message: "anyone?".to_string(),
            },
        );
    }

    #[test]
    fn broadcast_personalizes_match_ended_rewards() {
        let mut registry = ConnectionRegistry::new();
        let alice = "alice".to_string();
        let bob = "bob".to_string();

        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.register(&alice, tx_a);
        registry.register(&bob, tx_b);

        let mut rewards = HashMap::new();
        rewards.insert(alice.clone(), WIN_REWARD);
        rewards.insert(bob.clone(), LOSS_REWARD);

        let message = ServerMessage::MatchEnded {
            game_id: "game-1".to_string(),
            winner_id: Some(alice.clone()),
            is_tie: false,
            final_scores: HashMap::new(),
            rewards,
            reward_earned: 0,
            duration_ms: 60_000,
        };

        registry.broadcast(&[alice.clone(), bob.clone()], &message);

        match rx_a.try_recv().unwrap() {
            ServerMessage::MatchEnded { reward_earned, .. } => {
                assert_eq!(reward_earned, WIN_REWARD)
            }
            _ => panic!("Wrong message kind"),
        }
        match rx_b.try_recv().unwrap() {
            ServerMessage::MatchEnded { reward_earned, .. } => {
                assert_eq!(reward_earned, LOSS_REWARD)
            }
            _ => panic!("Wrong message kind"),
        }
    }
}
