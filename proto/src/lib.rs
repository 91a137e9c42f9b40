//! Shared protocol types for the paddle-arena engine.
//!
//! Everything a transport needs to talk to the engine lives here: the
//! playfield constants, the closed set of inbound [`ClientMessage`] kinds,
//! the outbound [`ServerMessage`] kinds, and the sanitized tournament views.
//! Messages are tagged with a `type` discriminator so a JSON transport can
//! route on it directly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PLAYFIELD_WIDTH: f32 = 1150.0;
pub const PLAYFIELD_HEIGHT: f32 = 534.0;
pub const PADDLE_HEIGHT: f32 = 144.0;
pub const PADDLE_WIDTH: f32 = 20.0;
pub const BALL_SIZE: f32 = 20.0;
pub const BASE_BALL_SPEED: f32 = 5.0;
pub const PADDLE_STEP: f32 = 8.0;
pub const TICKS_PER_SECOND: u32 = 60;
/// Ball speed multiplier applied on every paddle hit. Unbounded on purpose:
/// long volleys are supposed to escalate.
pub const SPEED_GROWTH: f32 = 1.05;
pub const SPIN_FACTOR: f32 = 0.05;
/// Score line awarded to the opponent when a player forfeits or disconnects.
pub const FORFEIT_SCORE: u32 = 5;

pub const WIN_REWARD: u32 = 100;
pub const LOSS_REWARD: u32 = 10;
pub const TIE_REWARD: u32 = 50;
pub const FORFEIT_REWARD: u32 = 0;

/// Opaque player identity. Bot identities carry the `bot-` prefix; the
/// engine parses that exactly once, at session creation.
pub type PlayerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

/// Session lifecycle phase as visible to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Forming,
    Active,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentPhase {
    WaitingForPlayers,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Waiting,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentAction {
    Create,
    Join,
    Leave,
    Start,
    GetInfo,
    ReportResult,
}

/// Inbound messages, routed by the `type` discriminator. Action-specific
/// required fields of the `tournament` kind are optional on the wire and
/// validated by the engine at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinMatchmaking {
        mode: String,
    },
    LeaveMatchmaking,
    LeaveGame,
    PaddleMove {
        game_id: String,
        #[serde(default)]
        position: Option<f32>,
        #[serde(default)]
        direction: Option<MoveDirection>,
    },
    Ready {
        game_id: String,
    },
    ReportScore {
        game_id: String,
        value: u32,
    },
    Tournament {
        action: TournamentAction,
        #[serde(default)]
        tournament_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        max_players: Option<usize>,
        #[serde(default)]
        is_private: Option<bool>,
        #[serde(default)]
        secret: Option<String>,
        #[serde(default)]
        match_id: Option<String>,
        #[serde(default)]
        winner_id: Option<PlayerId>,
    },
}

/// Outbound messages pushed to logical connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PlayerJoined {
        game_id: String,
        player_id: PlayerId,
    },
    GameMatched {
        game_id: String,
        your_player_id: PlayerId,
        opponent_id: PlayerId,
        opponent_is_bot: bool,
        side: Side,
    },
    GameStart {
        game_id: String,
        side: Side,
        opponent_name: String,
        opponent_is_bot: bool,
        duration_ms: u64,
    },
    GameState {
        game_id: String,
        ball_x: f32,
        ball_y: f32,
        left_paddle_y: f32,
        right_paddle_y: f32,
        left_score: u32,
        right_score: u32,
        time_left_secs: u64,
        status: SessionPhase,
    },
    PlayerMoved {
        game_id: String,
        player_id: PlayerId,
        #[serde(default)]
        position: Option<f32>,
        #[serde(default)]
        direction: Option<MoveDirection>,
        is_bot: bool,
    },
    ScoreUpdate {
        game_id: String,
        player_id: PlayerId,
        value: u32,
    },
    MatchEnded {
        game_id: String,
        winner_id: Option<PlayerId>,
        is_tie: bool,
        final_scores: HashMap<PlayerId, u32>,
        rewards: HashMap<PlayerId, u32>,
        /// Personalized per recipient when the registry fans this out.
        reward_earned: u32,
        duration_ms: u64,
    },
    GameCancelled {
        game_id: String,
        reason: String,
        not_ready: Vec<PlayerId>,
    },
    TournamentPlayerJoined {
        tournament_id: String,
        player_id: PlayerId,
        total_players: usize,
        max_players: usize,
    },
    TournamentPlayerLeft {
        tournament_id: String,
        player_id: PlayerId,
        total_players: usize,
        max_players: usize,
    },
    TournamentPlayerEliminated {
        tournament_id: String,
        player_id: PlayerId,
        reason: String,
    },
    TournamentStarted {
        tournament_id: String,
        tournament: TournamentView,
    },
    TournamentRoundStarted {
        tournament_id: String,
        round: u32,
        matches: Vec<MatchView>,
    },
    TournamentMatchCompleted {
        tournament_id: String,
        match_id: String,
        winner_id: PlayerId,
        result: MatchView,
    },
    TournamentCompleted {
        tournament_id: String,
        winner_id: PlayerId,
        tournament: TournamentView,
    },
    TournamentInfo {
        tournament: TournamentView,
    },
    Error {
        message: String,
    },
}

/// Tournament state as exposed to clients. Never carries the join secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentView {
    pub id: String,
    pub name: String,
    pub creator_id: PlayerId,
    pub max_players: usize,
    pub is_private: bool,
    pub status: TournamentPhase,
    pub players: Vec<PlayerId>,
    pub current_round: u32,
    pub winner_id: Option<PlayerId>,
    pub matches: Vec<MatchView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchView {
    pub id: String,
    pub round: u32,
    pub player1: Option<PlayerId>,
    pub player2: Option<PlayerId>,
    pub winner_id: Option<PlayerId>,
    pub status: MatchPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_routes_by_type_tag() {
        let json = r#"{"type":"paddle_move","game_id":"game-1","direction":"up"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::PaddleMove {
                game_id,
                position,
                direction,
            } => {
                assert_eq!(game_id, "game-1");
                assert_eq!(position, None);
                assert_eq!(direction, Some(MoveDirection::Up));
            }
            _ => panic!("Wrong message kind"),
        }
    }

    #[test]
    fn tournament_message_tolerates_missing_action_fields() {
        // Missing tournament_id is a boundary validation concern for the
        // engine, never a deserialization failure.
        let json = r#"{"type":"tournament","action":"join"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Tournament {
                action,
                tournament_id,
                ..
            } => {
                assert_eq!(action, TournamentAction::Join);
                assert_eq!(tournament_id, None);
            }
            _ => panic!("Wrong message kind"),
        }
    }

    #[test]
    fn server_message_serialization_roundtrip() {
        let mut rewards = HashMap::new();
        rewards.insert("alice".to_string(), WIN_REWARD);
        rewards.insert("bob".to_string(), LOSS_REWARD);

        let msg = ServerMessage::MatchEnded {
            game_id: "game-7".to_string(),
            winner_id: Some("alice".to_string()),
            is_tie: false,
            final_scores: HashMap::new(),
            rewards,
            reward_earned: 0,
            duration_ms: 60_000,
        };

        let serialized = serde_json::to_string(&msg).unwrap();
        assert!(serialized.contains(r#""type":"match_ended"#));

        let deserialized: ServerMessage = serde_json::from_str(&serialized).unwrap();
        match deserialized {
            ServerMessage::MatchEnded {
                winner_id, rewards, ..
            } => {
                assert_eq!(winner_id.as_deref(), Some("alice"));
                assert_eq!(rewards.get("alice"), Some(&WIN_REWARD));
            }
            _ => panic!("Wrong message kind after roundtrip"),
        }
    }

    #[test]
    fn side_index_and_opposite() {
        assert_eq!(Side::Left.index(), 0);
        assert_eq!(Side::Right.index(), 1);
        assert_eq!(Side::Left.opposite(), Side::Right);
        assert_eq!(Side::Right.opposite(), Side::Left);
    }

    #[test]
    fn game_state_snapshot_roundtrip() {
        let msg = ServerMessage::GameState {
            game_id: "game-2".to_string(),
            ball_x: PLAYFIELD_WIDTH / 2.0,
            ball_y: PLAYFIELD_HEIGHT / 2.0,
            left_paddle_y: 195.0,
            right_paddle_y: 195.0,
            left_score: 2,
            right_score: 1,
            time_left_secs: 42,
            status: SessionPhase::Active,
        };

        let serialized = serde_json::to_string(&msg).unwrap();
        let deserialized: ServerMessage = serde_json::from_str(&serialized).unwrap();
        match deserialized {
            ServerMessage::GameState {
                left_score,
                right_score,
                status,
                ..
            } => {
                assert_eq!(left_score, 2);
                assert_eq!(right_score, 1);
                assert_eq!(status, SessionPhase::Active);
            }
            _ => panic!("Wrong message kind after roundtrip"),
        }
    }
}
