//! Single-elimination tournament bracket, built on Session as the match
//! primitive.
//!
//! The bracket is generated once, at start: round 1 from a random
//! permutation of the registered players, and empty placeholder matches for
//! every later round (count halving each round, final round exactly one
//! match). Later rounds are populated incrementally as results come in.

use crate::error::EngineError;
use crate::session::SessionId;
use log::info;
use proto::{MatchPhase, MatchView, PlayerId, TournamentPhase, TournamentView};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const MIN_TOURNAMENT_PLAYERS: usize = 4;

#[derive(Debug, Clone)]
pub struct TournamentPlayer {
    pub id: PlayerId,
    pub eliminated: bool,
}

#[derive(Debug, Clone)]
pub struct TournamentMatch {
    pub id: String,
    pub round: u32,
    /// Slots are empty until the previous round resolves them.
    pub players: [Option<PlayerId>; 2],
    pub session_id: Option<SessionId>,
    pub status: MatchPhase,
    pub winner: Option<PlayerId>,
}

#[derive(Debug)]
pub struct Tournament {
    pub id: String,
    pub name: String,
    pub creator: PlayerId,
    pub max_players: usize,
    pub is_private: bool,
    pub secret: Option<String>,
    pub status: TournamentPhase,
    pub players: Vec<TournamentPlayer>,
    pub bracket: Vec<TournamentMatch>,
    pub current_round: u32,
    pub winner: Option<PlayerId>,
}

/// A freshly populated match whose session the engine must now create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMatch {
    pub match_id: String,
    pub player1: PlayerId,
    pub player2: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Removed before start; the tournament may have been deleted or handed
    /// to a new creator.
    Removed {
        tournament_deleted: bool,
        new_creator: Option<PlayerId>,
    },
    /// The tournament already started: the player is marked eliminated and
    /// bracket history stays intact.
    Eliminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOutcome {
    /// Result recorded; the current round still has open matches.
    MatchRecorded,
    /// The round finished and the next one has been populated.
    RoundAdvanced { round: u32, matches: Vec<NewMatch> },
    /// The final resolved; the tournament is complete.
    Champion(PlayerId),
}

fn is_power_of_two(n: usize) -> bool {
    n > 0 && n & (n - 1) == 0
}

fn mint_tournament_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64;
    format!("tournament-{}-{:04x}", millis, rand::random::<u16>())
}

pub struct TournamentEngine {
    tournaments: HashMap<String, Tournament>,
    /// identity -> tournament id, enforcing one tournament per player.
    player_index: HashMap<PlayerId, String>,
}

impl TournamentEngine {
    pub fn new() -> Self {
        Self {
            tournaments: HashMap::new(),
            player_index: HashMap::new(),
        }
    }

    pub fn get(&self, tournament_id: &str) -> Result<&Tournament, EngineError> {
        self.tournaments
            .get(tournament_id)
            .ok_or_else(|| EngineError::TournamentNotFound(tournament_id.to_string()))
    }

    fn get_mut(&mut self, tournament_id: &str) -> Result<&mut Tournament, EngineError> {
        self.tournaments
            .get_mut(tournament_id)
            .ok_or_else(|| EngineError::TournamentNotFound(tournament_id.to_string()))
    }

    /// Tournament the player currently belongs to, if any.
    pub fn tournament_of(&self, player: &PlayerId) -> Option<&String> {
        self.player_index.get(player)
    }

    pub fn player_ids(&self, tournament_id: &str) -> Vec<PlayerId> {
        self.tournaments
            .get(tournament_id)
            .map(|t| t.players.iter().map(|p| p.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Creates a tournament and auto-joins the creator.
    pub fn create(
        &mut self,
        creator: &PlayerId,
        name: &str,
        max_players: usize,
        is_private: bool,
        secret: Option<String>,
    ) -> Result<String, EngineError> {
        if !is_power_of_two(max_players) || max_players < MIN_TOURNAMENT_PLAYERS {
            return Err(EngineError::Validation(format!(
                "capacity must be a power of two of at least {} (got {})",
                MIN_TOURNAMENT_PLAYERS, max_players
            )));
        }
        if self.player_index.contains_key(creator) {
            return Err(EngineError::InvalidState(
                "player is already in a tournament".to_string(),
            ));
        }

        let id = mint_tournament_id();
        let tournament = Tournament {
            id: id.clone(),
            name: name.to_string(),
            creator: creator.clone(),
            max_players,
            is_private,
            secret,
            status: TournamentPhase::WaitingForPlayers,
            players: vec![TournamentPlayer {
                id: creator.clone(),
                eliminated: false,
            }],
            bracket: Vec::new(),
            current_round: 1,
            winner: None,
        };

        info!(
            "Tournament {} ({}) created by {}, capacity {}",
            id, name, creator, max_players
        );
        self.tournaments.insert(id.clone(), tournament);
        self.player_index.insert(creator.clone(), id.clone());
        Ok(id)
    }

    pub fn join(
        &mut self,
        player: &PlayerId,
        tournament_id: &str,
        secret: Option<&str>,
    ) -> Result<(), EngineError> {
        if self.player_index.contains_key(player) {
            return Err(EngineError::InvalidState(
                "player is already in a tournament".to_string(),
            ));
        }

        let tournament = self.get_mut(tournament_id)?;
        if tournament.status != TournamentPhase::WaitingForPlayers {
            return Err(EngineError::InvalidState(
                "tournament has already started".to_string(),
            ));
        }
        if tournament.is_private && tournament.secret.as_deref() != secret {
            return Err(EngineError::Validation("invalid secret".to_string()));
        }
        if tournament.players.len() >= tournament.max_players {
            return Err(EngineError::Validation("tournament is full".to_string()));
        }

        tournament.players.push(TournamentPlayer {
            id: player.clone(),
            eliminated: false,
        });
        self.player_index
            .insert(player.clone(), tournament_id.to_string());
        Ok(())
    }

    pub fn leave(
        &mut self,
        player: &PlayerId,
        tournament_id: &str,
    ) -> Result<LeaveOutcome, EngineError> {
        let tournament = self.get_mut(tournament_id)?;
        if tournament.status == TournamentPhase::Completed {
            return Err(EngineError::InvalidState(
                "tournament already completed".to_string(),
            ));
        }
        let position = tournament
            .players
            .iter()
            .position(|p| &p.id == player)
            .ok_or_else(|| {
                EngineError::InvalidState("player not in this tournament".to_string())
            })?;

        if tournament.status == TournamentPhase::InProgress {
            tournament.players[position].eliminated = true;
            self.player_index.remove(player);
            return Ok(LeaveOutcome::Eliminated);
        }

        tournament.players.remove(position);

        if &tournament.creator == player && tournament.players.is_empty() {
            self.player_index.remove(player);
            self.tournaments.remove(tournament_id);
            return Ok(LeaveOutcome::Removed {
                tournament_deleted: true,
                new_creator: None,
            });
        }

        let mut new_creator = None;
        if &tournament.creator == player {
            let heir = tournament.players[0].id.clone();
            tournament.creator = heir.clone();
            new_creator = Some(heir);
        }

        self.player_index.remove(player);
        Ok(LeaveOutcome::Removed {
            tournament_deleted: false,
            new_creator,
        })
    }

    /// Generates the bracket and returns the round-1 matches whose sessions
    /// the engine must create. Rejection leaves the bracket untouched.
    pub fn start(
        &mut self,
        requester: &PlayerId,
        tournament_id: &str,
    ) -> Result<Vec<NewMatch>, EngineError> {
        let tournament = self.get_mut(tournament_id)?;
        if &tournament.creator != requester {
            return Err(EngineError::InvalidState(
                "only the tournament creator can start it".to_string(),
            ));
        }
        if tournament.status != TournamentPhase::WaitingForPlayers {
            return Err(EngineError::InvalidState(
                "tournament has already started or completed".to_string(),
            ));
        }
        let count = tournament.players.len();
        if count < MIN_TOURNAMENT_PLAYERS {
            return Err(EngineError::Validation(format!(
                "tournament needs at least {} players to start",
                MIN_TOURNAMENT_PLAYERS
            )));
        }
        if count != tournament.max_players || !is_power_of_two(count) {
            return Err(EngineError::Validation(format!(
                "tournament must start with exactly {} players (has {})",
                tournament.max_players, count
            )));
        }

        // Random seeding for round 1.
        let mut seeded: Vec<PlayerId> = tournament.players.iter().map(|p| p.id.clone()).collect();
        seeded.shuffle(&mut rand::thread_rng());

        let mut round1 = Vec::new();
        for (index, pair) in seeded.chunks(2).enumerate() {
            let match_id = format!("match-{}-1-{}", tournament.id, index + 1);
            tournament.bracket.push(TournamentMatch {
                id: match_id.clone(),
                round: 1,
                players: [Some(pair[0].clone()), Some(pair[1].clone())],
                session_id: None,
                status: MatchPhase::Waiting,
                winner: None,
            });
            round1.push(NewMatch {
                match_id,
                player1: pair[0].clone(),
                player2: pair[1].clone(),
            });
        }

        // Placeholders for every later round, halving each round.
        let total_rounds = (count as f64).log2() as u32;
        let mut matches_in_round = count / 2;
        for round in 2..=total_rounds {
            matches_in_round /= 2;
            for index in 0..matches_in_round {
                tournament.bracket.push(TournamentMatch {
                    id: format!("match-{}-{}-{}", tournament.id, round, index + 1),
                    round,
                    players: [None, None],
                    session_id: None,
                    status: MatchPhase::Waiting,
                    winner: None,
                });
            }
        }

        tournament.status = TournamentPhase::InProgress;
        tournament.current_round = 1;
        info!(
            "Tournament {} started with {} players, {} rounds",
            tournament.id, count, total_rounds
        );
        Ok(round1)
    }

    /// Binds a created session to its bracket match.
    pub fn bind_session(
        &mut self,
        tournament_id: &str,
        match_id: &str,
        session_id: &SessionId,
    ) -> Result<(), EngineError> {
        let tournament = self.get_mut(tournament_id)?;
        let bracket_match = tournament
            .bracket
            .iter_mut()
            .find(|m| m.id == match_id)
            .ok_or_else(|| EngineError::MatchNotFound(match_id.to_string()))?;
        bracket_match.session_id = Some(session_id.clone());
        bracket_match.status = MatchPhase::InProgress;
        Ok(())
    }

    /// Records a match result. This is the single report path: both
    /// session-completion feedback and the explicit report action land here.
    pub fn record_result(
        &mut self,
        tournament_id: &str,
        match_id: &str,
        winner: &PlayerId,
    ) -> Result<ResultOutcome, EngineError> {
        let tournament = self.get_mut(tournament_id)?;
        if tournament.status != TournamentPhase::InProgress {
            return Err(EngineError::InvalidState(
                "tournament is not in progress".to_string(),
            ));
        }

        let bracket_match = tournament
            .bracket
            .iter_mut()
            .find(|m| m.id == match_id)
            .ok_or_else(|| EngineError::MatchNotFound(match_id.to_string()))?;

        if bracket_match.status == MatchPhase::Completed {
            return Err(EngineError::InvalidState(
                "match result already recorded".to_string(),
            ));
        }
        if !bracket_match
            .players
            .iter()
            .any(|slot| slot.as_ref() == Some(winner))
        {
            return Err(EngineError::Validation(
                "winner is not a participant of this match".to_string(),
            ));
        }

        bracket_match.winner = Some(winner.clone());
        bracket_match.status = MatchPhase::Completed;

        let loser = bracket_match
            .players
            .iter()
            .flatten()
            .find(|id| *id != winner)
            .cloned();
        if let Some(loser) = loser {
            if let Some(entry) = tournament.players.iter_mut().find(|p| p.id == loser) {
                entry.eliminated = true;
            }
        }

        let round = tournament.current_round;
        let round_done = tournament
            .bracket
            .iter()
            .filter(|m| m.round == round)
            .all(|m| m.status == MatchPhase::Completed);
        if !round_done {
            return Ok(ResultOutcome::MatchRecorded);
        }

        // Collect round winners in bracket slot order.
        let winners: Vec<PlayerId> = tournament
            .bracket
            .iter()
            .filter(|m| m.round == round)
            .filter_map(|m| m.winner.clone())
            .collect();

        if winners.len() == 1 {
            let champion = winners[0].clone();
            tournament.status = TournamentPhase::Completed;
            tournament.winner = Some(champion.clone());
            let player_ids: Vec<PlayerId> =
                tournament.players.iter().map(|p| p.id.clone()).collect();
            for id in &player_ids {
                self.player_index.remove(id);
            }
            info!("Tournament {} completed, champion {}", tournament_id, champion);
            return Ok(ResultOutcome::Champion(champion));
        }

        tournament.current_round += 1;
        let next_round = tournament.current_round;
        let mut new_matches = Vec::new();
        for (index, pair) in winners.chunks(2).enumerate() {
            if let Some(next) = tournament
                .bracket
                .iter_mut()
                .filter(|m| m.round == next_round)
                .nth(index)
            {
                next.players = [Some(pair[0].clone()), pair.get(1).cloned()];
                if let [Some(p1), Some(p2)] = &next.players {
                    new_matches.push(NewMatch {
                        match_id: next.id.clone(),
                        player1: p1.clone(),
                        player2: p2.clone(),
                    });
                }
            }
        }

        info!(
            "Tournament {} advanced to round {} ({} matches)",
            tournament_id,
            next_round,
            new_matches.len()
        );
        Ok(ResultOutcome::RoundAdvanced {
            round: next_round,
            matches: new_matches,
        })
    }

    /// Sanitized view: never exposes the join secret.
    pub fn view(&self, tournament_id: &str) -> Result<TournamentView, EngineError> {
        let tournament = self.get(tournament_id)?;
        Ok(TournamentView {
            id: tournament.id.clone(),
            name: tournament.name.clone(),
            creator_id: tournament.creator.clone(),
            max_players: tournament.max_players,
            is_private: tournament.is_private,
            status: tournament.status,
            players: tournament.players.iter().map(|p| p.id.clone()).collect(),
            current_round: tournament.current_round,
            winner_id: tournament.winner.clone(),
            matches: tournament.bracket.iter().map(match_view).collect(),
        })
    }

    pub fn match_view(
        &self,
        tournament_id: &str,
        match_id: &str,
    ) -> Result<MatchView, EngineError> {
        let tournament = self.get(tournament_id)?;
        tournament
            .bracket
            .iter()
            .find(|m| m.id == match_id)
            .map(match_view)
            .ok_or_else(|| EngineError::MatchNotFound(match_id.to_string()))
    }

    pub fn round_views(&self, tournament_id: &str, round: u32) -> Vec<MatchView> {
        self.tournaments
            .get(tournament_id)
            .map(|t| {
                t.bracket
                    .iter()
                    .filter(|m| m.round == round)
                    .map(match_view)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for TournamentEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn match_view(m: &TournamentMatch) -> MatchView {
    MatchView {
        id: m.id.clone(),
        round: m.round,
        player1: m.players[0].clone(),
        player2: m.players[1].clone(),
        winner_id: m.winner.clone(),
        status: m.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players(n: usize) -> Vec<PlayerId> {
        (0..n).map(|i| format!("player-{}", i)).collect()
    }

    fn filled_tournament(engine: &mut TournamentEngine, n: usize) -> String {
        let ids = players(n);
        let tid = engine.create(&ids[0], "cup", n, false, None).unwrap();
        for player in &ids[1..] {
            engine.join(player, &tid, None).unwrap();
        }
        tid
    }

    #[test]
    fn create_rejects_non_power_of_two_capacity() {
        let mut engine = TournamentEngine::new();
        let creator = "alice".to_string();
        assert!(matches!(
            engine.create(&creator, "cup", 3, false, None),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.create(&creator, "cup", 2, false, None),
            Err(EngineError::Validation(_))
        ));
        assert!(engine.create(&creator, "cup", 8, false, None).is_ok());
    }

    #[test]
    fn start_rejects_below_capacity_without_bracket_mutation() {
        let mut engine = TournamentEngine::new();
        let ids = players(3);
        let tid = engine.create(&ids[0], "cup", 4, false, None).unwrap();
        engine.join(&ids[1], &tid, None).unwrap();
        engine.join(&ids[2], &tid, None).unwrap();

        assert!(matches!(
            engine.start(&ids[0], &tid),
            Err(EngineError::Validation(_))
        ));
        let view = engine.view(&tid).unwrap();
        assert!(view.matches.is_empty());
        assert_eq!(view.status, TournamentPhase::WaitingForPlayers);
    }

    #[test]
    fn only_creator_can_start() {
        let mut engine = TournamentEngine::new();
        let tid = filled_tournament(&mut engine, 4);
        assert!(matches!(
            engine.start(&"player-1".to_string(), &tid),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn bracket_shape_halves_per_round() {
        let mut engine = TournamentEngine::new();
        let tid = filled_tournament(&mut engine, 8);
        let round1 = engine.start(&"player-0".to_string(), &tid).unwrap();
        assert_eq!(round1.len(), 4);

        let view = engine.view(&tid).unwrap();
        assert_eq!(view.matches.iter().filter(|m| m.round == 1).count(), 4);
        assert_eq!(view.matches.iter().filter(|m| m.round == 2).count(), 2);
        assert_eq!(view.matches.iter().filter(|m| m.round == 3).count(), 1);
        assert_eq!(view.matches.len(), 7);

        // Later rounds start empty.
        assert!(view
            .matches
            .iter()
            .filter(|m| m.round > 1)
            .all(|m| m.player1.is_none() && m.player2.is_none()));
    }

    #[test]
    fn four_player_tournament_advances_and_crowns_champion() {
        let mut engine = TournamentEngine::new();
        let tid = filled_tournament(&mut engine, 4);
        let round1 = engine.start(&"player-0".to_string(), &tid).unwrap();
        assert_eq!(round1.len(), 2);

        let first = engine
            .record_result(&tid, &round1[0].match_id, &round1[0].player1)
            .unwrap();
        assert_eq!(first, ResultOutcome::MatchRecorded);

        let second = engine
            .record_result(&tid, &round1[1].match_id, &round1[1].player2)
            .unwrap();
        let final_match = match second {
            ResultOutcome::RoundAdvanced { round, matches } => {
                assert_eq!(round, 2);
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].player1, round1[0].player1);
                assert_eq!(matches[0].player2, round1[1].player2);
                matches.into_iter().next().unwrap()
            }
            other => panic!("Expected round advance, got {:?}", other),
        };

        let outcome = engine
            .record_result(&tid, &final_match.match_id, &final_match.player1)
            .unwrap();
        assert_eq!(outcome, ResultOutcome::Champion(final_match.player1.clone()));

        let view = engine.view(&tid).unwrap();
        assert_eq!(view.status, TournamentPhase::Completed);
        assert_eq!(view.winner_id, Some(final_match.player1));
        // No extra rounds were generated.
        assert_eq!(view.matches.len(), 3);
    }

    #[test]
    fn duplicate_result_report_is_refused() {
        let mut engine = TournamentEngine::new();
        let tid = filled_tournament(&mut engine, 4);
        let round1 = engine.start(&"player-0".to_string(), &tid).unwrap();

        engine
            .record_result(&tid, &round1[0].match_id, &round1[0].player1)
            .unwrap();
        assert!(matches!(
            engine.record_result(&tid, &round1[0].match_id, &round1[0].player2),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn private_tournament_requires_secret() {
        let mut engine = TournamentEngine::new();
        let creator = "alice".to_string();
        let tid = engine
            .create(&creator, "cup", 4, true, Some("hunter2".to_string()))
            .unwrap();

        let bob = "bob".to_string();
        assert!(matches!(
            engine.join(&bob, &tid, Some("wrong")),
            Err(EngineError::Validation(_))
        ));
        assert!(engine.join(&bob, &tid, Some("hunter2")).is_ok());

        // The sanitized view never leaks the secret.
        let view = engine.view(&tid).unwrap();
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn leave_before_start_transfers_ownership_or_deletes() {
        let mut engine = TournamentEngine::new();
        let alice = "alice".to_string();
        let bob = "bob".to_string();
        let tid = engine.create(&alice, "cup", 4, false, None).unwrap();
        engine.join(&bob, &tid, None).unwrap();

        let outcome = engine.leave(&alice, &tid).unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome::Removed {
                tournament_deleted: false,
                new_creator: Some(bob.clone()),
            }
        );

        let outcome = engine.leave(&bob, &tid).unwrap();
        assert_eq!(
            outcome,
            LeaveOutcome::Removed {
                tournament_deleted: true,
                new_creator: None,
            }
        );
        assert!(matches!(
            engine.get(&tid),
            Err(EngineError::TournamentNotFound(_))
        ));
    }

    #[test]
    fn leave_after_start_marks_elimination_keeping_bracket() {
        let mut engine = TournamentEngine::new();
        let tid = filled_tournament(&mut engine, 4);
        engine.start(&"player-0".to_string(), &tid).unwrap();

        let outcome = engine.leave(&"player-1".to_string(), &tid).unwrap();
        assert_eq!(outcome, LeaveOutcome::Eliminated);

        let view = engine.view(&tid).unwrap();
        assert_eq!(view.players.len(), 4);
        assert_eq!(view.matches.iter().filter(|m| m.round == 1).count(), 2);
    }

    #[test]
    fn player_cannot_join_two_tournaments() {
        let mut engine = TournamentEngine::new();
        let alice = "alice".to_string();
        let bob = "bob".to_string();
        let first = engine.create(&alice, "one", 4, false, None).unwrap();
        engine.create(&bob, "two", 4, false, None).unwrap();

        assert!(matches!(
            engine.join(&bob, &first, None),
            Err(EngineError::InvalidState(_))
        ));
    }
}
