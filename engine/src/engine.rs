//! Engine orchestrator coordinating matchmaking, sessions, bots and
//! tournaments.
//!
//! All mutable state lives on the [`Engine`] struct and is touched from one
//! task only: the run loop draining the event mailbox. Timer tasks (ready
//! timeout, physics tick, match duration, bot cadence, matchmaking interval)
//! never mutate anything themselves; they post events and the run loop
//! decides. A stale event for an already-terminal session hits a status
//! check and is dropped.

use crate::bot;
use crate::error::EngineError;
use crate::matchmaking::{MatchmakingQueue, Pairing};
use crate::registry::{ConnectionRegistry, ConnectionToken, OutboundSender};
use crate::session::{Participant, Session, SessionId};
use crate::sink::{MatchRecord, ResultSink};
use crate::tournament::{LeaveOutcome, NewMatch, ResultOutcome, TournamentEngine};
use log::{debug, error, info, warn};
use proto::{
    ClientMessage, MoveDirection, PlayerId, ServerMessage, SessionPhase, Side, TournamentAction,
    TournamentPhase, FORFEIT_REWARD, FORFEIT_SCORE, LOSS_REWARD, TICKS_PER_SECOND, TIE_REWARD,
    WIN_REWARD,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a forming session waits for both ready signals.
    pub ready_timeout: Duration,
    /// Fixed match length once active.
    pub match_duration: Duration,
    /// Cadence of the matchmaking pairing pass.
    pub matchmaking_interval: Duration,
    /// Lone-player wait before a bot opponent is assigned.
    pub bot_wait_threshold: Duration,
    /// Physics step period.
    pub tick_interval: Duration,
    /// Bot decision period.
    pub bot_interval: Duration,
    /// Optional early end when one side reaches this score.
    pub score_cap: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            match_duration: Duration::from_secs(60),
            matchmaking_interval: Duration::from_secs(2),
            bot_wait_threshold: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1) / TICKS_PER_SECOND,
            bot_interval: bot::BOT_TICK,
            score_cap: None,
        }
    }
}

/// Everything that can reach the run loop goes through this mailbox.
#[derive(Debug)]
pub enum EngineEvent {
    Connect {
        player: PlayerId,
        sender: OutboundSender,
        ack: oneshot::Sender<ConnectionToken>,
    },
    Disconnect {
        player: PlayerId,
        token: ConnectionToken,
    },
    Message {
        player: PlayerId,
        message: ClientMessage,
    },
    MatchmakingTick,
    ReadyTimeout {
        session_id: SessionId,
    },
    PhysicsTick {
        session_id: SessionId,
    },
    MatchExpired {
        session_id: SessionId,
    },
    BotTick {
        session_id: SessionId,
    },
    Shutdown,
}

/// How a session reached completion.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MatchOutcome {
    TimerElapsed,
    ScoreCap,
    Forfeit { by: PlayerId },
}

/// Cloneable front door for transports and tests.
#[derive(Clone)]
pub struct EngineHandle {
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    /// Registers a logical connection, returning its binding token. `None`
    /// means the engine has shut down.
    pub async fn connect(
        &self,
        player: &PlayerId,
        sender: OutboundSender,
    ) -> Option<ConnectionToken> {
        let (ack, rx) = oneshot::channel();
        self.events
            .send(EngineEvent::Connect {
                player: player.clone(),
                sender,
                ack,
            })
            .ok()?;
        rx.await.ok()
    }

    pub fn disconnect(&self, player: &PlayerId, token: ConnectionToken) {
        let _ = self.events.send(EngineEvent::Disconnect {
            player: player.clone(),
            token,
        });
    }

    pub fn message(&self, player: &PlayerId, message: ClientMessage) {
        let _ = self.events.send(EngineEvent::Message {
            player: player.clone(),
            message,
        });
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(EngineEvent::Shutdown);
    }
}

pub struct Engine {
    config: EngineConfig,
    registry: ConnectionRegistry,
    queue: MatchmakingQueue,
    sessions: HashMap<SessionId, Session>,
    /// Most recent session per identity; entries for completed sessions are
    /// kept until overwritten so a late disconnect can still trigger a
    /// completion re-send.
    session_index: HashMap<PlayerId, SessionId>,
    tournaments: TournamentEngine,
    sink: Arc<dyn ResultSink>,

    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

fn mint_session_id() -> SessionId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64;
    format!("game-{}-{:08x}", millis, rand::random::<u32>())
}

fn spawn_delayed(
    tx: mpsc::UnboundedSender<EngineEvent>,
    delay: Duration,
    event: impl FnOnce() -> EngineEvent + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(event());
    })
}

fn spawn_periodic(
    tx: mpsc::UnboundedSender<EngineEvent>,
    period: Duration,
    event: impl Fn() -> EngineEvent + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick of a tokio interval fires immediately; skip it so
        // the cadence starts one period after activation.
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.send(event()).is_err() {
                break;
            }
        }
    })
}

impl Engine {
    pub fn new(config: EngineConfig, sink: Arc<dyn ResultSink>) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = EngineHandle {
            events: events_tx.clone(),
        };
        let queue = MatchmakingQueue::new(config.bot_wait_threshold);
        (
            Self {
                config,
                registry: ConnectionRegistry::new(),
                queue,
                sessions: HashMap::new(),
                session_index: HashMap::new(),
                tournaments: TournamentEngine::new(),
                sink,
                events_tx,
                events_rx,
            },
            handle,
        )
    }

    /// Drains the mailbox until shutdown. Consumes the engine; all state
    /// dies with the loop.
    pub async fn run(mut self) {
        info!(
            "Engine running: match {:?}, ready timeout {:?}, bot wait {:?}",
            self.config.match_duration, self.config.ready_timeout, self.config.bot_wait_threshold
        );

        let matchmaking_task = spawn_periodic(
            self.events_tx.clone(),
            self.config.matchmaking_interval,
            || EngineEvent::MatchmakingTick,
        );

        while let Some(event) = self.events_rx.recv().await {
            match event {
                EngineEvent::Shutdown => break,
                other => self.handle_event(other),
            }
        }

        matchmaking_task.abort();
        for session in self.sessions.values_mut() {
            session.timers.cancel_all();
        }
        info!("Engine stopped");
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connect { player, sender, ack } => {
                let token = self.handle_connect(&player, sender);
                let _ = ack.send(token);
            }
            EngineEvent::Disconnect { player, token } => self.handle_disconnect(&player, token),
            EngineEvent::Message { player, message } => {
                if let Err(err) = self.handle_message(&player, message) {
                    debug!("Request from {} refused: {}", player, err);
                    self.registry.send_to(
                        &player,
                        ServerMessage::Error {
                            message: err.to_string(),
                        },
                    );
                }
            }
            EngineEvent::MatchmakingTick => self.handle_matchmaking_tick(),
            EngineEvent::ReadyTimeout { session_id } => self.handle_ready_timeout(&session_id),
            EngineEvent::PhysicsTick { session_id } => self.handle_physics_tick(&session_id),
            EngineEvent::MatchExpired { session_id } => {
                self.complete_session(&session_id, MatchOutcome::TimerElapsed)
            }
            EngineEvent::BotTick { session_id } => self.handle_bot_tick(&session_id),
            EngineEvent::Shutdown => {}
        }
    }

    // ---- connection lifecycle ----

    fn handle_connect(&mut self, player: &PlayerId, sender: OutboundSender) -> ConnectionToken {
        let token = self.registry.register(player, sender);

        // Refresh the session binding so the reconnected player's session
        // survives the old socket's late disconnect.
        if let Some(session_id) = self.session_index.get(player) {
            if let Some(session) = self.sessions.get_mut(session_id) {
                if !session.is_terminal() {
                    session.bindings.insert(player.clone(), token);
                }
            }
        }
        token
    }

    fn handle_disconnect(&mut self, player: &PlayerId, token: ConnectionToken) {
        // A token no longer on record belongs to a superseded connection.
        if !self.registry.unregister(player, token) {
            return;
        }
        info!("Player {} disconnected", player);

        self.queue.dequeue(player);

        if let Some(session_id) = self.session_index.get(player).cloned() {
            let (qualifies, status) = match self.sessions.get(&session_id) {
                Some(session) => (
                    session.bindings.get(player) == Some(&token),
                    session.status,
                ),
                None => (false, SessionPhase::Abandoned),
            };

            if qualifies {
                match status {
                    SessionPhase::Forming => {
                        self.abandon_session(&session_id, "opponent disconnected")
                    }
                    SessionPhase::Active => self.complete_session(
                        &session_id,
                        MatchOutcome::Forfeit { by: player.clone() },
                    ),
                    SessionPhase::Completed => self.resend_match_ended(&session_id, player),
                    SessionPhase::Abandoned => {}
                }
            }
        }

        // A dropped socket only vacates a pre-start lobby seat; once the
        // bracket is drawn the slot survives a reconnect.
        if let Some(tournament_id) = self.tournaments.tournament_of(player).cloned() {
            let waiting = self
                .tournaments
                .get(&tournament_id)
                .map(|t| t.status == TournamentPhase::WaitingForPlayers)
                .unwrap_or(false);
            if waiting {
                self.depart_tournament(player, &tournament_id, "disconnected");
            }
        }
    }

    // ---- client message dispatch ----

    fn handle_message(
        &mut self,
        player: &PlayerId,
        message: ClientMessage,
    ) -> Result<(), EngineError> {
        match message {
            ClientMessage::JoinMatchmaking { mode } => self.handle_join_matchmaking(player, &mode),
            ClientMessage::LeaveMatchmaking => {
                self.queue.dequeue(player);
                Ok(())
            }
            ClientMessage::LeaveGame => self.handle_leave_game(player),
            ClientMessage::Ready { game_id } => self.handle_ready(player, &game_id),
            ClientMessage::PaddleMove {
                game_id,
                position,
                direction,
            } => self.handle_paddle_move(player, &game_id, position, direction),
            ClientMessage::ReportScore { game_id, value } => {
                self.handle_report_score(player, &game_id, value)
            }
            ClientMessage::Tournament {
                action,
                tournament_id,
                name,
                max_players,
                is_private,
                secret,
                match_id,
                winner_id,
            } => self.handle_tournament_action(
                player,
                action,
                tournament_id,
                name,
                max_players,
                is_private,
                secret,
                match_id,
                winner_id,
            ),
        }
    }

    fn handle_join_matchmaking(
        &mut self,
        player: &PlayerId,
        mode: &str,
    ) -> Result<(), EngineError> {
        if let Some(session_id) = self.live_session_of(player) {
            return Err(EngineError::AlreadyInGame(session_id));
        }
        if !self.queue.enqueue(player, mode, Instant::now()) {
            debug!("Player {} already queued", player);
        }
        Ok(())
    }

    fn handle_leave_game(&mut self, player: &PlayerId) -> Result<(), EngineError> {
        let session_id = self
            .session_index
            .get(player)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound("no current game".to_string()))?;
        let status = self
            .sessions
            .get(&session_id)
            .map(|s| s.status)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;

        match status {
            SessionPhase::Forming => self.abandon_session(&session_id, "opponent left"),
            SessionPhase::Active => self.complete_session(
                &session_id,
                MatchOutcome::Forfeit { by: player.clone() },
            ),
            // A leave after completion races the duration timer; nothing to
            // do.
            SessionPhase::Completed | SessionPhase::Abandoned => {}
        }
        Ok(())
    }

    fn handle_ready(&mut self, player: &PlayerId, game_id: &str) -> Result<(), EngineError> {
        let session = self
            .sessions
            .get_mut(game_id)
            .ok_or_else(|| EngineError::SessionNotFound(game_id.to_string()))?;
        if session.status != SessionPhase::Forming {
            return Err(EngineError::InvalidState(
                "game is not waiting for ready signals".to_string(),
            ));
        }
        if !session.mark_ready(player) {
            return Err(EngineError::Validation(
                "not a participant of this game".to_string(),
            ));
        }

        let opponent = session.opponent_of(player).cloned();
        let all_ready = session.all_ready();

        if let Some(opponent) = opponent {
            if !opponent.is_bot() {
                self.registry.send_to(
                    opponent.id(),
                    ServerMessage::PlayerJoined {
                        game_id: game_id.to_string(),
                        player_id: player.clone(),
                    },
                );
            }
        }
        if all_ready {
            self.activate_session(game_id);
        }
        Ok(())
    }

    fn handle_paddle_move(
        &mut self,
        player: &PlayerId,
        game_id: &str,
        position: Option<f32>,
        direction: Option<MoveDirection>,
    ) -> Result<(), EngineError> {
        if position.is_none() && direction.is_none() {
            return Err(EngineError::Validation(
                "paddle_move requires a position or a direction".to_string(),
            ));
        }
        if let Some(y) = position {
            if !y.is_finite() {
                return Err(EngineError::Validation(
                    "paddle position must be finite".to_string(),
                ));
            }
        }

        let session = self
            .sessions
            .get_mut(game_id)
            .ok_or_else(|| EngineError::SessionNotFound(game_id.to_string()))?;
        if session.status != SessionPhase::Active {
            return Err(EngineError::InvalidState("game is not active".to_string()));
        }
        let side = session.side_of(player).ok_or_else(|| {
            EngineError::Validation("not a participant of this game".to_string())
        })?;

        if let Some(y) = position {
            session.physics.set_paddle(side, y);
        } else if let Some(dir) = direction {
            session.physics.step_paddle(side, dir);
        }

        // Echo to the opponent for client-side interpolation.
        let opponent = session.opponent_of(player).cloned();
        if let Some(opponent) = opponent {
            if !opponent.is_bot() {
                self.registry.send_to(
                    opponent.id(),
                    ServerMessage::PlayerMoved {
                        game_id: game_id.to_string(),
                        player_id: player.clone(),
                        position,
                        direction,
                        is_bot: false,
                    },
                );
            }
        }
        Ok(())
    }

    /// Client score reports are telemetry only; the simulation is the single
    /// authority on scores.
    fn handle_report_score(
        &mut self,
        player: &PlayerId,
        game_id: &str,
        value: u32,
    ) -> Result<(), EngineError> {
        let session = self
            .sessions
            .get(game_id)
            .ok_or_else(|| EngineError::SessionNotFound(game_id.to_string()))?;
        let opponent = session
            .opponent_of(player)
            .ok_or_else(|| {
                EngineError::Validation("not a participant of this game".to_string())
            })?
            .clone();

        if !opponent.is_bot() {
            self.registry.send_to(
                opponent.id(),
                ServerMessage::ScoreUpdate {
                    game_id: game_id.to_string(),
                    player_id: player.clone(),
                    value,
                },
            );
        }
        Ok(())
    }

    // ---- matchmaking ----

    fn handle_matchmaking_tick(&mut self) {
        // Players that acquired a session since enqueueing must never be
        // paired again.
        let busy: HashSet<PlayerId> = self
            .session_index
            .iter()
            .filter(|(_, sid)| {
                self.sessions
                    .get(*sid)
                    .map(|s| !s.is_terminal())
                    .unwrap_or(false)
            })
            .map(|(player, _)| player.clone())
            .collect();
        self.queue.retain(|player| !busy.contains(player));

        // At most one pairing per tick; a longer queue drains over the
        // following intervals.
        let now = Instant::now();
        if let Some(pairing) = self.queue.tick(now) {
            match pairing {
                Pairing::Humans(first, second, mode) => {
                    self.create_matchmade_session(first, second, &mode);
                }
                Pairing::WithBot(player, mode) => {
                    let bot_id = bot::mint_bot_id();
                    info!("Assigning bot {} to {}", bot_id, player);
                    self.create_matchmade_session(player, bot_id, &mode);
                }
            }
        }
    }

    fn create_matchmade_session(&mut self, left: PlayerId, right: PlayerId, mode: &str) {
        let session_id = mint_session_id();
        let mut session = Session::new(
            session_id.clone(),
            Participant::from_id(left),
            Participant::from_id(right),
            mode,
            self.config.match_duration,
        );

        for participant in &session.participants {
            if participant.is_bot() {
                continue;
            }
            if let Some(token) = self.registry.current_token(participant.id()) {
                session.bindings.insert(participant.id().clone(), token);
            }
            self.session_index
                .insert(participant.id().clone(), session_id.clone());
        }

        session.timers.ready_timeout = Some(spawn_delayed(
            self.events_tx.clone(),
            self.config.ready_timeout,
            {
                let session_id = session_id.clone();
                move || EngineEvent::ReadyTimeout { session_id }
            },
        ));

        info!(
            "Matched {} vs {} in {} ({})",
            session.participants[0].id(),
            session.participants[1].id(),
            session_id,
            mode
        );
        self.send_game_matched(&session);
        self.sessions.insert(session_id, session);
    }

    fn send_game_matched(&self, session: &Session) {
        for (index, participant) in session.participants.iter().enumerate() {
            if participant.is_bot() {
                continue;
            }
            let opponent = &session.participants[1 - index];
            self.registry.send_to(
                participant.id(),
                ServerMessage::GameMatched {
                    game_id: session.id.clone(),
                    your_player_id: participant.id().clone(),
                    opponent_id: opponent.id().clone(),
                    opponent_is_bot: opponent.is_bot(),
                    side: if index == 0 { Side::Left } else { Side::Right },
                },
            );
        }
    }

    // ---- session lifecycle ----

    fn activate_session(&mut self, session_id: &str) {
        let tx = self.events_tx.clone();
        let tick_interval = self.config.tick_interval;
        let bot_interval = self.config.bot_interval;

        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.status != SessionPhase::Forming {
            return;
        }

        session.status = SessionPhase::Active;
        session.started_at = Some(SystemTime::now());
        session.started_instant = Some(Instant::now());
        session.timers.cancel_ready_timeout();

        session.timers.tick_task = Some(spawn_periodic(tx.clone(), tick_interval, {
            let session_id = session.id.clone();
            move || EngineEvent::PhysicsTick {
                session_id: session_id.clone(),
            }
        }));
        session.timers.match_timer = Some(spawn_delayed(tx.clone(), session.duration, {
            let session_id = session.id.clone();
            move || EngineEvent::MatchExpired { session_id }
        }));
        if session.bot().is_some() {
            session.timers.bot_task = Some(spawn_periodic(tx, bot_interval, {
                let session_id = session.id.clone();
                move || EngineEvent::BotTick {
                    session_id: session_id.clone(),
                }
            }));
        }

        let duration_ms = session.duration.as_millis() as u64;
        let participants = session.participants.clone();
        let id = session.id.clone();
        info!("Session {} active", id);

        for (index, participant) in participants.iter().enumerate() {
            if participant.is_bot() {
                continue;
            }
            let opponent = &participants[1 - index];
            self.registry.send_to(
                participant.id(),
                ServerMessage::GameStart {
                    game_id: id.clone(),
                    side: if index == 0 { Side::Left } else { Side::Right },
                    opponent_name: display_name(opponent),
                    opponent_is_bot: opponent.is_bot(),
                    duration_ms,
                },
            );
        }
    }

    fn handle_ready_timeout(&mut self, session_id: &str) {
        let forming = self
            .sessions
            .get(session_id)
            .map(|s| s.status == SessionPhase::Forming)
            .unwrap_or(false);
        if forming {
            info!("Session {} cancelled: ready timeout", session_id);
            self.abandon_session(session_id, "ready timeout");
        }
    }

    /// Cancels a forming session. No score, no reward, no persisted result;
    /// both identities are freed to queue again.
    fn abandon_session(&mut self, session_id: &str, reason: &str) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            return;
        };
        session.timers.cancel_all();
        session.status = SessionPhase::Abandoned;

        let players = session.player_ids();
        let humans: Vec<PlayerId> = session
            .participants
            .iter()
            .filter(|p| !p.is_bot())
            .map(|p| p.id().clone())
            .collect();
        for player in &humans {
            if self.session_index.get(player) == Some(&session.id) {
                self.session_index.remove(player);
            }
        }

        self.registry.broadcast(
            &humans,
            &ServerMessage::GameCancelled {
                game_id: session.id.clone(),
                reason: reason.to_string(),
                not_ready: session.not_ready_players(),
            },
        );
        debug!(
            "Session {} abandoned ({}): {:?}",
            session.id, reason, players
        );
    }

    fn handle_physics_tick(&mut self, session_id: &str) {
        let score_cap = self.config.score_cap;
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.status != SessionPhase::Active {
            return;
        }

        let scored = session.physics.step();
        let players = session.player_ids();
        let humans: Vec<PlayerId> = session
            .participants
            .iter()
            .filter(|p| !p.is_bot())
            .map(|p| p.id().clone())
            .collect();

        let mut cap_reached = false;
        let score_update = scored.map(|side| {
            let value = session.physics.score(side);
            cap_reached = score_cap.map(|cap| value >= cap).unwrap_or(false);
            ServerMessage::ScoreUpdate {
                game_id: session_id.to_string(),
                player_id: players[side.index()].clone(),
                value,
            }
        });
        let state = ServerMessage::GameState {
            game_id: session_id.to_string(),
            ball_x: session.physics.ball_x,
            ball_y: session.physics.ball_y,
            left_paddle_y: session.physics.paddles[0],
            right_paddle_y: session.physics.paddles[1],
            left_score: session.physics.scores[0],
            right_score: session.physics.scores[1],
            time_left_secs: session.time_left(Instant::now()).as_secs(),
            status: session.status,
        };

        if let Some(update) = score_update {
            self.registry.broadcast(&humans, &update);
        }
        self.registry.broadcast(&humans, &state);

        if cap_reached {
            self.complete_session(session_id, MatchOutcome::ScoreCap);
        }
    }

    fn handle_bot_tick(&mut self, session_id: &str) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.status != SessionPhase::Active {
            return;
        }
        let Some((bot, side)) = session.bot().map(|(p, s)| (p.id().clone(), s)) else {
            return;
        };

        let Some(direction) = bot::decide(&session.physics, side) else {
            return;
        };
        session.physics.step_paddle(side, direction);

        let opponent = session.opponent_of(&bot).cloned();
        if let Some(opponent) = opponent {
            if !opponent.is_bot() {
                self.registry.send_to(
                    opponent.id(),
                    ServerMessage::PlayerMoved {
                        game_id: session_id.to_string(),
                        player_id: bot,
                        position: None,
                        direction: Some(direction),
                        is_bot: true,
                    },
                );
            }
        }
    }

    /// Idempotent terminal transition: the duration timer, a forfeit, a
    /// disconnect and the score cap can all race here, and only the first
    /// caller does any work.
    fn complete_session(&mut self, session_id: &str, outcome: MatchOutcome) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.is_terminal() {
            debug!("Session {} already terminal, completion is a no-op", session_id);
            return;
        }

        session.timers.cancel_all();
        session.status = SessionPhase::Completed;
        session.ended_at = Some(SystemTime::now());

        // Forfeit overrides the live scoreline with the fixed margin.
        if let MatchOutcome::Forfeit { by } = &outcome {
            if let Some(forfeiter_side) = session.side_of(by) {
                session.physics.scores[forfeiter_side.index()] = 0;
                session.physics.scores[forfeiter_side.opposite().index()] = FORFEIT_SCORE;
            }
        }

        let players = session.player_ids();
        let left_score = session.physics.scores[0];
        let right_score = session.physics.scores[1];

        let (winner, is_tie) = match &outcome {
            MatchOutcome::Forfeit { by } => {
                let loser_side = session.side_of(by).unwrap_or(Side::Left);
                (Some(players[loser_side.opposite().index()].clone()), false)
            }
            _ => {
                if left_score > right_score {
                    (Some(players[0].clone()), false)
                } else if right_score > left_score {
                    (Some(players[1].clone()), false)
                } else {
                    (None, true)
                }
            }
        };

        let mut rewards: HashMap<PlayerId, u32> = HashMap::new();
        for player in &players {
            let reward = match (&outcome, &winner) {
                (MatchOutcome::Forfeit { by }, _) if by == player => FORFEIT_REWARD,
                (_, Some(w)) if w == player => WIN_REWARD,
                (_, Some(_)) => LOSS_REWARD,
                (_, None) => TIE_REWARD,
            };
            rewards.insert(player.clone(), reward);
        }
        session.rewards = rewards.clone();

        let mut scores = HashMap::new();
        scores.insert(players[0].clone(), left_score);
        scores.insert(players[1].clone(), right_score);

        let duration_ms = session.elapsed_ms();
        let bot_game = session.participants.iter().any(|p| p.is_bot());
        let humans: Vec<PlayerId> = session
            .participants
            .iter()
            .filter(|p| !p.is_bot())
            .map(|p| p.id().clone())
            .collect();
        let display_names: HashMap<PlayerId, String> = session
            .participants
            .iter()
            .map(|p| (p.id().clone(), display_name(p)))
            .collect();
        let tournament = session.tournament.clone();
        let started_at = session.started_at;

        let persist = if session.result_saved {
            None
        } else {
            session.result_saved = true;
            Some(MatchRecord {
                session_id: session_id.to_string(),
                participants: players.clone(),
                scores: scores.clone(),
                winner_id: winner.clone(),
                started_at,
                completed_at: SystemTime::now(),
            })
        };

        info!(
            "Session {} completed ({:?}): {} {} - {} {}",
            session_id, outcome, players[0], left_score, players[1], right_score
        );

        self.registry.broadcast(
            &humans,
            &ServerMessage::MatchEnded {
                game_id: session_id.to_string(),
                winner_id: winner.clone(),
                is_tie,
                final_scores: scores,
                rewards: rewards.clone(),
                reward_earned: 0,
                duration_ms,
            },
        );

        if let Some(record) = persist {
            let sink = Arc::clone(&self.sink);
            // Bot games pay out in the message but contribute nothing to
            // stored player statistics.
            let stats: Vec<(PlayerId, bool, u32)> = humans
                .iter()
                .map(|player| {
                    let reward = if bot_game {
                        0
                    } else {
                        rewards.get(player).copied().unwrap_or(0)
                    };
                    (player.clone(), winner.as_ref() == Some(player), reward)
                })
                .collect();
            persist_result(sink, record, display_names, stats, duration_ms);
        }

        if let Some((tournament_id, match_id)) = tournament {
            // Tie at the duration timer advances the left participant.
            let advancing = winner.unwrap_or_else(|| players[0].clone());
            if let Err(err) = self.report_tournament_result(&tournament_id, &match_id, &advancing)
            {
                warn!(
                    "Tournament {} result for {} rejected: {}",
                    tournament_id, match_id, err
                );
            }
        }
    }

    /// Re-sends the completion notice to the opponent; delivery of the
    /// first copy is not guaranteed.
    fn resend_match_ended(&mut self, session_id: &str, disconnector: &PlayerId) {
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };
        let Some(opponent) = session.opponent_of(disconnector) else {
            return;
        };
        if opponent.is_bot() {
            return;
        }

        let players = session.player_ids();
        let left_score = session.physics.scores[0];
        let right_score = session.physics.scores[1];
        let winner = if left_score > right_score {
            Some(players[0].clone())
        } else if right_score > left_score {
            Some(players[1].clone())
        } else {
            None
        };
        let mut scores = HashMap::new();
        scores.insert(players[0].clone(), left_score);
        scores.insert(players[1].clone(), right_score);

        let duration_ms = match (session.started_at, session.ended_at) {
            (Some(start), Some(end)) => end
                .duration_since(start)
                .unwrap_or(Duration::from_secs(0))
                .as_millis() as u64,
            _ => 0,
        };

        let opponent_id = opponent.id().clone();
        let rewards = session.rewards.clone();
        self.registry.broadcast(
            std::slice::from_ref(&opponent_id),
            &ServerMessage::MatchEnded {
                game_id: session_id.to_string(),
                winner_id: winner,
                is_tie: left_score == right_score,
                final_scores: scores,
                rewards,
                reward_earned: 0,
                duration_ms,
            },
        );
    }

    // ---- tournaments ----

    #[allow(clippy::too_many_arguments)]
    fn handle_tournament_action(
        &mut self,
        player: &PlayerId,
        action: TournamentAction,
        tournament_id: Option<String>,
        name: Option<String>,
        max_players: Option<usize>,
        is_private: Option<bool>,
        secret: Option<String>,
        match_id: Option<String>,
        winner_id: Option<PlayerId>,
    ) -> Result<(), EngineError> {
        match action {
            TournamentAction::Create => {
                let name = require(name, "name")?;
                let max_players = require(max_players, "max_players")?;
                let is_private = is_private.unwrap_or(false);
                if is_private && secret.is_none() {
                    return Err(EngineError::Validation(
                        "private tournament requires a secret".to_string(),
                    ));
                }
                let id = self
                    .tournaments
                    .create(player, &name, max_players, is_private, secret)?;
                let view = self.tournaments.view(&id)?;
                self.registry
                    .send_to(player, ServerMessage::TournamentInfo { tournament: view });
                Ok(())
            }
            TournamentAction::Join => {
                let tournament_id = require(tournament_id, "tournament_id")?;
                self.tournaments
                    .join(player, &tournament_id, secret.as_deref())?;

                let players = self.tournaments.player_ids(&tournament_id);
                let max = self.tournaments.get(&tournament_id)?.max_players;
                self.registry.broadcast(
                    &players,
                    &ServerMessage::TournamentPlayerJoined {
                        tournament_id,
                        player_id: player.clone(),
                        total_players: players.len(),
                        max_players: max,
                    },
                );
                Ok(())
            }
            TournamentAction::Leave => {
                let tournament_id = require(tournament_id, "tournament_id")?;
                self.depart_tournament(player, &tournament_id, "left");
                Ok(())
            }
            TournamentAction::Start => {
                let tournament_id = require(tournament_id, "tournament_id")?;
                let round1 = self.tournaments.start(player, &tournament_id)?;

                let players = self.tournaments.player_ids(&tournament_id);
                let view = self.tournaments.view(&tournament_id)?;
                self.registry.broadcast(
                    &players,
                    &ServerMessage::TournamentStarted {
                        tournament_id: tournament_id.clone(),
                        tournament: view,
                    },
                );
                self.launch_round(&tournament_id, 1, &round1);
                Ok(())
            }
            TournamentAction::GetInfo => {
                let tournament_id = require(tournament_id, "tournament_id")?;
                let view = self.tournaments.view(&tournament_id)?;
                self.registry
                    .send_to(player, ServerMessage::TournamentInfo { tournament: view });
                Ok(())
            }
            TournamentAction::ReportResult => {
                let tournament_id = require(tournament_id, "tournament_id")?;
                let match_id = require(match_id, "match_id")?;
                let winner_id = require(winner_id, "winner_id")?;

                if !self
                    .tournaments
                    .player_ids(&tournament_id)
                    .contains(player)
                {
                    return Err(EngineError::Validation(
                        "not a participant of this tournament".to_string(),
                    ));
                }
                // A live session is the authority for its own match.
                let live_session = self.sessions.values().any(|s| {
                    !s.is_terminal()
                        && s.tournament
                            .as_ref()
                            .map(|(t, m)| t == &tournament_id && m == &match_id)
                            .unwrap_or(false)
                });
                if live_session {
                    return Err(EngineError::InvalidState(
                        "match is still being played".to_string(),
                    ));
                }

                self.report_tournament_result(&tournament_id, &match_id, &winner_id)
            }
        }
    }

    fn depart_tournament(&mut self, player: &PlayerId, tournament_id: &str, reason: &str) {
        let outcome = match self.tournaments.leave(player, tournament_id) {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!("Tournament leave by {} refused: {}", player, err);
                return;
            }
        };

        match outcome {
            LeaveOutcome::Removed {
                tournament_deleted, ..
            } => {
                if tournament_deleted {
                    return;
                }
                let players = self.tournaments.player_ids(tournament_id);
                let max = self
                    .tournaments
                    .get(tournament_id)
                    .map(|t| t.max_players)
                    .unwrap_or(0);
                self.registry.broadcast(
                    &players,
                    &ServerMessage::TournamentPlayerLeft {
                        tournament_id: tournament_id.to_string(),
                        player_id: player.clone(),
                        total_players: players.len(),
                        max_players: max,
                    },
                );
            }
            LeaveOutcome::Eliminated => {
                let players = self.tournaments.player_ids(tournament_id);
                self.registry.broadcast(
                    &players,
                    &ServerMessage::TournamentPlayerEliminated {
                        tournament_id: tournament_id.to_string(),
                        player_id: player.clone(),
                        reason: reason.to_string(),
                    },
                );
            }
        }
    }

    fn report_tournament_result(
        &mut self,
        tournament_id: &str,
        match_id: &str,
        winner: &PlayerId,
    ) -> Result<(), EngineError> {
        let outcome = self
            .tournaments
            .record_result(tournament_id, match_id, winner)?;

        let players = self.tournaments.player_ids(tournament_id);
        if let Ok(result) = self.tournaments.match_view(tournament_id, match_id) {
            self.registry.broadcast(
                &players,
                &ServerMessage::TournamentMatchCompleted {
                    tournament_id: tournament_id.to_string(),
                    match_id: match_id.to_string(),
                    winner_id: winner.clone(),
                    result,
                },
            );
        }

        match outcome {
            ResultOutcome::MatchRecorded => {}
            ResultOutcome::RoundAdvanced { round, matches } => {
                self.launch_round(tournament_id, round, &matches);
            }
            ResultOutcome::Champion(champion) => {
                if let Ok(view) = self.tournaments.view(tournament_id) {
                    self.registry.broadcast(
                        &players,
                        &ServerMessage::TournamentCompleted {
                            tournament_id: tournament_id.to_string(),
                            winner_id: champion,
                            tournament: view,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Creates one session per bracket match and announces the round.
    /// Tournament matches skip the ready handshake: both participants
    /// already committed by joining.
    fn launch_round(&mut self, tournament_id: &str, round: u32, matches: &[NewMatch]) {
        for new_match in matches {
            let session_id = mint_session_id();
            let mut session = Session::new(
                session_id.clone(),
                Participant::from_id(new_match.player1.clone()),
                Participant::from_id(new_match.player2.clone()),
                "tournament",
                self.config.match_duration,
            );
            session.tournament =
                Some((tournament_id.to_string(), new_match.match_id.clone()));
            for participant in session.participants.clone() {
                session.ready.insert(participant.id().clone());
                if let Some(token) = self.registry.current_token(participant.id()) {
                    session.bindings.insert(participant.id().clone(), token);
                }
                self.session_index
                    .insert(participant.id().clone(), session_id.clone());
            }

            if let Err(err) =
                self.tournaments
                    .bind_session(tournament_id, &new_match.match_id, &session_id)
            {
                error!(
                    "Failed to bind session {} to match {}: {}",
                    session_id, new_match.match_id, err
                );
                continue;
            }

            self.send_game_matched(&session);
            self.sessions.insert(session_id.clone(), session);
            self.activate_session(&session_id);
        }

        let players = self.tournaments.player_ids(tournament_id);
        let views = self.tournaments.round_views(tournament_id, round);
        self.registry.broadcast(
            &players,
            &ServerMessage::TournamentRoundStarted {
                tournament_id: tournament_id.to_string(),
                round,
                matches: views,
            },
        );
    }

    // ---- helpers ----

    fn live_session_of(&self, player: &PlayerId) -> Option<SessionId> {
        let session_id = self.session_index.get(player)?;
        let session = self.sessions.get(session_id)?;
        if session.is_terminal() {
            None
        } else {
            Some(session_id.clone())
        }
    }
}

fn display_name(participant: &Participant) -> String {
    if participant.is_bot() {
        "Bot".to_string()
    } else {
        participant.id().clone()
    }
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, EngineError> {
    value.ok_or_else(|| EngineError::Validation(format!("missing required field: {}", field)))
}

/// Writes the finished match to storage off the event loop. The stored-result
/// check makes retries and racing completion paths idempotent across process
/// restarts, not just within this one.
fn persist_result(
    sink: Arc<dyn ResultSink>,
    record: MatchRecord,
    display_names: HashMap<PlayerId, String>,
    stats: Vec<(PlayerId, bool, u32)>,
    duration_ms: u64,
) {
    tokio::task::spawn_blocking(move || {
        match sink.has_stored_result(&record.session_id) {
            Ok(true) => {
                debug!("Result for {} already stored, skipping", record.session_id);
                return;
            }
            Ok(false) => {}
            Err(err) => {
                error!("Stored-result check failed for {}: {}", record.session_id, err);
                return;
            }
        }

        let persisted_id = match sink.store_match_result(&record) {
            Ok(id) => id,
            Err(err) => {
                error!("Failed to store result for {}: {}", record.session_id, err);
                return;
            }
        };

        if let Err(err) =
            sink.record_match_history(&persisted_id, &display_names, &record.scores, duration_ms)
        {
            warn!("Failed to record history for {}: {}", persisted_id, err);
        }
        for (player, won, reward) in stats {
            if let Err(err) = sink.update_player_stats(&player, won, duration_ms, reward) {
                warn!("Failed to update stats for {}: {}", player, err);
            }
        }
    });
}
