//! Demo binary: runs the engine with an in-memory result sink and two
//! scripted clients that queue up, ready, play one timed match and print
//! the persisted outcome.

use clap::Parser;
use engine::{Engine, EngineConfig, EngineHandle, MemorySink, ResultSink};
use log::info;
use proto::{ClientMessage, PlayerId, ServerMessage, PADDLE_HEIGHT};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Match duration in seconds
    #[clap(short, long, default_value = "10")]
    match_secs: u64,
    /// Ready timeout in seconds
    #[clap(short, long, default_value = "30")]
    ready_secs: u64,
    /// Seconds a lone player waits before a bot is assigned
    #[clap(short, long, default_value = "10")]
    bot_wait_secs: u64,
    /// Optional score cap ending the match early
    #[clap(short, long)]
    score_cap: Option<u32>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = EngineConfig {
        ready_timeout: Duration::from_secs(args.ready_secs),
        match_duration: Duration::from_secs(args.match_secs),
        bot_wait_threshold: Duration::from_secs(args.bot_wait_secs),
        matchmaking_interval: Duration::from_millis(500),
        score_cap: args.score_cap,
        ..EngineConfig::default()
    };

    let sink = Arc::new(MemorySink::new());
    let (engine, handle) = Engine::new(config, Arc::clone(&sink) as Arc<dyn ResultSink>);
    let engine_task = tokio::spawn(engine.run());

    let alice = tokio::spawn(run_scripted_client("alice".to_string(), handle.clone()));
    let bob = tokio::spawn(run_scripted_client("bob".to_string(), handle.clone()));

    tokio::select! {
        _ = async { let _ = alice.await; let _ = bob.await; } => {
            info!("Demo match finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    handle.shutdown();
    let _ = engine_task.await;

    println!("Persisted results: {}", sink.result_count());
    for player in ["alice", "bob"] {
        if let Some(row) = sink.stats_for(&player.to_string()) {
            println!(
                "{}: {} games, {} wins, {} reward",
                player, row.total_games, row.total_wins, row.total_reward
            );
        }
    }
}

/// A minimal well-behaved client: queues for a match, readies when matched,
/// chases the ball while the match runs and exits on the completion notice.
async fn run_scripted_client(player: PlayerId, handle: EngineHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let Some(_token) = handle.connect(&player, tx).await else {
        return;
    };

    handle.message(
        &player,
        ClientMessage::JoinMatchmaking {
            mode: "classic".to_string(),
        },
    );

    while let Some(message) = rx.recv().await {
        match message {
            ServerMessage::GameMatched {
                game_id,
                opponent_id,
                side,
                ..
            } => {
                info!(
                    "{} matched against {} in {} ({:?} side)",
                    player, opponent_id, game_id, side
                );
                handle.message(&player, ClientMessage::Ready { game_id });
            }
            ServerMessage::GameState {
                game_id, ball_y, ..
            } => {
                // Center the paddle on the ball.
                handle.message(
                    &player,
                    ClientMessage::PaddleMove {
                        game_id,
                        position: Some(ball_y - PADDLE_HEIGHT / 2.0),
                        direction: None,
                    },
                );
            }
            ServerMessage::MatchEnded {
                winner_id,
                reward_earned,
                final_scores,
                ..
            } => {
                info!(
                    "{}: match over, winner {:?}, reward {}, scores {:?}",
                    player, winner_id, reward_earned, final_scores
                );
                break;
            }
            ServerMessage::GameCancelled { reason, .. } => {
                info!("{}: game cancelled ({})", player, reason);
                break;
            }
            _ => {}
        }
    }
}
