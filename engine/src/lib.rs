//! # Match Orchestration Engine
//!
//! Authoritative engine for a two-paddle arena game: it pairs players,
//! runs the per-match physics simulation, supervises bots, and runs
//! single-elimination tournaments on top of the same match primitive.
//!
//! ## Architecture
//!
//! All mutable state is owned by a single [`engine::Engine`] task draining
//! an event mailbox. Transports, timers and tests interact with it only
//! through an [`engine::EngineHandle`]: they push events, the run loop
//! mutates. There are no locks around game state and no cross-task shared
//! mutation.
//!
//! Per-session timers (ready timeout, 60 Hz physics tick, match duration,
//! bot cadence) are plain tokio tasks that post events back into the
//! mailbox; their `JoinHandle`s are owned by the session and aborted on any
//! terminal transition. A timer event that arrives after its session ended
//! is dropped by a status check, so cancellation never needs to be perfectly
//! synchronized with delivery.
//!
//! ## Module Organization
//!
//! - [`registry`]: identity -> outbound channel mapping with stale-connection
//!   protection, the only component allowed to push to a client
//! - [`matchmaking`]: FIFO queue with timed bot fallback
//! - [`physics`]: fixed-step ball and paddle simulation
//! - [`session`]: one match's state machine, timers and scoring
//! - [`bot`]: synthetic opponent decisions
//! - [`tournament`]: bracket generation and round advancement
//! - [`sink`]: result persistence boundary
//! - [`engine`]: the orchestrator tying it all together

pub mod bot;
pub mod engine;
pub mod error;
pub mod matchmaking;
pub mod physics;
pub mod registry;
pub mod session;
pub mod sink;
pub mod tournament;

pub use engine::{Engine, EngineConfig, EngineHandle};
pub use error::EngineError;
pub use registry::{ConnectionToken, OutboundSender};
pub use sink::{MatchRecord, MemorySink, ResultSink, SinkError};
