//! Real-time bridge between a telephone carrier's media stream and a
//! conversational AI realtime engine.
//!
//! A listener (not part of this crate) accepts the carrier's WebSocket,
//! wraps it with [`voice::pump_websocket`], and hands the resulting
//! [`voice::Leg`] to [`bridge::run_session`] together with shared
//! [`bridge::BridgeDeps`]. The session opens its own engine leg, relays
//! audio both ways, answers the engine's tool calls, records the
//! conversation, and persists a summary before returning.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod agent;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod integrations;
pub mod logging;
pub mod recorder;
pub mod tools;
pub mod voice;

pub use bridge::{run_session, BridgeDeps, BridgeState, CloseReason, SessionReport};
pub use config::BridgeConfig;
pub use error::ProtocolError;
