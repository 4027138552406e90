//! Wire protocols and transports for both legs of a bridged call.
//!
//! ## Design
//! - Each leg is a pair of channels ([`Leg`]); sockets are pumped by
//!   background tasks so the controller stays testable without a network
//! - Carrier leg: Twilio Media Streams JSON ([`carrier`])
//! - Engine leg: OpenAI Realtime v1 JSON ([`openai_realtime`])
//! - Engine connections are opened through the [`EngineConnector`] trait

pub mod carrier;
pub mod leg;
pub mod openai_realtime;

use async_trait::async_trait;

pub use leg::{pump_websocket, Leg, LegInbound, LegOutbound, LegRemote, LEG_CHANNEL_CAPACITY};
pub use openai_realtime::RealtimeConnector;

// ── Engine events ────────────────────────────────────────────────

/// Event received from the AI realtime engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The engine accepted the connection; configuration may be sent.
    SessionCreated,
    /// The engine applied a `session.update`.
    SessionUpdated,
    /// Assistant audio chunk, still in engine format.
    Audio { data: Vec<u8> },
    /// Incremental assistant transcript text.
    OutputTranscriptDelta { text: String },
    /// Authoritative assistant transcript for the finished utterance.
    OutputTranscriptDone { text: String },
    /// Completed transcription of caller speech.
    InputTranscript { text: String },
    /// The engine opened a function-call output item.
    FunctionCallStarted { call_id: String, name: String },
    /// Function-call arguments are complete and the call can be dispatched.
    /// `name` is absent when the engine only announced it in
    /// [`EngineEvent::FunctionCallStarted`].
    FunctionCall {
        call_id: String,
        name: Option<String>,
        arguments: String,
    },
    /// Caller started talking (server VAD).
    SpeechStarted,
    /// The engine finished a response cycle.
    ResponseDone,
    /// Engine-reported error. The session keeps running.
    Error { message: String },
    /// Recognized envelope with an event type the bridge does not act on.
    Ignored { event_type: String },
}

// ── Connector ────────────────────────────────────────────────────

/// Opens engine legs. One call per bridged session.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self, session_id: &str) -> anyhow::Result<Leg>;
}
