//! OpenAI Realtime WebSocket protocol for the engine leg.
//!
//! ## Protocol Overview
//!
//! 1. **Connect**: WebSocket to `wss://api.openai.com/v1/realtime?model=...`
//!    with `Authorization: Bearer` and `OpenAI-Beta: realtime=v1`
//! 2. **Setup**: wait for `session.created`, send `session.update`
//!    (instructions, voice, audio formats, transcription, tools), wait for
//!    `session.updated`
//! 3. **Stream**: send `input_audio_buffer.append` (base64 audio),
//!    receive `response.audio.delta` (base64 audio)
//! 4. **Tools**: receive `response.function_call_arguments.done`, reply with
//!    a `function_call_output` item and a fresh `response.create`
//! 5. **Close**: gracefully close the WebSocket session

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use super::{pump_websocket, EngineConnector, EngineEvent, Leg};
use crate::config::EngineConfig;
use crate::error::ProtocolError;

// ── Connector ────────────────────────────────────────────────────

/// Opens authenticated OpenAI Realtime sessions.
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    url: String,
    model: String,
    api_key: String,
    connect_timeout: Duration,
}

impl RealtimeConnector {
    /// Fails when no API key is configured.
    pub fn new(config: &EngineConfig, connect_timeout: Duration) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("engine.api_key is not set (or OPENAI_API_KEY)"))?;

        Ok(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
            connect_timeout,
        })
    }

    /// Full WebSocket URL including the model query.
    pub fn endpoint(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }
}

#[async_trait]
impl EngineConnector for RealtimeConnector {
    async fn connect(&self, session_id: &str) -> anyhow::Result<Leg> {
        let url = self.endpoint();

        tracing::info!(
            session_id = %session_id,
            model = %self.model,
            "Connecting to OpenAI Realtime"
        );

        // Build WebSocket request with auth headers
        let mut request = url
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("Failed to build WebSocket request: {e}"))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid auth header: {e}"))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid header: {e}"))?,
        );

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "Timed out connecting to OpenAI Realtime after {:?}",
                        self.connect_timeout
                    )
                })?
                .map_err(|e| anyhow::anyhow!("Failed to connect to OpenAI Realtime: {e}"))?;

        Ok(pump_websocket(ws_stream, "engine", session_id.to_string()))
    }
}

// ── Client messages ──────────────────────────────────────────────

/// `input_audio_buffer.append` carrying one frame of engine-format audio.
pub fn audio_append(audio: &[u8]) -> String {
    serde_json::json!({
        "type": "input_audio_buffer.append",
        "audio": base64::engine::general_purpose::STANDARD.encode(audio),
    })
    .to_string()
}

/// Synthetic user-role text item.
pub fn user_text_item(text: &str) -> String {
    serde_json::json!({
        "type": "conversation.item.create",
        "item": {
            "type": "message",
            "role": "user",
            "content": [{
                "type": "input_text",
                "text": text,
            }]
        }
    })
    .to_string()
}

/// Tool result for the function call `call_id`.
pub fn function_call_output(call_id: &str, output: &str) -> String {
    serde_json::json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }
    })
    .to_string()
}

/// Trigger a response that includes spoken audio.
pub fn response_create() -> String {
    serde_json::json!({
        "type": "response.create",
        "response": {
            "modalities": ["audio", "text"],
        }
    })
    .to_string()
}

// ── Server event parsing ─────────────────────────────────────────

fn required_str<'a>(
    value: &'a serde_json::Value,
    field: &'static str,
) -> Result<&'a str, ProtocolError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or(ProtocolError::MissingField(field))
}

/// Parse one OpenAI Realtime server event.
pub fn parse_server_event(json_text: &str) -> Result<EngineEvent, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(json_text)?;
    let event_type = required_str(&value, "type")?;

    let event = match event_type {
        // Session lifecycle
        "session.created" => EngineEvent::SessionCreated,
        "session.updated" => EngineEvent::SessionUpdated,

        // Audio output
        "response.audio.delta" => {
            let delta = required_str(&value, "delta")?;
            EngineEvent::Audio {
                data: base64::engine::general_purpose::STANDARD.decode(delta)?,
            }
        }

        // Output transcript (model speech)
        "response.audio_transcript.delta" => EngineEvent::OutputTranscriptDelta {
            text: required_str(&value, "delta")?.to_string(),
        },
        "response.audio_transcript.done" => EngineEvent::OutputTranscriptDone {
            text: required_str(&value, "transcript")?.to_string(),
        },

        // Input transcript (caller speech)
        "conversation.item.input_audio_transcription.completed" => EngineEvent::InputTranscript {
            text: required_str(&value, "transcript")?.to_string(),
        },

        // Tool calls
        "response.output_item.added"
            if value.pointer("/item/type").and_then(|v| v.as_str()) == Some("function_call") =>
        {
            let item = value.get("item").ok_or(ProtocolError::MissingField("item"))?;
            EngineEvent::FunctionCallStarted {
                call_id: required_str(item, "call_id")?.to_string(),
                name: required_str(item, "name")?.to_string(),
            }
        }
        "response.function_call_arguments.done" => EngineEvent::FunctionCall {
            call_id: required_str(&value, "call_id")?.to_string(),
            name: value.get("name").and_then(|v| v.as_str()).map(str::to_string),
            arguments: value
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}")
                .to_string(),
        },

        "input_audio_buffer.speech_started" => EngineEvent::SpeechStarted,
        "response.done" => EngineEvent::ResponseDone,

        "error" => EngineEvent::Error {
            message: value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown OpenAI error")
                .to_string(),
        },

        other => EngineEvent::Ignored {
            event_type: other.to_string(),
        },
    };

    Ok(event)
}

// ── Tests ────────────────────────────────────────────────────────
