//! Session configuration: who the engine is for this call and what it says
//! first.
//!
//! ## Precedence
//!
//! - **Tenant**: the out-of-band value from the carrier `start` event always
//!   wins over a hint resolved earlier (e.g. from the upgrade URL).
//! - **Overrides**: caller-supplied greeting, business name and custom
//!   instructions win over the stored [`AgentConfig`].
//! - **Fallback**: with no stored config the default receptionist template
//!   is used and the session records a domain-mismatch warning.
//!
//! ## Re-apply rule
//!
//! The engine may acknowledge creation before the config fetch finishes.
//! The controller then sends the default configuration at once and, when the
//! fetched config arrives, sends a second `session.update` with it. The
//! greeting is still spoken at most once.

pub mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::AudioMode;
use crate::config::EngineConfig;
use crate::tools;
use crate::voice::carrier::StartMetadata;
use crate::voice::openai_realtime::{response_create, user_text_item};

/// Realtime engine accepts temperatures in this range only.
const TEMPERATURE_RANGE: (f64, f64) = (0.6, 1.2);

// ── Stored configuration ─────────────────────────────────────────

/// Tenant agent configuration as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System instructions. Used verbatim when present.
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    /// Spoken first, word for word.
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Extra tools declared to the engine.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub business_name: Option<String>,
}

/// One function the engine may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Entry for the `tools` array of `session.update`.
    pub fn to_session_tool(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

/// Where the agent configuration comes from.
#[async_trait]
pub trait AgentConfigSource: Send + Sync {
    /// `Ok(None)` means the tenant has no stored config.
    async fn fetch(&self, tenant_id: &str) -> anyhow::Result<Option<AgentConfig>>;
}

// ── Per-call inputs ──────────────────────────────────────────────

/// Values supplied with the call itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerOverrides {
    pub greeting: Option<String>,
    pub business_name: Option<String>,
    pub custom_instructions: Option<String>,
}

impl CallerOverrides {
    pub fn from_start(start: &StartMetadata) -> Self {
        Self {
            greeting: start.greeting(),
            business_name: start.business_name(),
            custom_instructions: start.custom_instructions(),
        }
    }
}

/// Pick the tenant for a call. The out-of-band value always wins.
pub fn resolve_tenant(hint: Option<&str>, out_of_band: Option<&str>) -> Option<String> {
    out_of_band
        .or(hint)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

// ── Effective configuration ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Tenant config found in the store.
    Stored,
    /// No tenant config; default template in use.
    Default,
}

/// Agent settings in effect for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionAgent {
    pub instructions: String,
    pub voice: String,
    pub greeting: Option<String>,
    pub temperature: f64,
    pub tools: Vec<ToolDefinition>,
    pub business_name: Option<String>,
    pub source: ConfigSource,
}

impl SessionAgent {
    /// Merge stored config, call overrides and engine defaults.
    pub fn resolve(
        stored: Option<&AgentConfig>,
        overrides: &CallerOverrides,
        engine: &EngineConfig,
    ) -> Self {
        let source = if stored.is_some() {
            ConfigSource::Stored
        } else {
            ConfigSource::Default
        };
        let stored_field = |f: fn(&AgentConfig) -> &Option<String>| {
            stored
                .and_then(|c| f(c).as_deref())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let business_name = overrides
            .business_name
            .clone()
            .or_else(|| stored_field(|c| &c.business_name));
        let instructions = overrides
            .custom_instructions
            .clone()
            .or_else(|| stored_field(|c| &c.instructions))
            .unwrap_or_else(|| prompt::default_instructions(business_name.as_deref()));
        let greeting = overrides
            .greeting
            .clone()
            .or_else(|| stored_field(|c| &c.greeting));
        let voice = stored_field(|c| &c.voice).unwrap_or_else(|| engine.voice.clone());
        let temperature = stored
            .and_then(|c| c.temperature)
            .unwrap_or(engine.temperature)
            .clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1);

        let mut tools = vec![tools::search_knowledge_definition()];
        if let Some(config) = stored {
            for tool in &config.tools {
                if tools.iter().all(|t| t.name != tool.name) {
                    tools.push(tool.clone());
                }
            }
        }

        Self {
            instructions,
            voice,
            greeting,
            temperature,
            tools,
            business_name,
            source,
        }
    }
}

// ── Engine messages ──────────────────────────────────────────────

/// Build the `session.update` that configures the engine for this call.
pub fn build_init_message(
    agent: &SessionAgent,
    audio: AudioMode,
    transcription_model: &str,
) -> serde_json::Value {
    let tools: Vec<serde_json::Value> = agent.tools.iter().map(|t| t.to_session_tool()).collect();

    serde_json::json!({
        "type": "session.update",
        "session": {
            "modalities": ["audio", "text"],
            "instructions": agent.instructions,
            "voice": agent.voice,
            "input_audio_format": audio.engine_format(),
            "output_audio_format": audio.engine_format(),
            "input_audio_transcription": {
                "model": transcription_model
            },
            "turn_detection": {
                "type": "server_vad"
            },
            "temperature": agent.temperature,
            "tool_choice": "auto",
            "tools": tools,
        }
    })
}

/// Seed-then-trigger pair that makes the engine speak `greeting` verbatim.
pub fn greeting_messages(greeting: &str) -> [String; 2] {
    [
        user_text_item(&format!(
            "Greet the caller now by saying exactly the following, word for word: \"{greeting}\""
        )),
        response_create(),
    ]
}

/// Seed-then-trigger pair for the approaching-maximum-duration notice.
pub fn duration_notice_messages() -> [String; 2] {
    [
        user_text_item(
            "The call is about to reach its time limit. Politely tell the caller the line will disconnect in about two minutes and offer to take a message or have someone call them back.",
        ),
        response_create(),
    ]
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> AgentConfig {
        AgentConfig {
            instructions: Some("You answer for Bright Smiles.".into()),
            voice: Some("shimmer".into()),
            greeting: Some("Thanks for calling Bright Smiles!".into()),
            temperature: Some(0.7),
            tools: vec![],
            business_name: Some("Bright Smiles".into()),
        }
    }

    #[test]
    fn out_of_band_tenant_wins() {
        assert_eq!(
            resolve_tenant(Some("url-tenant"), Some("oob-tenant")).as_deref(),
            Some("oob-tenant")
        );
        assert_eq!(
            resolve_tenant(Some("url-tenant"), None).as_deref(),
            Some("url-tenant")
        );
        assert_eq!(resolve_tenant(None, Some("  ")), None);
        assert_eq!(resolve_tenant(None, None), None);
    }

    #[test]
    fn stored_instructions_are_used_verbatim() {
        let agent = SessionAgent::resolve(
            Some(&stored()),
            &CallerOverrides::default(),
            &EngineConfig::default(),
        );
        assert_eq!(agent.instructions, "You answer for Bright Smiles.");
        assert_eq!(agent.voice, "shimmer");
        assert_eq!(agent.source, ConfigSource::Stored);
        assert_eq!(
            agent.greeting.as_deref(),
            Some("Thanks for calling Bright Smiles!")
        );
    }

    #[test]
    fn missing_config_falls_back_to_default_template() {
        let agent =
            SessionAgent::resolve(None, &CallerOverrides::default(), &EngineConfig::default());
        assert_eq!(agent.source, ConfigSource::Default);
        assert!(agent.instructions.contains("search_knowledge"));
        assert_eq!(agent.voice, "alloy");
        assert!(agent.greeting.is_none());
    }

    #[test]
    fn caller_overrides_beat_stored_values() {
        let overrides = CallerOverrides {
            greeting: Some("Hi from the override".into()),
            business_name: Some("Override Co".into()),
            custom_instructions: Some("Custom rules.".into()),
        };
        let agent =
            SessionAgent::resolve(Some(&stored()), &overrides, &EngineConfig::default());
        assert_eq!(agent.greeting.as_deref(), Some("Hi from the override"));
        assert_eq!(agent.business_name.as_deref(), Some("Override Co"));
        assert_eq!(agent.instructions, "Custom rules.");
    }

    #[test]
    fn blank_stored_instructions_use_template_with_business_name() {
        let config = AgentConfig {
            instructions: Some("   ".into()),
            business_name: Some("Acme Plumbing".into()),
            ..AgentConfig::default()
        };
        let agent = SessionAgent::resolve(
            Some(&config),
            &CallerOverrides::default(),
            &EngineConfig::default(),
        );
        assert!(agent.instructions.contains("receptionist for Acme Plumbing"));
    }

    #[test]
    fn temperature_is_clamped() {
        let config = AgentConfig {
            temperature: Some(2.0),
            ..AgentConfig::default()
        };
        let agent = SessionAgent::resolve(
            Some(&config),
            &CallerOverrides::default(),
            &EngineConfig::default(),
        );
        assert_eq!(agent.temperature, 1.2);
    }

    #[test]
    fn search_tool_is_always_declared_once() {
        let config = AgentConfig {
            tools: vec![
                tools::search_knowledge_definition(),
                ToolDefinition {
                    name: "transfer_call".into(),
                    description: "Transfer to a human".into(),
                    parameters: serde_json::json!({"type": "object", "properties": {}}),
                },
            ],
            ..AgentConfig::default()
        };
        let agent = SessionAgent::resolve(
            Some(&config),
            &CallerOverrides::default(),
            &EngineConfig::default(),
        );
        let names: Vec<&str> = agent.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search_knowledge", "transfer_call"]);
    }

    #[test]
    fn init_message_declares_formats_tools_and_policy() {
        let agent = SessionAgent::resolve(
            Some(&stored()),
            &CallerOverrides::default(),
            &EngineConfig::default(),
        );
        let msg = build_init_message(&agent, AudioMode::Passthrough, "whisper-1");

        assert_eq!(msg["type"], "session.update");
        let session = &msg["session"];
        assert_eq!(session["voice"], "shimmer");
        assert_eq!(session["input_audio_format"], "g711_ulaw");
        assert_eq!(session["output_audio_format"], "g711_ulaw");
        assert_eq!(session["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(session["tool_choice"], "auto");
        assert_eq!(session["temperature"], 0.7);
        assert_eq!(session["tools"][0]["type"], "function");
        assert_eq!(session["tools"][0]["name"], "search_knowledge");
        assert_eq!(session["tools"][0]["parameters"]["type"], "object");
    }

    #[test]
    fn init_message_uses_pcm16_when_transcoding() {
        let agent =
            SessionAgent::resolve(None, &CallerOverrides::default(), &EngineConfig::default());
        let msg = build_init_message(
            &agent,
            AudioMode::Transcode { engine_rate: 24_000 },
            "whisper-1",
        );
        assert_eq!(msg["session"]["input_audio_format"], "pcm16");
    }

    #[test]
    fn greeting_is_seed_then_trigger() {
        let [seed, trigger] = greeting_messages("Hello, Acme Dental!");
        let seed: serde_json::Value = serde_json::from_str(&seed).unwrap();
        let trigger: serde_json::Value = serde_json::from_str(&trigger).unwrap();

        assert_eq!(seed["type"], "conversation.item.create");
        assert_eq!(seed["item"]["role"], "user");
        assert!(seed["item"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("\"Hello, Acme Dental!\""));
        assert_eq!(trigger["type"], "response.create");
        assert_eq!(trigger["response"]["modalities"][0], "audio");
    }

    #[test]
    fn overrides_read_from_start_parameters() {
        let json = r#"{"streamSid":"MZ1","callSid":"CA1","customParameters":{"greeting":"Hi!","customInstructions":"Be brief."}}"#;
        let start: StartMetadata = serde_json::from_str(json).unwrap();
        let overrides = CallerOverrides::from_start(&start);
        assert_eq!(overrides.greeting.as_deref(), Some("Hi!"));
        assert_eq!(overrides.custom_instructions.as_deref(), Some("Be brief."));
        assert!(overrides.business_name.is_none());
    }
}
