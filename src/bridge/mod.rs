//! Per-call bridge between a carrier leg and an engine leg.
//!
//! ## Architecture
//!
//! ```text
//! carrier leg ─▸ media ─▸ Transcoder ─▸ input_audio_buffer.append ─▸ engine leg
//!      ▴                                                                   │
//!      └──── media ◂─ Transcoder ◂─ response.audio.delta ◂─────────────────┤
//!                                                                          │
//!                ToolMediator ◂─ function_call_arguments.done ◂────────────┤
//!                ConversationRecorder ◂─ transcripts ◂─────────────────────┘
//! ```
//!
//! One [`BridgeController`] task owns everything about a call. Engine
//! connection, agent config lookup and tool dispatch run in spawned tasks
//! that report back over an internal channel, so the relay path never waits
//! on them. When the call ends both legs are closed, the finalizer runs to
//! completion, and only then is the [`SessionReport`] returned.

pub mod controller;
pub mod session;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{AgentConfigSource, ConfigSource};
use crate::config::BridgeConfig;
use crate::finalizer::{CallFinalizer, FinalizeOutcome, OpenAiSummarizer};
use crate::integrations::SupabaseClient;
use crate::recorder::ConversationTurn;
use crate::tools::{KnowledgeClient, KnowledgeSearch, ToolMediator};
use crate::voice::{EngineConnector, RealtimeConnector};

pub use controller::{run_session, BridgeController, CloseHandle};
pub use session::{BridgeSession, SessionWarning};

/// Lifecycle of one bridged call. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BridgeState {
    Idle,
    CarrierConnected,
    EngineConnecting,
    EngineReady,
    Active,
    Closing,
    Closed,
}

/// What ended the call. Only the first trigger is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    CarrierClosed,
    CarrierError(String),
    EngineClosed,
    EngineError(String),
    EngineConnectFailed(String),
    /// Carrier sent `stop`.
    Stop,
    MaxDuration,
    /// [`CloseHandle::close`] was called.
    Explicit,
    /// The embedder's shutdown token fired.
    Shutdown,
}

/// Shared collaborators, cloned into every session.
#[derive(Clone)]
pub struct BridgeDeps {
    pub config: Arc<BridgeConfig>,
    pub engine: Arc<dyn EngineConnector>,
    /// Tenant agent configuration. `None` always uses the default template.
    pub agents: Option<Arc<dyn AgentConfigSource>>,
    pub mediator: Arc<ToolMediator>,
    /// `None` disables post-call persistence.
    pub finalizer: Option<Arc<CallFinalizer>>,
    /// Process shutdown. Each session runs under a child of this token.
    pub shutdown: CancellationToken,
}

impl BridgeDeps {
    /// Wire the production collaborators described by `config`.
    ///
    /// The engine API key is required. Supabase, the knowledge service and
    /// the summary API are optional; without them the session runs on the
    /// default agent, tool calls return empty results, and finalization is
    /// skipped.
    pub fn from_config(config: BridgeConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        config.validate()?;

        let engine =
            RealtimeConnector::new(&config.engine, config.timing.engine_connect_timeout())?;
        let supabase = config
            .supabase
            .clone()
            .map(SupabaseClient::new)
            .transpose()?
            .map(Arc::new);

        let knowledge = KnowledgeClient::from_config(&config.knowledge)?
            .map(|client| Arc::new(client) as Arc<dyn KnowledgeSearch>);
        if knowledge.is_none() {
            tracing::warn!("Knowledge search not configured, search_knowledge will return no results");
        }
        let mediator = ToolMediator::new(knowledge, &config.knowledge);

        let finalizer = match (OpenAiSummarizer::from_config(&config.summary)?, &supabase) {
            (Some(summarizer), Some(store)) => Some(Arc::new(CallFinalizer::new(
                Arc::new(summarizer),
                store.clone(),
                config.timing.finalize_retry_delay(),
            ))),
            _ => {
                tracing::warn!("Summary API or Supabase not configured, call finalization disabled");
                None
            }
        };
        let agents = supabase.map(|client| client as Arc<dyn AgentConfigSource>);

        Ok(Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            agents,
            mediator: Arc::new(mediator),
            finalizer,
            shutdown,
        })
    }
}

/// What happened during one call, returned once finalization is done.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub call_sid: Option<String>,
    pub tenant_id: Option<String>,
    pub close_reason: CloseReason,
    pub finalize: FinalizeOutcome,
    /// Media frames received from the carrier.
    pub inbound_frames: u64,
    /// Media frames sent to the carrier.
    pub outbound_frames: u64,
    /// Frames discarded (engine not ready, or a full queue).
    pub dropped_frames: u64,
    pub config_source: Option<ConfigSource>,
    pub warnings: Vec<SessionWarning>,
    pub transcript: Vec<ConversationTurn>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::SupabaseConfig;

    fn config_with_key() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.engine.api_key = Some("sk-test".into());
        config
    }

    #[test]
    fn from_config_requires_engine_key() {
        let err = BridgeDeps::from_config(BridgeConfig::default(), CancellationToken::new());
        assert!(err.is_err());
    }

    #[test]
    fn minimal_config_disables_optional_collaborators() {
        let deps = BridgeDeps::from_config(config_with_key(), CancellationToken::new()).unwrap();
        assert!(deps.agents.is_none());
        assert!(deps.finalizer.is_none());
    }

    #[test]
    fn full_config_enables_lookup_and_finalizer() {
        let mut config = config_with_key();
        config.summary.api_key = Some("sk-test".into());
        config.supabase = Some(SupabaseConfig {
            url: "https://x.supabase.co".into(),
            service_key: "service".into(),
        });

        let deps = BridgeDeps::from_config(config, CancellationToken::new()).unwrap();
        assert!(deps.agents.is_some());
        assert!(deps.finalizer.is_some());
    }

    #[test]
    fn states_are_ordered() {
        assert!(BridgeState::Idle < BridgeState::CarrierConnected);
        assert!(BridgeState::Active < BridgeState::Closing);
        assert!(BridgeState::Closing < BridgeState::Closed);
    }
}
