//! Process-wide bridge configuration.
//!
//! Loaded once at startup (TOML file plus environment overrides), validated,
//! and then shared read-only with every session as `Arc<BridgeConfig>`.
//! Nothing in a session mutates it.

use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::audio::{AudioMode, Transcoder};
use crate::integrations::supabase::SupabaseConfig;

// ── Top level ────────────────────────────────────────────────────

/// Root configuration. Every section is optional in the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BridgeConfig {
    /// AI realtime engine connection and session defaults.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Knowledge search service used by the `search_knowledge` tool.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    /// Text-generation service used for post-call summaries.
    #[serde(default)]
    pub summary: SummaryConfig,
    /// Agent config store and call/lead persistence. `None` disables both.
    #[serde(default)]
    pub supabase: Option<SupabaseConfig>,
    /// Session timers.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl BridgeConfig {
    /// Parse a TOML document. Missing sections and fields take defaults.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Invalid bridge config: {e}"))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Overlay credentials and endpoints from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup. Empty values are ignored.
    ///
    /// - `OPENAI_API_KEY` → engine and summary API keys
    /// - `SUPABASE_URL` + `SUPABASE_SERVICE_KEY` → supabase section
    /// - `KNOWLEDGE_SEARCH_URL` → knowledge endpoint
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.engine.api_key = Some(key.clone());
            self.summary.api_key = Some(key);
        }
        if let Some(supabase) = SupabaseConfig::from_lookup(&get) {
            self.supabase = Some(supabase);
        }
        if let Some(url) = get("KNOWLEDGE_SEARCH_URL") {
            self.knowledge.url = Some(url);
        }
    }

    /// Reject configurations no session could run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        Transcoder::new(self.engine.audio)?;

        if self.timing.keepalive_interval_secs == 0 {
            anyhow::bail!("timing.keepalive_interval_secs must be greater than zero");
        }
        if self.timing.warning_lead_secs >= self.timing.max_session_secs {
            anyhow::bail!(
                "timing.warning_lead_secs ({}) must be shorter than timing.max_session_secs ({})",
                self.timing.warning_lead_secs,
                self.timing.max_session_secs
            );
        }
        if !(0.0..=1.0).contains(&self.knowledge.match_threshold) {
            anyhow::bail!(
                "knowledge.match_threshold must be within 0.0..=1.0, got {}",
                self.knowledge.match_threshold
            );
        }
        Ok(())
    }

    /// JSON Schema of the configuration file.
    pub fn json_schema() -> serde_json::Value {
        schemars::schema_for!(BridgeConfig).to_value()
    }
}

// ── Engine ───────────────────────────────────────────────────────

/// AI realtime engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// API key. `None` requires `OPENAI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// WebSocket endpoint, without query string.
    #[serde(default = "default_engine_url")]
    pub url: String,
    #[serde(default = "default_engine_model")]
    pub model: String,
    /// Voice used when the tenant config does not name one.
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Speech-to-text model for caller transcription.
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// Sampling temperature used when the tenant config does not set one.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Engine-side audio encoding.
    #[serde(default)]
    pub audio: AudioMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: default_engine_url(),
            model: default_engine_model(),
            voice: default_voice(),
            transcription_model: default_transcription_model(),
            temperature: default_temperature(),
            audio: AudioMode::default(),
        }
    }
}

fn default_engine_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_engine_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_temperature() -> f64 {
    0.8
}

// ── Knowledge ────────────────────────────────────────────────────

/// Knowledge search service settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KnowledgeConfig {
    /// Search endpoint. `None` makes every search return no results.
    #[serde(default)]
    pub url: Option<String>,
    /// Bearer token sent with search requests.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Maximum snippets per search.
    #[serde(default = "default_match_count")]
    pub match_count: u32,
    /// Minimum relevance score (0.0–1.0).
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_knowledge_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            match_count: default_match_count(),
            match_threshold: default_match_threshold(),
            timeout_secs: default_knowledge_timeout_secs(),
        }
    }
}

fn default_match_count() -> u32 {
    5
}

fn default_match_threshold() -> f64 {
    0.5
}

fn default_knowledge_timeout_secs() -> u64 {
    8
}

// ── Summary ──────────────────────────────────────────────────────

/// Post-call summarization settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummaryConfig {
    #[serde(default = "default_summary_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_summary_model")]
    pub model: String,
    #[serde(default = "default_summary_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            api_url: default_summary_url(),
            api_key: None,
            model: default_summary_model(),
            timeout_secs: default_summary_timeout_secs(),
        }
    }
}

fn default_summary_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_summary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_summary_timeout_secs() -> u64 {
    30
}

// ── Timing ───────────────────────────────────────────────────────

/// Per-session timers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TimingConfig {
    /// Keepalive tick period while the session is active.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// Hard ceiling on session length; the engine refuses longer sessions.
    #[serde(default = "default_max_session_secs")]
    pub max_session_secs: u64,
    /// How long before the ceiling the caller is warned.
    #[serde(default = "default_warning_lead_secs")]
    pub warning_lead_secs: u64,
    /// Pause before the single finalization retry.
    #[serde(default = "default_finalize_retry_delay_ms")]
    pub finalize_retry_delay_ms: u64,
    /// Upper bound on the engine WebSocket handshake.
    #[serde(default = "default_engine_connect_timeout_secs")]
    pub engine_connect_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_interval_secs(),
            max_session_secs: default_max_session_secs(),
            warning_lead_secs: default_warning_lead_secs(),
            finalize_retry_delay_ms: default_finalize_retry_delay_ms(),
            engine_connect_timeout_secs: default_engine_connect_timeout_secs(),
        }
    }
}

impl TimingConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_secs)
    }

    /// Session age at which the approaching-limit warning fires.
    pub fn warning_at(&self) -> Duration {
        Duration::from_secs(self.max_session_secs.saturating_sub(self.warning_lead_secs))
    }

    pub fn finalize_retry_delay(&self) -> Duration {
        Duration::from_millis(self.finalize_retry_delay_ms)
    }

    pub fn engine_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_connect_timeout_secs)
    }
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_max_session_secs() -> u64 {
    30 * 60
}

fn default_warning_lead_secs() -> u64 {
    120
}

fn default_finalize_retry_delay_ms() -> u64 {
    1_000
}

fn default_engine_connect_timeout_secs() -> u64 {
    10
}

// ── Tests ────────────────────────────────────────────────────────
