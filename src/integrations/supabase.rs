//! Supabase integration for the bridge.
//!
//! Provides, via Supabase's PostgREST API:
//! - Tenant agent configuration lookup (`agent_configs`)
//! - Call accounting upserts (`calls`)
//! - Lead capture upserts (`leads`)
//!
//! ## Design
//! - HTTP client (reqwest) against Supabase PostgREST endpoints
//! - Service-key authentication for server-side operations
//! - Upserts use `Prefer: resolution=merge-duplicates`, so a retried
//!   finalization overwrites rather than duplicates the call row

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentConfig, AgentConfigSource, ToolDefinition};
use crate::finalizer::{CallRecord, CallStore, LeadRecord};

// ── Configuration ────────────────────────────────────────────────

/// Supabase connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SupabaseConfig {
    /// Supabase project URL (e.g., https://xxxx.supabase.co).
    pub url: String,
    /// Supabase service role key (server-side, never exposed to client).
    pub service_key: String,
}

impl SupabaseConfig {
    /// Load from environment variables.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from `SUPABASE_URL` and `SUPABASE_SERVICE_KEY` in any lookup.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("SUPABASE_URL")?;
        let service_key = lookup("SUPABASE_SERVICE_KEY")?;

        if url.is_empty() || service_key.is_empty() {
            return None;
        }

        Some(Self {
            url: url.trim_end_matches('/').to_string(),
            service_key,
        })
    }
}

// ── Data models ──────────────────────────────────────────────────

/// Row of the `agent_configs` table.
#[derive(Debug, Clone, Deserialize)]
struct AgentConfigRow {
    instructions: Option<String>,
    voice: Option<String>,
    greeting: Option<String>,
    temperature: Option<f64>,
    /// JSON column; may be null.
    tools: Option<Vec<ToolDefinition>>,
    business_name: Option<String>,
}

impl From<AgentConfigRow> for AgentConfig {
    fn from(row: AgentConfigRow) -> Self {
        Self {
            instructions: row.instructions,
            voice: row.voice,
            greeting: row.greeting,
            temperature: row.temperature,
            tools: row.tools.unwrap_or_default(),
            business_name: row.business_name,
        }
    }
}

// ── Supabase client ──────────────────────────────────────────────

/// Supabase HTTP client for agent config and call accounting.
pub struct SupabaseClient {
    config: SupabaseConfig,
    http: reqwest::Client,
}

impl SupabaseClient {
    /// Create a new Supabase client.
    pub fn new(config: SupabaseConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self { config, http })
    }

    /// Build the PostgREST URL for a table.
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    /// Get the base headers for authenticated requests.
    fn auth_headers(&self) -> Vec<(&str, String)> {
        vec![
            ("apikey", self.config.service_key.clone()),
            (
                "Authorization",
                format!("Bearer {}", self.config.service_key),
            ),
        ]
    }

    /// Upsert one row keyed on `on_conflict`, failing on any non-2xx status.
    async fn upsert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        on_conflict: &str,
        row: &T,
    ) -> anyhow::Result<()> {
        let mut request = self
            .http
            .post(self.table_url(table))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates")
            .json(row);
        for (key, value) in self.auth_headers() {
            request = request.header(key, value);
        }

        let resp = request.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Supabase upsert into {table} failed ({status}): {body}");
        }

        Ok(())
    }
}

#[async_trait]
impl AgentConfigSource for SupabaseClient {
    async fn fetch(&self, tenant_id: &str) -> anyhow::Result<Option<AgentConfig>> {
        let tenant_filter = format!("eq.{tenant_id}");
        let mut request = self.http.get(self.table_url("agent_configs")).query(&[
            ("tenant_id", tenant_filter.as_str()),
            ("select", "*"),
            ("limit", "1"),
        ]);
        for (key, value) in self.auth_headers() {
            request = request.header(key, value);
        }

        let resp = request.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Agent config lookup failed ({status}): {body}");
        }

        let rows: Vec<AgentConfigRow> = resp.json().await?;
        Ok(rows.into_iter().next().map(AgentConfig::from))
    }
}

#[async_trait]
impl CallStore for SupabaseClient {
    async fn upsert_call(&self, record: &CallRecord) -> anyhow::Result<()> {
        self.upsert("calls", "call_sid", record).await
    }

    async fn upsert_lead(&self, lead: &LeadRecord) -> anyhow::Result<()> {
        self.upsert("leads", "call_sid", lead).await
    }
}

// ── Tests ────────────────────────────────────────────────────────
