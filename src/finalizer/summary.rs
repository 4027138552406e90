//! Structured post-call analysis via an OpenAI-compatible chat completions
//! endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SummaryConfig;

/// How the call ended, from the business's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    AppointmentBooked,
    InformationProvided,
    LeadCaptured,
    FollowUpNeeded,
    NotInterested,
    #[default]
    #[serde(other)]
    Other,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppointmentBooked => "appointment_booked",
            Self::InformationProvided => "information_provided",
            Self::LeadCaptured => "lead_captured",
            Self::FollowUpNeeded => "follow_up_needed",
            Self::NotInterested => "not_interested",
            Self::Other => "other",
        }
    }
}

/// What the text-generation service extracted from the transcript.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallAnalysis {
    pub summary: String,
    #[serde(default)]
    pub outcome: Outcome,
    #[serde(default)]
    pub caller_name: Option<String>,
    #[serde(default)]
    pub requested_service: Option<String>,
    #[serde(default)]
    pub appointment_booked: bool,
}

impl CallAnalysis {
    /// A lead is worth recording when the caller left a name, booked, or the
    /// call was classified as a captured lead.
    pub fn warrants_lead(&self) -> bool {
        self.caller_name
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty())
            || self.appointment_booked
            || self.outcome == Outcome::LeadCaptured
    }
}

/// Turns a rendered dialogue into a [`CallAnalysis`].
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn analyze(&self, transcript: &str) -> anyhow::Result<CallAnalysis>;
}

const ANALYSIS_PROMPT: &str = r#"You analyze phone calls handled by an AI receptionist.
Read the transcript and reply with a single JSON object:

```json
{
  "summary": "1-2 sentences describing what the caller wanted and what happened",
  "outcome": "appointment_booked | information_provided | lead_captured | follow_up_needed | not_interested | other",
  "caller_name": "name the caller gave, or null",
  "requested_service": "service the caller asked about, or null",
  "appointment_booked": true or false
}
```

Use only facts stated in the transcript."#;

/// Chat-completions summarizer.
pub struct OpenAiSummarizer {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiSummarizer {
    /// `None` when no API key is configured.
    pub fn from_config(config: &SummaryConfig) -> anyhow::Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self {
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
            client,
        }))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn analyze(&self, transcript: &str) -> anyhow::Result<CallAnalysis> {
        let payload = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": ANALYSIS_PROMPT },
                { "role": "user", "content": transcript },
            ]
        });

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Summary API error {status}: {body}");
        }

        let body: serde_json::Value = resp.json().await?;
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Summary response has no message content"))?;

        let analysis: CallAnalysis = serde_json::from_str(extract_json_block(text))
            .map_err(|e| anyhow::anyhow!("Summary response is not a call analysis: {e}"))?;
        Ok(analysis)
    }
}

/// Extract JSON content from a response that may be wrapped in a fenced
/// code block, with or without a language tag.
fn extract_json_block(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text.trim();
    };
    let block = &text[start + 3..];
    let Some(end) = block.find("```") else {
        return text.trim();
    };
    let candidate = &block[..end];
    // Skip the language identifier line if present
    match candidate.find('\n') {
        Some(nl) if !candidate[..nl].trim_start().starts_with(['{', '[']) => {
            candidate[nl + 1..].trim()
        }
        _ => candidate.trim(),
    }
}
