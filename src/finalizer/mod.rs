//! Post-call summarization and persistence.
//!
//! Runs once per session, after both legs are closed and before the
//! controller reports completion. The whole sequence (analyze, write call,
//! maybe write lead) is retried exactly once on any failure; a second
//! failure is logged and the call is abandoned.

pub mod summary;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::recorder::{render_dialogue, ConversationTurn};
pub use summary::{CallAnalysis, OpenAiSummarizer, Outcome, Summarizer};

/// Label stored as the callee when the tenant has no business name.
const DEFAULT_CALLEE_LABEL: &str = "AI receptionist";

// ── Records ──────────────────────────────────────────────────────

/// Row in the `calls` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub tenant_id: String,
    pub call_sid: String,
    pub caller_number: Option<String>,
    pub callee_label: String,
    pub outcome: Outcome,
    pub duration_seconds: u64,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Row in the `leads` table. At most one per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub tenant_id: String,
    pub call_sid: String,
    pub name: String,
    pub phone: Option<String>,
    pub source: String,
    pub status: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// Upsert-style persistence for call accounting.
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn upsert_call(&self, record: &CallRecord) -> anyhow::Result<()>;
    async fn upsert_lead(&self, lead: &LeadRecord) -> anyhow::Result<()>;
}

// ── Inputs and outcome ───────────────────────────────────────────

/// What the finalizer needs to know about the session.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub session_id: String,
    pub tenant_id: Option<String>,
    /// Carrier call id; rows are keyed on it.
    pub call_sid: Option<String>,
    pub caller_number: Option<String>,
    pub business_name: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Monotonic start, used for the duration.
    pub started: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTurns,
    NoTenant,
    /// The carrier never sent a call id to key the rows on.
    NoCallSid,
    /// No finalizer is configured for this deployment.
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Skipped(SkipReason),
    Persisted {
        attempts: u32,
        lead_written: bool,
        summary: CallAnalysis,
    },
    Abandoned {
        error: String,
    },
}

// ── Finalizer ────────────────────────────────────────────────────

pub struct CallFinalizer {
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn CallStore>,
    retry_delay: Duration,
}

impl CallFinalizer {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn CallStore>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            summarizer,
            store,
            retry_delay,
        }
    }

    /// Summarize and persist one call.
    ///
    /// `cancel` only interrupts the pause before the retry; it is the
    /// embedder's shutdown signal, not the session's own token.
    pub async fn finalize(
        &self,
        snapshot: &CallSnapshot,
        turns: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> FinalizeOutcome {
        if turns.is_empty() {
            tracing::info!(session_id = %snapshot.session_id, "No conversation recorded, skipping finalization");
            return FinalizeOutcome::Skipped(SkipReason::NoTurns);
        }
        let Some(tenant_id) = snapshot.tenant_id.as_deref() else {
            tracing::info!(session_id = %snapshot.session_id, "Tenant never resolved, skipping finalization");
            return FinalizeOutcome::Skipped(SkipReason::NoTenant);
        };
        let Some(call_sid) = snapshot.call_sid.as_deref() else {
            tracing::warn!(session_id = %snapshot.session_id, "No call id, skipping finalization");
            return FinalizeOutcome::Skipped(SkipReason::NoCallSid);
        };
        let keys = RowKeys { tenant_id, call_sid };

        let transcript = render_dialogue(turns);

        let first_error = match self.attempt(snapshot, keys, &transcript).await {
            Ok((summary, lead_written)) => {
                return FinalizeOutcome::Persisted {
                    attempts: 1,
                    lead_written,
                    summary,
                }
            }
            Err(e) => e,
        };
        tracing::warn!(
            session_id = %snapshot.session_id,
            error = %first_error,
            "Finalization failed, retrying once"
        );

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::warn!(session_id = %snapshot.session_id, "Shutdown during finalization retry wait, abandoning");
                return FinalizeOutcome::Abandoned { error: first_error.to_string() };
            }
            () = tokio::time::sleep(self.retry_delay) => {}
        }

        match self.attempt(snapshot, keys, &transcript).await {
            Ok((summary, lead_written)) => FinalizeOutcome::Persisted {
                attempts: 2,
                lead_written,
                summary,
            },
            Err(e) => {
                tracing::error!(
                    session_id = %snapshot.session_id,
                    call_sid = %call_sid,
                    error = %e,
                    "Finalization failed twice, abandoning call record"
                );
                FinalizeOutcome::Abandoned {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn attempt(
        &self,
        snapshot: &CallSnapshot,
        keys: RowKeys<'_>,
        transcript: &str,
    ) -> anyhow::Result<(CallAnalysis, bool)> {
        let analysis = self.summarizer.analyze(transcript).await?;
        let duration_seconds = snapshot.started.elapsed().as_secs();
        let now = Utc::now();

        let record = CallRecord {
            tenant_id: keys.tenant_id.to_string(),
            call_sid: keys.call_sid.to_string(),
            caller_number: snapshot.caller_number.clone(),
            callee_label: snapshot
                .business_name
                .clone()
                .unwrap_or_else(|| DEFAULT_CALLEE_LABEL.to_string()),
            outcome: analysis.outcome,
            duration_seconds,
            summary: analysis.summary.clone(),
            created_at: snapshot.started_at,
        };
        self.store.upsert_call(&record).await?;

        let lead_written = if analysis.warrants_lead() {
            let lead = lead_record(keys, snapshot, &analysis, now);
            self.store.upsert_lead(&lead).await?;
            true
        } else {
            false
        };

        tracing::info!(
            session_id = %snapshot.session_id,
            call_sid = %keys.call_sid,
            outcome = analysis.outcome.as_str(),
            duration_seconds,
            lead_written,
            "Call finalized"
        );
        Ok((analysis, lead_written))
    }
}

/// Identity shared by the call row and its lead.
#[derive(Clone, Copy)]
struct RowKeys<'a> {
    tenant_id: &'a str,
    call_sid: &'a str,
}

fn lead_record(
    keys: RowKeys<'_>,
    snapshot: &CallSnapshot,
    analysis: &CallAnalysis,
    now: DateTime<Utc>,
) -> LeadRecord {
    let mut notes = analysis.summary.clone();
    if let Some(service) = analysis.requested_service.as_deref() {
        notes.push_str(&format!("\nRequested service: {service}"));
    }
    if analysis.appointment_booked {
        notes.push_str("\nAppointment booked during call.");
    }
    LeadRecord {
        tenant_id: keys.tenant_id.to_string(),
        call_sid: keys.call_sid.to_string(),
        name: analysis
            .caller_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Unknown caller".to_string()),
        phone: snapshot.caller_number.clone(),
        source: "phone_call".to_string(),
        status: "new".to_string(),
        notes,
        created_at: now,
    }
}

// ── Tests ────────────────────────────────────────────────────────
