//! Mutable per-call state. Owned by the controller task only.

use chrono::{DateTime, Utc};

use crate::agent::ConfigSource;
use crate::finalizer::CallSnapshot;
use crate::voice::carrier::StartMetadata;
use tokio::time::Instant;

/// Non-fatal conditions worth surfacing in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionWarning {
    /// The engine was configured with the default template while the tenant
    /// lookup was still pending.
    DefaultConfig,
    /// No stored agent config for this call; the default receptionist
    /// template answered instead of a tenant-specific agent.
    DomainMismatch,
}

#[derive(Debug)]
pub struct BridgeSession {
    pub session_id: String,
    /// Resolved lazily; see [`crate::agent::resolve_tenant`].
    pub tenant_id: Option<String>,
    pub call_sid: Option<String>,
    pub stream_sid: Option<String>,
    pub caller_number: Option<String>,
    pub business_name: Option<String>,
    pub config_source: Option<ConfigSource>,
    pub started_at: DateTime<Utc>,
    /// Monotonic start, on the runtime clock.
    pub started: Instant,
    closed: bool,
    /// Media frames sent to the carrier.
    pub outbound_seq: u64,
    pub inbound_frames: u64,
    pub dropped_frames: u64,
    warnings: Vec<SessionWarning>,
}

impl BridgeSession {
    pub fn new(tenant_hint: Option<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_hint,
            call_sid: None,
            stream_sid: None,
            caller_number: None,
            business_name: None,
            config_source: None,
            started_at: Utc::now(),
            started: Instant::now(),
            closed: false,
            outbound_seq: 0,
            inbound_frames: 0,
            dropped_frames: 0,
            warnings: Vec::new(),
        }
    }

    /// Take the call identifiers from the carrier `start` event.
    pub fn apply_start(&mut self, start: &StartMetadata, tenant_id: Option<String>) {
        self.call_sid = Some(start.call_sid.clone()).filter(|s| !s.is_empty());
        self.stream_sid = Some(start.stream_sid.clone()).filter(|s| !s.is_empty());
        self.caller_number = start.caller_number();
        self.tenant_id = tenant_id;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flip the closed flag. `true` only for the first call.
    pub fn mark_closed(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    pub fn warn(&mut self, warning: SessionWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn warnings(&self) -> &[SessionWarning] {
        &self.warnings
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            session_id: self.session_id.clone(),
            tenant_id: self.tenant_id.clone(),
            call_sid: self.call_sid.clone(),
            caller_number: self.caller_number.clone(),
            business_name: self.business_name.clone(),
            started_at: self.started_at,
            started: self.started.into_std(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_flag_flips_once() {
        let mut session = BridgeSession::new(None);
        assert!(!session.is_closed());
        assert!(session.mark_closed());
        assert!(!session.mark_closed());
        assert!(session.is_closed());
    }

    #[test]
    fn start_fills_identifiers() {
        let start: StartMetadata = serde_json::from_value(serde_json::json!({
            "streamSid": "MZ1",
            "callSid": "CA1",
            "customParameters": { "from": "+15550001111" }
        }))
        .unwrap();
        let mut session = BridgeSession::new(Some("hint".into()));
        session.apply_start(&start, Some("tenant-b".into()));

        assert_eq!(session.stream_sid.as_deref(), Some("MZ1"));
        assert_eq!(session.call_sid.as_deref(), Some("CA1"));
        assert_eq!(session.caller_number.as_deref(), Some("+15550001111"));
        assert_eq!(session.tenant_id.as_deref(), Some("tenant-b"));
    }

    #[test]
    fn missing_call_sid_stays_unset_in_snapshot() {
        let start: StartMetadata =
            serde_json::from_value(serde_json::json!({ "streamSid": "MZ1", "callSid": "" }))
                .unwrap();
        let mut session = BridgeSession::new(None);
        session.apply_start(&start, Some("tenant-a".into()));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.call_sid, None);
        assert_eq!(snapshot.tenant_id.as_deref(), Some("tenant-a"));
    }

    #[test]
    fn warnings_are_deduplicated() {
        let mut session = BridgeSession::new(None);
        session.warn(SessionWarning::DomainMismatch);
        session.warn(SessionWarning::DomainMismatch);
        assert_eq!(session.warnings(), &[SessionWarning::DomainMismatch]);
    }
}
