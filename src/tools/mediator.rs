//! Tool-call ledger and dispatch.
//!
//! Per call: *received* → *dispatched* → *resolved*. The ledger lives inside
//! the session controller; dispatch runs off the relay path and always
//! produces exactly one [`ToolOutput`], success or not. Failed calls are
//! never retried.

use std::collections::HashMap;
use std::sync::Arc;

use super::{KnowledgeQuery, KnowledgeSearch, SearchKnowledgeArgs, ToolCall, SEARCH_KNOWLEDGE};
use crate::config::KnowledgeConfig;

// ── Ledger ───────────────────────────────────────────────────────

/// A call id that was already accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tool call `{0}` was already accepted")]
pub struct DuplicateCall(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Dispatched,
    Resolved,
}

/// Tracks every call id seen in one session.
#[derive(Debug, Default)]
pub struct ToolLedger {
    calls: HashMap<String, CallState>,
}

impl ToolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a call for dispatch. A repeated id is rejected.
    pub fn accept(&mut self, call: &ToolCall) -> Result<(), DuplicateCall> {
        if self.calls.contains_key(&call.call_id) {
            return Err(DuplicateCall(call.call_id.clone()));
        }
        self.calls.insert(call.call_id.clone(), CallState::Dispatched);
        Ok(())
    }

    /// Mark a dispatched call answered. `true` exactly once per accepted id.
    pub fn resolve(&mut self, call_id: &str) -> bool {
        match self.calls.get_mut(call_id) {
            Some(state) if *state == CallState::Dispatched => {
                *state = CallState::Resolved;
                true
            }
            _ => false,
        }
    }

    /// Dispatched and not yet answered.
    pub fn is_pending(&self, call_id: &str) -> bool {
        self.calls.get(call_id) == Some(&CallState::Dispatched)
    }
}

// ── Dispatch ─────────────────────────────────────────────────────

/// Reply to one tool call, ready for `function_call_output`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub call_id: String,
    /// JSON text handed back to the engine.
    pub output: String,
}

impl ToolOutput {
    fn results(call_id: &str, results: &[super::SearchResult]) -> Self {
        Self {
            call_id: call_id.to_string(),
            output: serde_json::json!({ "results": results }).to_string(),
        }
    }

    fn empty(call_id: &str) -> Self {
        Self::results(call_id, &[])
    }

    fn error(call_id: &str, message: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            output: serde_json::json!({ "error": message }).to_string(),
        }
    }
}

/// Executes tool calls. Shared by all sessions; holds no per-call state.
pub struct ToolMediator {
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
    match_count: u32,
    match_threshold: f64,
}

impl ToolMediator {
    pub fn new(knowledge: Option<Arc<dyn KnowledgeSearch>>, config: &KnowledgeConfig) -> Self {
        Self {
            knowledge,
            match_count: config.match_count,
            match_threshold: config.match_threshold,
        }
    }

    /// Run one call. Never fails: problems become an empty result list (or
    /// an error payload for unknown tools) and are logged.
    pub async fn dispatch(&self, call: &ToolCall, tenant_id: Option<&str>) -> ToolOutput {
        if call.name != SEARCH_KNOWLEDGE {
            tracing::warn!(call_id = %call.call_id, tool = %call.name, "Unknown tool requested");
            return ToolOutput::error(&call.call_id, &format!("unknown tool: {}", call.name));
        }

        let args: SearchKnowledgeArgs = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(call_id = %call.call_id, error = %e, "Malformed search_knowledge arguments");
                return ToolOutput::empty(&call.call_id);
            }
        };
        let query = args.query.trim();
        if query.is_empty() {
            return ToolOutput::empty(&call.call_id);
        }

        let Some(tenant_id) = tenant_id else {
            tracing::warn!(call_id = %call.call_id, "Knowledge search without a resolved tenant");
            return ToolOutput::empty(&call.call_id);
        };
        let Some(knowledge) = &self.knowledge else {
            tracing::debug!(call_id = %call.call_id, "No knowledge service configured");
            return ToolOutput::empty(&call.call_id);
        };

        let request = KnowledgeQuery {
            tenant_id: tenant_id.to_string(),
            query: query.to_string(),
            match_count: self.match_count,
            match_threshold: self.match_threshold,
        };
        match knowledge.search(&request).await {
            Ok(results) => {
                tracing::info!(
                    call_id = %call.call_id,
                    tenant_id = %tenant_id,
                    results = results.len(),
                    "Knowledge search completed"
                );
                ToolOutput::results(&call.call_id, &results)
            }
            Err(e) => {
                tracing::warn!(
                    call_id = %call.call_id,
                    tenant_id = %tenant_id,
                    error = %e,
                    "Knowledge search failed, replying with no results"
                );
                ToolOutput::empty(&call.call_id)
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::SearchResult;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeKnowledge {
        fail: bool,
        seen: Mutex<Vec<KnowledgeQuery>>,
    }

    impl FakeKnowledge {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl KnowledgeSearch for FakeKnowledge {
        async fn search(&self, query: &KnowledgeQuery) -> anyhow::Result<Vec<SearchResult>> {
            self.seen.lock().unwrap().push(query.clone());
            if self.fail {
                anyhow::bail!("503 Service Unavailable");
            }
            Ok(vec![SearchResult {
                content: "We are open 9am to 5pm.".into(),
                score: 0.92,
                source: None,
            }])
        }
    }

    fn call(name: &str, id: &str, args: &str) -> ToolCall {
        ToolCall {
            name: name.into(),
            call_id: id.into(),
            arguments: args.into(),
        }
    }

    fn output_json(out: &ToolOutput) -> serde_json::Value {
        serde_json::from_str(&out.output).unwrap()
    }

    #[test]
    fn ledger_rejects_duplicates_and_resolves_once() {
        let mut ledger = ToolLedger::new();
        let c = call(SEARCH_KNOWLEDGE, "call_1", "{}");

        assert!(ledger.accept(&c).is_ok());
        assert_eq!(ledger.accept(&c), Err(DuplicateCall("call_1".into())));
        assert!(ledger.is_pending("call_1"));

        assert!(ledger.resolve("call_1"));
        assert!(!ledger.resolve("call_1"));
        assert!(!ledger.is_pending("call_1"));

        // Still a duplicate after resolution.
        assert!(ledger.accept(&c).is_err());
    }

    #[test]
    fn ledger_ignores_unknown_ids() {
        let mut ledger = ToolLedger::new();
        assert!(!ledger.is_pending("never-seen"));
        assert!(!ledger.resolve("never-seen"));
    }

    #[tokio::test]
    async fn search_passes_tenant_and_limits() {
        let fake = FakeKnowledge::new(false);
        let config = KnowledgeConfig {
            match_count: 3,
            match_threshold: 0.7,
            ..KnowledgeConfig::default()
        };
        let mediator = ToolMediator::new(Some(fake.clone()), &config);

        let out = mediator
            .dispatch(
                &call(SEARCH_KNOWLEDGE, "call_1", r#"{"query":"hours"}"#),
                Some("tenant-a"),
            )
            .await;

        assert_eq!(out.call_id, "call_1");
        let json = output_json(&out);
        assert_eq!(json["results"][0]["content"], "We are open 9am to 5pm.");

        let seen = fake.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            KnowledgeQuery {
                tenant_id: "tenant-a".into(),
                query: "hours".into(),
                match_count: 3,
                match_threshold: 0.7,
            }
        );
    }

    #[tokio::test]
    async fn failure_degrades_to_empty_results() {
        let mediator = ToolMediator::new(Some(FakeKnowledge::new(true)), &KnowledgeConfig::default());
        let out = mediator
            .dispatch(
                &call(SEARCH_KNOWLEDGE, "call_2", r#"{"query":"prices"}"#),
                Some("tenant-a"),
            )
            .await;
        assert_eq!(output_json(&out), serde_json::json!({"results": []}));
    }

    #[tokio::test]
    async fn malformed_arguments_degrade_to_empty_results() {
        let fake = FakeKnowledge::new(false);
        let mediator = ToolMediator::new(Some(fake.clone()), &KnowledgeConfig::default());
        let out = mediator
            .dispatch(&call(SEARCH_KNOWLEDGE, "call_3", "{not json"), Some("t"))
            .await;
        assert_eq!(output_json(&out), serde_json::json!({"results": []}));
        assert!(fake.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_tenant_or_service_gives_empty_results() {
        let fake = FakeKnowledge::new(false);
        let mediator = ToolMediator::new(Some(fake.clone()), &KnowledgeConfig::default());
        let out = mediator
            .dispatch(&call(SEARCH_KNOWLEDGE, "c", r#"{"query":"hours"}"#), None)
            .await;
        assert_eq!(output_json(&out)["results"], serde_json::json!([]));
        assert!(fake.seen.lock().unwrap().is_empty());

        let unconfigured = ToolMediator::new(None, &KnowledgeConfig::default());
        let out = unconfigured
            .dispatch(&call(SEARCH_KNOWLEDGE, "c", r#"{"query":"hours"}"#), Some("t"))
            .await;
        assert_eq!(output_json(&out)["results"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn unknown_tool_gets_error_payload() {
        let mediator = ToolMediator::new(None, &KnowledgeConfig::default());
        let out = mediator
            .dispatch(&call("transfer_call", "call_4", "{}"), Some("t"))
            .await;
        assert_eq!(out.call_id, "call_4");
        assert!(output_json(&out)["error"]
            .as_str()
            .unwrap()
            .contains("transfer_call"));
    }
}
