//! Engine function calls and the knowledge search they reach.
//!
//! The engine declares one built-in tool, [`SEARCH_KNOWLEDGE`]. Every call
//! goes through the [`mediator`] ledger so it is dispatched once and
//! answered once.

pub mod knowledge;
pub mod mediator;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent::ToolDefinition;

pub use knowledge::KnowledgeClient;
pub use mediator::{DuplicateCall, ToolLedger, ToolMediator, ToolOutput};

/// Name of the knowledge-base lookup tool.
pub const SEARCH_KNOWLEDGE: &str = "search_knowledge";

/// Arguments of `search_knowledge`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchKnowledgeArgs {
    /// The caller's question, in natural language.
    pub query: String,
}

/// Declaration of `search_knowledge` for the engine.
pub fn search_knowledge_definition() -> ToolDefinition {
    let mut parameters = schemars::schema_for!(SearchKnowledgeArgs).to_value();
    if let Some(obj) = parameters.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    ToolDefinition {
        name: SEARCH_KNOWLEDGE.to_string(),
        description: "Search the business knowledge base (hours, services, prices, policies, location). Call this before answering any factual question.".to_string(),
        parameters,
    }
}

/// A function call requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    /// Raw JSON arguments as sent by the engine.
    pub arguments: String,
}

/// One ranked knowledge snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    #[serde(default, alias = "similarity")]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A knowledge search request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeQuery {
    pub tenant_id: String,
    pub query: String,
    pub match_count: u32,
    pub match_threshold: f64,
}

/// Knowledge-base backend.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(&self, query: &KnowledgeQuery) -> anyhow::Result<Vec<SearchResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_definition_has_query_schema() {
        let def = search_knowledge_definition();
        assert_eq!(def.name, "search_knowledge");
        assert_eq!(def.parameters["type"], "object");
        assert_eq!(def.parameters["properties"]["query"]["type"], "string");
        assert_eq!(def.parameters["required"][0], "query");
        assert!(def.parameters.get("$schema").is_none());
        assert!(def.parameters.get("title").is_none());
    }

    #[test]
    fn search_result_accepts_similarity_alias() {
        let r: SearchResult =
            serde_json::from_str(r#"{"content": "Open 9-5", "similarity": 0.91}"#).unwrap();
        assert_eq!(r.score, 0.91);
        assert!(r.source.is_none());
        assert!(!serde_json::to_string(&r).unwrap().contains("source"));
    }
}
