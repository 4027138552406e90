//! HTTP client for the knowledge search service.
//!
//! `POST {url}` with `{tenant_id, query, match_count, match_threshold}`.
//! The response is `{"results": [...]}` or a bare array of results.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{KnowledgeQuery, KnowledgeSearch, SearchResult};
use crate::config::KnowledgeConfig;

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { results: Vec<SearchResult> },
    Bare(Vec<SearchResult>),
}

impl SearchResponse {
    fn into_results(self) -> Vec<SearchResult> {
        match self {
            Self::Wrapped { results } | Self::Bare(results) => results,
        }
    }
}

/// Knowledge search over HTTP.
pub struct KnowledgeClient {
    url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl KnowledgeClient {
    /// `None` when no endpoint is configured.
    pub fn from_config(config: &KnowledgeConfig) -> anyhow::Result<Option<Self>> {
        let Some(url) = config.url.clone().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self {
            url,
            api_key: config.api_key.clone(),
            http,
        }))
    }
}

#[async_trait]
impl KnowledgeSearch for KnowledgeClient {
    async fn search(&self, query: &KnowledgeQuery) -> anyhow::Result<Vec<SearchResult>> {
        let mut request = self.http.post(&self.url).json(query);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Knowledge search failed ({status}): {body}");
        }

        let mut results = resp.json::<SearchResponse>().await?.into_results();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(query.match_count as usize);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query() -> KnowledgeQuery {
        KnowledgeQuery {
            tenant_id: "tenant-a".into(),
            query: "hours".into(),
            match_count: 2,
            match_threshold: 0.5,
        }
    }

    fn client(uri: &str) -> KnowledgeClient {
        let config = KnowledgeConfig {
            url: Some(format!("{uri}/search")),
            api_key: Some("kb-key".into()),
            ..KnowledgeConfig::default()
        };
        KnowledgeClient::from_config(&config).unwrap().unwrap()
    }

    #[test]
    fn unconfigured_endpoint_yields_no_client() {
        assert!(KnowledgeClient::from_config(&KnowledgeConfig::default())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn search_posts_query_and_ranks_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("Authorization", "Bearer kb-key"))
            .and(body_json(serde_json::json!({
                "tenant_id": "tenant-a",
                "query": "hours",
                "match_count": 2,
                "match_threshold": 0.5
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"content": "Closed Sundays.", "score": 0.61},
                    {"content": "Open 9am-5pm weekdays.", "score": 0.93, "source": "faq"},
                    {"content": "Saturday 10-2.", "score": 0.77}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let results = client(&server.uri()).search(&query()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "Open 9am-5pm weekdays.");
        assert_eq!(results[0].source.as_deref(), Some("faq"));
        assert_eq!(results[1].content, "Saturday 10-2.");
    }

    #[tokio::test]
    async fn bare_array_response_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{"content": "Free parking.", "similarity": 0.8}])),
            )
            .mount(&server)
            .await;

        let results = client(&server.uri()).search(&query()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 0.8);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server.uri()).search(&query()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
