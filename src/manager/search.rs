//! Similarity search backends.
//!
//! Both clients speak the `_search` HTTP API of their respective engines and
//! rely on server-side semantic search, so no embedding computation happens
//! in the gateway. Scores are returned raw; thresholds are applied by the
//! similarity pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::SearchEndpoint;
use crate::manager::{Backend, BackendError};

/// Number of nearest neighbours requested per query.
const SEARCH_SIZE: usize = 5;

/// One document similar to the input text.
#[derive(Debug, Clone)]
pub struct SimilarityHit {
    /// Similarity score as reported by the engine.
    pub score: f64,
    /// Category label of the stored document.
    pub category: String,
    /// Stored document text.
    pub content: String,
}

/// Capability surface of a similarity search backend.
#[async_trait]
pub trait SearchBackend: Backend {
    /// Find documents similar to `text`, most similar first.
    async fn search(&self, text: &str) -> Result<Vec<SimilarityHit>, BackendError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: HitsEnvelope,
}

#[derive(Debug, Default, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_score")]
    score: f64,
    #[serde(rename = "_source")]
    source: HitSource,
}

#[derive(Debug, Default, Deserialize)]
struct HitSource {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl Hit {
    fn into_similarity_hit(self) -> SimilarityHit {
        SimilarityHit {
            score: self.score,
            category: self
                .source
                .category
                .unwrap_or_else(|| "uncategorized".to_string()),
            content: self.source.text.unwrap_or_default(),
        }
    }
}

/// Shared HTTP plumbing for both engines.
struct SearchHttp {
    client: Client,
    url: String,
    index: String,
    auth: Option<(String, String)>,
}

impl SearchHttp {
    fn new(endpoint: &SearchEndpoint, index: String) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        let auth = match (&endpoint.user, &endpoint.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            url: endpoint.url.trim_end_matches('/').to_string(),
            index,
            auth,
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, BackendError> {
        let mut req = self.client.get(format!("{}{}", self.url, path));
        if let Some((user, password)) = &self.auth {
            req = req.basic_auth(user, Some(password));
        }
        req.send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))
    }

    async fn search(&self, body: serde_json::Value) -> Result<Vec<SimilarityHit>, BackendError> {
        let mut req = self
            .client
            .post(format!("{}/{}/_search", self.url, self.index))
            .json(&body);
        if let Some((user, password)) = &self.auth {
            req = req.basic_auth(user, Some(password));
        }

        let response = req
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Response(format!(
                "search returned {}: {}",
                status, body
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Response(e.to_string()))?;

        Ok(parsed
            .hits
            .hits
            .into_iter()
            .map(Hit::into_similarity_hit)
            .collect())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let response = self.get("/").await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Response(format!(
                "ping returned {}",
                response.status()
            )))
        }
    }
}

/// OpenSearch client using server-side neural search.
pub struct OpenSearchBackend {
    http: SearchHttp,
}

impl OpenSearchBackend {
    pub fn new(endpoint: &SearchEndpoint, index: String) -> Result<Arc<Self>, BackendError> {
        Ok(Arc::new(Self {
            http: SearchHttp::new(endpoint, index)?,
        }))
    }
}

#[async_trait]
impl Backend for OpenSearchBackend {
    fn identifier(&self) -> &str {
        "opensearch"
    }

    fn display_name(&self) -> &str {
        "OpenSearch"
    }

    fn description(&self) -> &str {
        "OpenSearch neural search client for similar-prompt lookup"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.http.ping().await
    }
}

#[async_trait]
impl SearchBackend for OpenSearchBackend {
    async fn search(&self, text: &str) -> Result<Vec<SimilarityHit>, BackendError> {
        let body = json!({
            "size": SEARCH_SIZE,
            "query": {
                "neural": {
                    "embedding": {
                        "query_text": text,
                        "k": SEARCH_SIZE,
                    }
                }
            }
        });
        self.http.search(body).await
    }
}

/// Elasticsearch client using server-side semantic search.
pub struct ElasticsearchBackend {
    http: SearchHttp,
}

impl ElasticsearchBackend {
    pub fn new(endpoint: &SearchEndpoint, index: String) -> Result<Arc<Self>, BackendError> {
        Ok(Arc::new(Self {
            http: SearchHttp::new(endpoint, index)?,
        }))
    }
}

#[async_trait]
impl Backend for ElasticsearchBackend {
    fn identifier(&self) -> &str {
        "elasticsearch"
    }

    fn display_name(&self) -> &str {
        "Elasticsearch"
    }

    fn description(&self) -> &str {
        "Elasticsearch semantic search client for similar-prompt lookup"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.http.ping().await
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn search(&self, text: &str) -> Result<Vec<SimilarityHit>, BackendError> {
        let body = json!({
            "size": SEARCH_SIZE,
            "query": {
                "semantic": {
                    "field": "embedding",
                    "query": text,
                }
            }
        });
        self.http.search(body).await
    }
}
