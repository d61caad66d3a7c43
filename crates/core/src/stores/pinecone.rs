use crate::error::StoreError;
use crate::models::{CollectionSpec, PageMetadata, ScoredRecord, VectorRecord};
use crate::traits::VectorBackend;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";

const API_VERSION: &str = "2024-07";
const BACKEND: &str = "pinecone";

/// Serverless index client. Control-plane calls go to `control_url`; data-plane
/// calls go to the per-index host reported by `describe`, cached once ready.
pub struct PineconeBackend {
    client: Client,
    control_url: String,
    api_key: String,
    hosts: RwLock<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexSummary>,
}

#[derive(Debug, Deserialize)]
struct IndexSummary {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    #[serde(default)]
    host: Option<String>,
    status: IndexStatus,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexStats {
    #[serde(rename = "totalVectorCount", default)]
    total_vector_count: u64,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedVector>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    id: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

impl PineconeBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            control_url: DEFAULT_CONTROL_URL.to_string(),
            api_key: api_key.into(),
            hosts: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_control_url(mut self, control_url: impl Into<String>) -> Self {
        self.control_url = control_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn checked(response: Response) -> Result<Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(%status, body = %body, "pinecone request rejected");
        Err(StoreError::BackendResponse {
            backend: BACKEND.to_string(),
            status: status.as_u16(),
        })
    }

    async fn describe(&self, name: &str) -> Result<Option<IndexDescription>, StoreError> {
        let response = self
            .request(Method::GET, format!("{}/indexes/{}", self.control_url, name))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::checked(response).await?;
        Ok(Some(response.json().await?))
    }

    async fn data_url(&self, name: &str, route: &str) -> Result<String, StoreError> {
        if let Some(host) = self.hosts.read().await.get(name) {
            return Ok(format!("{host}/{route}"));
        }

        let host = self
            .describe(name)
            .await?
            .and_then(|description| description.host)
            .map(|host| normalize_host(&host))
            .ok_or_else(|| StoreError::Unavailable(format!("index {name} has no data host")))?;

        self.hosts
            .write()
            .await
            .insert(name.to_string(), host.clone());
        Ok(format!("{host}/{route}"))
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[async_trait]
impl VectorBackend for PineconeBackend {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let response = self
            .request(Method::GET, format!("{}/indexes", self.control_url))
            .send()
            .await?;
        let listed: IndexList = Self::checked(response).await?.json().await?;
        Ok(listed.indexes.iter().any(|index| index.name == name))
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.hosts.write().await.remove(name);

        let response = self
            .request(Method::DELETE, format!("{}/indexes/{}", self.control_url, name))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::checked(response).await?;
        Ok(())
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let response = self
            .request(Method::POST, format!("{}/indexes", self.control_url))
            .json(&json!({
                "name": spec.name,
                "dimension": spec.dimension,
                "metric": spec.metric.as_str(),
                "spec": {
                    "serverless": {
                        "cloud": spec.serverless.cloud,
                        "region": spec.serverless.region,
                    }
                }
            }))
            .send()
            .await?;

        // A previous index with the same name may still be terminating.
        if response.status() == StatusCode::CONFLICT {
            return Err(StoreError::Unavailable(format!(
                "index {} still exists",
                spec.name
            )));
        }

        Self::checked(response).await?;
        Ok(())
    }

    async fn collection_ready(&self, name: &str) -> Result<bool, StoreError> {
        let description = match self.describe(name).await? {
            Some(description) => description,
            None => return Ok(false),
        };

        debug!(
            index = name,
            state = description.status.state.as_deref().unwrap_or("unknown"),
            "index status"
        );

        match (description.status.ready, description.host) {
            (true, Some(host)) => {
                self.hosts
                    .write()
                    .await
                    .insert(name.to_string(), normalize_host(&host));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert(&self, name: &str, records: &[VectorRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let vectors: Vec<_> = records
            .iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "values": record.embedding,
                    "metadata": record.metadata,
                })
            })
            .collect();

        let url = self.data_url(name, "vectors/upsert").await?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({ "vectors": vectors }))
            .send()
            .await?;

        Self::checked(response).await?;
        Ok(())
    }

    async fn vector_count(&self, name: &str) -> Result<u64, StoreError> {
        let url = self.data_url(name, "describe_index_stats").await?;
        let response = self.request(Method::POST, url).json(&json!({})).send().await?;
        let stats: IndexStats = Self::checked(response).await?.json().await?;
        Ok(stats.total_vector_count)
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        let url = self.data_url(name, "query").await?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({
                "vector": vector,
                "topK": top_k,
                "includeMetadata": true,
                "includeValues": false,
            }))
            .send()
            .await?;

        let parsed: QueryResponse = Self::checked(response).await?.json().await?;
        Ok(parsed
            .matches
            .into_iter()
            .map(|hit| ScoredRecord {
                id: hit.id,
                score: hit.score,
                metadata: hit.metadata,
            })
            .collect())
    }

    async fn fetch(&self, name: &str, ids: &[String]) -> Result<Vec<VectorRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.data_url(name, "vectors/fetch").await?;
        let query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        let response = self.request(Method::GET, url).query(&query).send().await?;
        let mut parsed: FetchResponse = Self::checked(response).await?.json().await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(vector) = parsed.vectors.remove(id) else {
                continue;
            };
            let metadata = vector.metadata.ok_or_else(|| {
                StoreError::Request(format!("vector {} has no page metadata", vector.id))
            })?;
            records.push(VectorRecord {
                id: vector.id,
                embedding: vector.values,
                metadata,
            });
        }
        Ok(records)
    }
}
