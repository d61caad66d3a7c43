use crate::error::{ExtractionError, ModelError, StoreError};
use crate::models::{CollectionSpec, ScoredRecord, VectorRecord};
use async_trait::async_trait;
use serde::Deserialize;

/// Raw output of a layout/read analysis, one entry per physical page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzedDocument {
    #[serde(default)]
    pub pages: Vec<AnalyzedPage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedPage {
    pub page_number: u32,
    #[serde(default)]
    pub words: Vec<AnalyzedWord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzedWord {
    pub content: String,
}

#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, document: &[u8]) -> Result<AnalyzedDocument, ExtractionError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Runs one system+user exchange constrained to a JSON object reply and
    /// returns the raw reply text.
    async fn complete_json(&self, system: &str, user: &str) -> Result<String, ModelError>;
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError>;

    async fn collection_ready(&self, name: &str) -> Result<bool, StoreError>;

    async fn upsert(&self, name: &str, records: &[VectorRecord]) -> Result<(), StoreError>;

    async fn vector_count(&self, name: &str) -> Result<u64, StoreError>;

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>, StoreError>;

    async fn fetch(&self, name: &str, ids: &[String]) -> Result<Vec<VectorRecord>, StoreError>;
}
