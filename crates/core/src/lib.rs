pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod search;
pub mod stores;
pub mod traits;
pub mod vector_store;

pub use embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ExtractionError, ModelError, PipelineError, StoreError, ValidationError};
pub use extractor::{pages_from_analysis, DocumentExtractor};
pub use models::{
    page_label, CollectionSpec, Metric, PageMetadata, PageRecord, ScoredRecord, ServerlessSpec,
    TroubleshootingAnswer, VectorRecord,
};
pub use pipeline::{document_digest, validate_file_name, IngestPipeline};
pub use providers::{
    AnalysisPollPolicy, AzureCredentials, AzureReadClient, OpenAiChatModel, OpenAiClient,
    OpenAiEmbedder,
};
pub use search::{
    parse_answer, RetrievalAugmentedSearch, DEFAULT_TOP_K, NOT_FOUND_OUTPUT, TROUBLESHOOTING_QUERY,
};
pub use stores::{MemoryBackend, PineconeBackend};
pub use traits::{
    AnalyzedDocument, AnalyzedPage, AnalyzedWord, ChatModel, DocumentAnalyzer, Embedder,
    VectorBackend,
};
pub use vector_store::{InsertReport, StorePolicy, VectorStore};
