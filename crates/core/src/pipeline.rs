use crate::error::{PipelineError, ValidationError};
use crate::extractor::DocumentExtractor;
use crate::models::TroubleshootingAnswer;
use crate::search::RetrievalAugmentedSearch;
use crate::vector_store::VectorStore;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Checks the uploaded file name; only a lowercase `.pdf` suffix is accepted.
pub fn validate_file_name(file_name: &str) -> Result<(), ValidationError> {
    if file_name.is_empty() {
        return Err(ValidationError::EmptyFileName);
    }

    if !file_name.ends_with(".pdf") {
        return Err(ValidationError::UnsupportedFileType);
    }
    Ok(())
}

pub fn document_digest(document: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document);
    format!("{:x}", hasher.finalize())
}

pub struct IngestPipeline {
    extractor: DocumentExtractor,
    store: VectorStore,
    search: RetrievalAugmentedSearch,
    // The collection is shared process-wide, so reset..search must not interleave.
    ingest_lock: Mutex<()>,
}

impl IngestPipeline {
    pub fn new(
        extractor: DocumentExtractor,
        store: VectorStore,
        search: RetrievalAugmentedSearch,
    ) -> Self {
        Self {
            extractor,
            store,
            search,
            ingest_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub async fn ingest(&self, document: &[u8]) -> Result<TroubleshootingAnswer, PipelineError> {
        let ingest_id = Uuid::new_v4();
        let span = info_span!("ingest", %ingest_id);

        async move {
            let _guard = self.ingest_lock.lock().await;
            info!(
                bytes = document.len(),
                sha256 = %document_digest(document),
                "ingest started"
            );

            self.store.reset_collection().await?;

            let pages = self.extractor.extract(document).await?;
            info!(page_count = pages.len(), "data extracted");

            let report = self.store.insert(&pages).await?;
            info!(
                upserted = report.upserted,
                skipped_blank = report.skipped_blank,
                consistent = report.consistent,
                "pages indexed"
            );

            let answer = self.search.find_troubleshooting_page(&self.store).await?;
            info!(
                page = answer.page_number().unwrap_or("none"),
                "troubleshooting lookup finished"
            );
            Ok::<_, PipelineError>(answer)
        }
        .instrument(span)
        .await
    }
}
