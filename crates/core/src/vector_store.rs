use crate::error::{PipelineError, StoreError};
use crate::models::{CollectionSpec, PageRecord, ScoredRecord, VectorRecord};
use crate::traits::{Embedder, VectorBackend};
use futures::future::FutureExt;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timing and fan-out limits for collection lifecycle and inserts.
#[derive(Debug, Clone, Copy)]
pub struct StorePolicy {
    pub ready_interval: Duration,
    pub ready_timeout: Duration,
    pub delete_settle: Duration,
    pub count_interval: Duration,
    pub count_timeout: Duration,
    pub embedding_concurrency: usize,
    pub upsert_batch_size: usize,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            ready_interval: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(60),
            delete_settle: Duration::from_secs(2),
            count_interval: Duration::from_secs(2),
            count_timeout: Duration::from_secs(30),
            embedding_concurrency: 4,
            upsert_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertReport {
    pub upserted: usize,
    pub skipped_blank: usize,
    /// False when the reported vector count had not caught up before the deadline.
    pub consistent: bool,
}

/// Single named collection, recreated empty on every ingest.
pub struct VectorStore {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    spec: CollectionSpec,
    policy: StorePolicy,
}

impl VectorStore {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        spec: CollectionSpec,
        policy: StorePolicy,
    ) -> Self {
        Self {
            backend,
            embedder,
            spec,
            policy,
        }
    }

    pub async fn reset_collection(&self) -> Result<(), StoreError> {
        let name = &self.spec.name;

        if self.backend.collection_exists(name).await? {
            info!(collection = %name, "deleting existing collection");
            self.backend.delete_collection(name).await?;
            if !self.policy.delete_settle.is_zero() {
                tokio::time::sleep(self.policy.delete_settle).await;
            }
        }

        info!(
            collection = %name,
            dimension = self.spec.dimension,
            metric = %self.spec.metric,
            "creating collection"
        );
        let started = Instant::now();
        self.create_within_deadline(started).await?;
        self.wait_until_ready(started).await
    }

    /// Retries create while the backend reports the old collection is still going away.
    async fn create_within_deadline(&self, started: Instant) -> Result<(), StoreError> {
        loop {
            match self.backend.create_collection(&self.spec).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Unavailable(reason))
                    if started.elapsed() < self.policy.ready_timeout =>
                {
                    debug!(collection = %self.spec.name, %reason, "create deferred");
                    tokio::time::sleep(self.policy.ready_interval).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn wait_until_ready(&self, started: Instant) -> Result<(), StoreError> {
        loop {
            if self.backend.collection_ready(&self.spec.name).await? {
                info!(collection = %self.spec.name, "collection ready");
                return Ok(());
            }

            if started.elapsed() >= self.policy.ready_timeout {
                return Err(StoreError::Unavailable(format!(
                    "collection {} not ready after {:?}",
                    self.spec.name, self.policy.ready_timeout
                )));
            }

            debug!(collection = %self.spec.name, "waiting for collection to be ready");
            tokio::time::sleep(self.policy.ready_interval).await;
        }
    }

    pub async fn insert(&self, pages: &[PageRecord]) -> Result<InsertReport, PipelineError> {
        let (blank, pages): (Vec<&PageRecord>, Vec<&PageRecord>) = pages
            .iter()
            .partition(|page| page.content.trim().is_empty());

        for page in &blank {
            debug!(page = %page.page_number, "skipping page without text");
        }

        let embedder = &self.embedder;
        let embeddings: Vec<Vec<f32>> = stream::iter(pages.iter())
            .map(|page| async move { embedder.embed(&page.content).await })
            .buffered(self.policy.embedding_concurrency.max(1))
            .try_collect::<Vec<Vec<f32>>>()
            .boxed()
            .await?;

        let mut records = Vec::with_capacity(pages.len());
        for (page, embedding) in pages.iter().zip(embeddings) {
            if embedding.len() != self.spec.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: self.spec.dimension,
                    actual: embedding.len(),
                }
                .into());
            }
            records.push(VectorRecord::from_page(page, embedding));
        }

        for batch in records.chunks(self.policy.upsert_batch_size.max(1)) {
            self.backend.upsert(&self.spec.name, batch).await?;
        }
        info!(upserted = records.len(), "pages upserted");

        let consistent = self.wait_for_count(records.len() as u64).await?;
        if consistent {
            info!(expected = records.len(), "collection reflects upserted pages");
        } else {
            warn!(
                expected = records.len(),
                timeout = ?self.policy.count_timeout,
                "collection update timeout reached"
            );
        }

        Ok(InsertReport {
            upserted: records.len(),
            skipped_blank: blank.len(),
            consistent,
        })
    }

    async fn wait_for_count(&self, expected: u64) -> Result<bool, StoreError> {
        let started = Instant::now();

        loop {
            let count = self.backend.vector_count(&self.spec.name).await?;
            if count >= expected {
                return Ok(true);
            }

            if started.elapsed() >= self.policy.count_timeout {
                return Ok(false);
            }

            debug!(count, expected, "waiting for vector count");
            tokio::time::sleep(self.policy.count_interval).await;
        }
    }

    pub async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        if vector.len() != self.spec.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.spec.dimension,
                actual: vector.len(),
            });
        }
        self.backend.query(&self.spec.name, vector, top_k).await
    }

    pub async fn fetch(&self, ids: &[String]) -> Result<Vec<VectorRecord>, StoreError> {
        self.backend.fetch(&self.spec.name, ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::ModelError;
    use crate::models::{page_label, Metric};
    use crate::stores::MemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DIMENSIONS: usize = 64;

    fn fast_policy() -> StorePolicy {
        StorePolicy {
            ready_interval: Duration::from_millis(5),
            ready_timeout: Duration::from_millis(50),
            delete_settle: Duration::ZERO,
            count_interval: Duration::from_millis(5),
            count_timeout: Duration::from_millis(30),
            embedding_concurrency: 4,
            upsert_batch_size: 100,
        }
    }

    fn pages(texts: &[&str]) -> Vec<PageRecord> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| PageRecord {
                page_number: page_label(index as u32 + 1),
                content: text.to_string(),
            })
            .collect()
    }

    fn store_with(backend: Arc<dyn VectorBackend>, policy: StorePolicy) -> VectorStore {
        VectorStore::new(
            backend,
            Arc::new(CharacterNgramEmbedder::new(DIMENSIONS)),
            CollectionSpec::new("ai-ebridge", DIMENSIONS, Metric::Cosine),
            policy,
        )
    }

    /// Wraps the memory backend with scripted readiness, count lag and call recording.
    #[derive(Default)]
    struct ScriptedBackend {
        inner: MemoryBackend,
        never_ready: bool,
        count_stuck_at_zero: bool,
        pending_deletes: AtomicUsize,
        upsert_batches: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl VectorBackend for ScriptedBackend {
        async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
            self.inner.collection_exists(name).await
        }

        async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
            self.inner.delete_collection(name).await
        }

        async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
            let pending = self.pending_deletes.load(Ordering::SeqCst);
            if pending > 0 {
                self.pending_deletes.store(pending - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable(format!("{} is being deleted", spec.name)));
            }
            self.inner.create_collection(spec).await
        }

        async fn collection_ready(&self, name: &str) -> Result<bool, StoreError> {
            if self.never_ready {
                return Ok(false);
            }
            self.inner.collection_ready(name).await
        }

        async fn upsert(&self, name: &str, records: &[VectorRecord]) -> Result<(), StoreError> {
            self.upsert_batches
                .lock()
                .map_err(|_| StoreError::Request("poisoned".to_string()))?
                .push(records.iter().map(|record| record.id.clone()).collect());
            self.inner.upsert(name, records).await
        }

        async fn vector_count(&self, name: &str) -> Result<u64, StoreError> {
            if self.count_stuck_at_zero {
                return Ok(0);
            }
            self.inner.vector_count(name).await
        }

        async fn query(
            &self,
            name: &str,
            vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<ScoredRecord>, StoreError> {
            self.inner.query(name, vector, top_k).await
        }

        async fn fetch(&self, name: &str, ids: &[String]) -> Result<Vec<VectorRecord>, StoreError> {
            self.inner.fetch(name, ids).await
        }
    }

    /// Earlier pages take longer so completion order is the reverse of page order.
    struct SlowFirstEmbedder {
        inner: CharacterNgramEmbedder,
    }

    #[async_trait]
    impl Embedder for SlowFirstEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
            let rank: u64 = text
                .split_whitespace()
                .last()
                .and_then(|token| token.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(rank * 10))).await;
            Ok(self.inner.embed_text(text))
        }
    }

    #[tokio::test]
    async fn reset_twice_leaves_one_empty_collection() -> Result<(), PipelineError> {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), fast_policy());

        store.reset_collection().await?;
        store.insert(&pages(&["Safety notes", "Troubleshooting"])).await?;
        store.reset_collection().await?;
        store.reset_collection().await?;

        assert_eq!(backend.collection_names()?, vec!["ai-ebridge".to_string()]);
        assert_eq!(backend.vector_count("ai-ebridge").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn create_waits_out_pending_delete() -> Result<(), PipelineError> {
        let backend = Arc::new(ScriptedBackend {
            pending_deletes: AtomicUsize::new(2),
            ..Default::default()
        });
        let store = store_with(backend.clone(), fast_policy());

        store.reset_collection().await?;

        assert_eq!(backend.pending_deletes.load(Ordering::SeqCst), 0);
        assert!(backend.collection_ready("ai-ebridge").await?);
        Ok(())
    }

    #[tokio::test]
    async fn create_conflict_past_deadline_is_unavailable() {
        let backend = Arc::new(ScriptedBackend {
            pending_deletes: AtomicUsize::new(usize::MAX),
            ..Default::default()
        });
        let store = store_with(backend, fast_policy());

        let result = store.reset_collection().await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn readiness_wait_is_bounded() {
        let backend = Arc::new(ScriptedBackend {
            never_ready: true,
            ..Default::default()
        });
        let store = store_with(backend, fast_policy());

        let result = store.reset_collection().await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn queries_only_see_the_latest_document() -> Result<(), PipelineError> {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend, fast_policy());
        let embedder = CharacterNgramEmbedder::new(DIMENSIONS);

        store.reset_collection().await?;
        store
            .insert(&[
                PageRecord {
                    page_number: "<Page 007>".to_string(),
                    content: "Old manual page seven".to_string(),
                },
                PageRecord {
                    page_number: "<Page 008>".to_string(),
                    content: "Old manual page eight".to_string(),
                },
            ])
            .await?;

        store.reset_collection().await?;
        let report = store
            .insert(&pages(&["New manual introduction", "New manual troubleshooting"]))
            .await?;
        assert!(report.consistent);

        let hits = store.query(&embedder.embed_text("manual page"), 5).await?;
        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(hits.len(), 2);
        assert!(ids.iter().all(|id| *id == "<Page 001>" || *id == "<Page 002>"));
        Ok(())
    }

    #[tokio::test]
    async fn fetched_metadata_matches_inserted_page() -> Result<(), PipelineError> {
        let store = store_with(Arc::new(MemoryBackend::new()), fast_policy());
        let inserted = pages(&["Intro ", "Troubleshooting Condition Problem Console "]);

        store.reset_collection().await?;
        store.insert(&inserted).await?;

        let fetched = store.fetch(&["<Page 002>".to_string()]).await?;
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].metadata.page_number, inserted[1].page_number);
        assert_eq!(fetched[0].metadata.text, inserted[1].content);
        Ok(())
    }

    #[tokio::test]
    async fn count_timeout_is_not_fatal() -> Result<(), PipelineError> {
        let backend = Arc::new(ScriptedBackend {
            count_stuck_at_zero: true,
            ..Default::default()
        });
        let store = store_with(backend, fast_policy());

        store.reset_collection().await?;
        let report = store.insert(&pages(&["Troubleshooting"])).await?;

        assert_eq!(report.upserted, 1);
        assert!(!report.consistent);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_embedding_keeps_page_order() -> Result<(), PipelineError> {
        let backend = Arc::new(ScriptedBackend::default());
        let store = VectorStore::new(
            backend.clone(),
            Arc::new(SlowFirstEmbedder {
                inner: CharacterNgramEmbedder::new(DIMENSIONS),
            }),
            CollectionSpec::new("ai-ebridge", DIMENSIONS, Metric::Cosine),
            StorePolicy {
                upsert_batch_size: 2,
                ..fast_policy()
            },
        );

        store.reset_collection().await?;
        store
            .insert(&pages(&["page 0", "page 1", "page 2", "page 3", "page 4"]))
            .await?;

        let batches = backend
            .upsert_batches
            .lock()
            .map_err(|_| StoreError::Request("poisoned".to_string()))?
            .clone();
        assert_eq!(
            batches,
            vec![
                vec!["<Page 001>".to_string(), "<Page 002>".to_string()],
                vec!["<Page 003>".to_string(), "<Page 004>".to_string()],
                vec!["<Page 005>".to_string()],
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn blank_pages_are_not_embedded() -> Result<(), PipelineError> {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), fast_policy());

        store.reset_collection().await?;
        let report = store.insert(&pages(&["Cover ", "", "Troubleshooting "])).await?;

        assert_eq!(report.upserted, 2);
        assert_eq!(report.skipped_blank, 1);
        assert!(store.fetch(&["<Page 002>".to_string()]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn embedding_dimension_must_match_collection() -> Result<(), StoreError> {
        let store = VectorStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(CharacterNgramEmbedder::new(8)),
            CollectionSpec::new("ai-ebridge", DIMENSIONS, Metric::Cosine),
            fast_policy(),
        );

        store.reset_collection().await?;
        let result = store.insert(&pages(&["Troubleshooting"])).await;

        assert!(matches!(
            result,
            Err(PipelineError::Store(StoreError::DimensionMismatch {
                expected: DIMENSIONS,
                actual: 8
            }))
        ));
        Ok(())
    }
}
