use crate::error::StoreError;
use crate::models::{CollectionSpec, Metric, ScoredRecord, VectorRecord};
use crate::traits::VectorBackend;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Process-local backend with the same lifecycle as a hosted index.
/// Collections are ready as soon as they are created.
#[derive(Default)]
pub struct MemoryBackend {
    collections: Mutex<HashMap<String, MemoryCollection>>,
}

struct MemoryCollection {
    spec: CollectionSpec,
    records: BTreeMap<String, VectorRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryCollection>>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Request("memory store lock poisoned".to_string()))
    }

    pub fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }
}

fn missing(name: &str) -> StoreError {
    StoreError::Request(format!("collection {name} does not exist"))
}

fn score(metric: Metric, left: &[f32], right: &[f32]) -> f64 {
    let dot: f64 = left
        .iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();

    match metric {
        Metric::Dotproduct => dot,
        Metric::Cosine => {
            let norm = |values: &[f32]| {
                values
                    .iter()
                    .map(|value| f64::from(*value) * f64::from(*value))
                    .sum::<f64>()
                    .sqrt()
            };
            let denominator = norm(left) * norm(right);
            if denominator == 0.0 {
                0.0
            } else {
                dot / denominator
            }
        }
        Metric::Euclidean => left
            .iter()
            .zip(right)
            .map(|(a, b)| {
                let delta = f64::from(*a) - f64::from(*b);
                delta * delta
            })
            .sum(),
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(name))
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.lock()?.remove(name);
        Ok(())
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let mut collections = self.lock()?;
        if collections.contains_key(&spec.name) {
            return Err(StoreError::Request(format!(
                "collection {} already exists",
                spec.name
            )));
        }
        collections.insert(
            spec.name.clone(),
            MemoryCollection {
                spec: spec.clone(),
                records: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn collection_ready(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(name))
    }

    async fn upsert(&self, name: &str, records: &[VectorRecord]) -> Result<(), StoreError> {
        let mut collections = self.lock()?;
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;

        for record in records {
            if record.embedding.len() != collection.spec.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: collection.spec.dimension,
                    actual: record.embedding.len(),
                });
            }
        }

        for record in records {
            collection.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn vector_count(&self, name: &str) -> Result<u64, StoreError> {
        let collections = self.lock()?;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        Ok(collection.records.len() as u64)
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        let collections = self.lock()?;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        let metric = collection.spec.metric;

        let mut scored: Vec<ScoredRecord> = collection
            .records
            .values()
            .map(|record| ScoredRecord {
                id: record.id.clone(),
                score: score(metric, vector, &record.embedding),
                metadata: Some(record.metadata.clone()),
            })
            .collect();

        match metric {
            Metric::Euclidean => scored.sort_by(|left, right| left.score.total_cmp(&right.score)),
            Metric::Cosine | Metric::Dotproduct => {
                scored.sort_by(|left, right| right.score.total_cmp(&left.score))
            }
        }
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn fetch(&self, name: &str, ids: &[String]) -> Result<Vec<VectorRecord>, StoreError> {
        let collections = self.lock()?;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        Ok(ids
            .iter()
            .filter_map(|id| collection.records.get(id).cloned())
            .collect())
    }
}
