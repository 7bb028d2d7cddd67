//! In-memory [`KnowledgeStore`] implementation for tests and embedding.
//!
//! Collections are `Vec`s of records behind a `std::sync::RwLock`, kept
//! in insertion order. Search is brute-force cosine similarity over every
//! record that passes the payload filter.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{cosine_similarity, rank, KnowledgeRecord, KnowledgeStore, PayloadFilter, ScoredRecord};

/// In-memory knowledge store.
pub struct InMemoryKnowledgeStore {
    collections: RwLock<HashMap<String, Vec<KnowledgeRecord>>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records in a collection, `None` if it does not exist.
    pub fn len(&self, collection: &str) -> Option<usize> {
        self.collections
            .read()
            .ok()
            .and_then(|c| c.get(collection).map(Vec::len))
    }
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("knowledge store lock poisoned")
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().map_err(poisoned)?.contains_key(name))
    }

    async fn create_collection(&self, name: &str, _dims: usize) -> Result<()> {
        self.collections
            .write()
            .map_err(poisoned)?
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.write().map_err(poisoned)?.remove(name);
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[KnowledgeRecord]) -> Result<()> {
        let mut guard = self.collections.write().map_err(poisoned)?;
        let Some(stored) = guard.get_mut(collection) else {
            bail!("collection '{}' does not exist", collection);
        };
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        probe: &[f32],
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let guard = self.collections.read().map_err(poisoned)?;
        let Some(stored) = guard.get(collection) else {
            bail!("collection '{}' does not exist", collection);
        };
        let hits = stored
            .iter()
            .filter(|r| filter.matches(&r.payload))
            .map(|r| ScoredRecord {
                id: r.id.clone(),
                score: cosine_similarity(probe, &r.vector),
                payload: r.payload.clone(),
            })
            .collect();
        Ok(rank(hits, limit))
    }
}
