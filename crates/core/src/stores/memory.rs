//! In-process [`HybridIndex`] used by tests. It evaluates a [`HybridQuery`]
//! with the same semantics the Elasticsearch request expresses.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::models::{Document, IndexRecord, IndexSchema};
use crate::query::HybridQuery;
use crate::traits::HybridIndex;
use crate::SearchError;

#[derive(Debug, Default)]
pub struct StoredIndex {
    pub schema: Option<IndexSchema>,
    pub records: BTreeMap<String, IndexRecord>,
    pub mappings_created: usize,
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    pub indices: Mutex<HashMap<String, StoredIndex>>,
    pub rejected_ids: HashSet<String>,
    pub queries: Mutex<Vec<HybridQuery>>,
}

impl MemoryIndex {
    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            rejected_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn record_count(&self, index: &str) -> usize {
        self.indices
            .lock()
            .map(|indices| indices.get(index).map(|stored| stored.records.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn mappings_created(&self, index: &str) -> usize {
        self.indices
            .lock()
            .map(|indices| indices.get(index).map(|stored| stored.mappings_created).unwrap_or(0))
            .unwrap_or(0)
    }

    fn poisoned(index: &str) -> SearchError {
        SearchError::IndexState {
            index: index.to_string(),
            details: "lock poisoned".to_string(),
        }
    }

    fn missing(index: &str) -> SearchError {
        SearchError::IndexState {
            index: index.to_string(),
            details: "no such index".to_string(),
        }
    }
}

fn passes_filter(record: &IndexRecord, query: &HybridQuery) -> bool {
    !record.is_deleted
        && record.document.file_meta.is_effective_at(query.effective_at)
        && query.tags.iter().all(|tag| record.document.tags.contains(tag))
}

fn lexical_match(content: &str, terms: &[String]) -> bool {
    let tokens = content
        .to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect::<HashSet<_>>();
    !terms.is_empty()
        && terms.iter().all(|term| {
            term.split(|character: char| !character.is_alphanumeric())
                .filter(|part| !part.is_empty())
                .all(|part| tokens.contains(part))
        })
}

fn cosine(left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let norm = |values: &[f32]| values.iter().map(|value| value * value).sum::<f32>().sqrt();
    let denominator = norm(left) * norm(right);
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

#[async_trait]
impl HybridIndex for MemoryIndex {
    async fn ensure_index(&self, index: &str, schema: &IndexSchema) -> Result<bool, SearchError> {
        let mut indices = self.indices.lock().map_err(|_| Self::poisoned(index))?;
        let stored = indices.entry(index.to_string()).or_default();
        if stored.schema.is_some() {
            return Ok(false);
        }
        stored.schema = Some(schema.clone());
        stored.mappings_created += 1;
        Ok(true)
    }

    async fn upsert(&self, index: &str, record: &IndexRecord) -> Result<(), SearchError> {
        if self.rejected_ids.contains(&record.document.document_id) {
            return Err(SearchError::BackendResponse {
                backend: "memory".to_string(),
                details: format!("write rejected for {}", record.document.document_id),
            });
        }
        let mut indices = self.indices.lock().map_err(|_| Self::poisoned(index))?;
        let stored = indices.get_mut(index).ok_or_else(|| Self::missing(index))?;
        stored
            .records
            .insert(record.document.document_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_by_ids(&self, index: &str, ids: &[String]) -> Result<(), SearchError> {
        let mut indices = self.indices.lock().map_err(|_| Self::poisoned(index))?;
        let stored = indices.get_mut(index).ok_or_else(|| Self::missing(index))?;
        for id in ids {
            stored.records.remove(id);
        }
        Ok(())
    }

    async fn search(&self, index: &str, query: &HybridQuery) -> Result<Vec<Document>, SearchError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.clone());
        }

        let indices = self.indices.lock().map_err(|_| Self::poisoned(index))?;
        let stored = indices.get(index).ok_or_else(|| Self::missing(index))?;
        let terms = query.terms();

        let candidates = stored
            .records
            .values()
            .filter(|record| passes_filter(record, query))
            .collect::<Vec<_>>();

        let mut scores: HashMap<&str, (f32, &IndexRecord)> = HashMap::new();
        for record in &candidates {
            if lexical_match(&record.document.content, &terms) {
                scores.insert(record.document.document_id.as_str(), (1.0, *record));
            }
        }

        let mut nearest = candidates
            .iter()
            .map(|record| (cosine(&record.vector, &query.vector), *record))
            .collect::<Vec<_>>();
        nearest.sort_by(|left, right| right.0.total_cmp(&left.0));
        for (similarity, record) in nearest.into_iter().take(query.size) {
            scores
                .entry(record.document.document_id.as_str())
                .or_insert((0.0, record))
                .0 += similarity;
        }

        let mut ranked = scores.into_values().collect::<Vec<_>>();
        ranked.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(ranked
            .into_iter()
            .take(query.size)
            .map(|(_, record)| record.document.clone())
            .collect())
    }

    async fn drop_index(&self, index: &str) -> Result<(), SearchError> {
        let mut indices = self.indices.lock().map_err(|_| Self::poisoned(index))?;
        indices
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| Self::missing(index))
    }
}

#[async_trait]
impl<T: HybridIndex> HybridIndex for Arc<T> {
    async fn ensure_index(&self, index: &str, schema: &IndexSchema) -> Result<bool, SearchError> {
        self.as_ref().ensure_index(index, schema).await
    }

    async fn upsert(&self, index: &str, record: &IndexRecord) -> Result<(), SearchError> {
        self.as_ref().upsert(index, record).await
    }

    async fn delete_by_ids(&self, index: &str, ids: &[String]) -> Result<(), SearchError> {
        self.as_ref().delete_by_ids(index, ids).await
    }

    async fn search(&self, index: &str, query: &HybridQuery) -> Result<Vec<Document>, SearchError> {
        self.as_ref().search(index, query).await
    }

    async fn drop_index(&self, index: &str) -> Result<(), SearchError> {
        self.as_ref().drop_index(index).await
    }
}
