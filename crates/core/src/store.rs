//! The vector store: index lifecycle, ingestion and hybrid search.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::models::{Document, IndexRecord, IndexSchema, SearchFilter};
use crate::query::HybridQuery;
use crate::traits::{Embedder, HybridIndex};
use crate::SearchError;

const QUERY_VECTOR_KEY: &str = "query_vector";

/// A ready-to-use handle on one named index.
///
/// Only [`VectorStore::create`] produces one, so every instance refers to an
/// index that exists with the declared mapping. Dropping the index consumes
/// the handle.
pub struct VectorStore<I, E> {
    index: I,
    embedder: E,
    index_name: String,
    schema: IndexSchema,
}

impl<I, E> VectorStore<I, E>
where
    I: HybridIndex,
    E: Embedder,
{
    pub async fn create(
        index: I,
        embedder: E,
        index_name: impl Into<String>,
        schema: IndexSchema,
    ) -> Result<Self, SearchError> {
        let index_name = index_name.into();

        if embedder.dimensions() != schema.dimensions {
            return Err(SearchError::IndexState {
                index: index_name,
                details: format!(
                    "embedder produces {} dimensions, schema declares {}",
                    embedder.dimensions(),
                    schema.dimensions
                ),
            });
        }

        let created = index.ensure_index(&index_name, &schema).await?;
        debug!(index = %index_name, created, "vector store ready");

        Ok(Self {
            index,
            embedder,
            index_name,
            schema,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    /// Embeds and upserts each document, returning the ids that made it into
    /// the index. A failing document is logged and skipped.
    pub async fn add_documents(&self, documents: Vec<Document>) -> Vec<String> {
        let total = documents.len();
        let mut indexed = Vec::with_capacity(total);

        for mut document in documents {
            let texts = BTreeMap::from([(document.document_id.clone(), document.content.clone())]);
            let vector = match self.embedder.embed(&texts).await {
                Ok(mut vectors) => match vectors.remove(&document.document_id) {
                    Some(vector) => vector,
                    None => {
                        warn!(document_id = %document.document_id, "embedding missing from batch");
                        continue;
                    }
                },
                Err(error) => {
                    warn!(document_id = %document.document_id, %error, "skipping document: embedding failed");
                    continue;
                }
            };

            let now = Utc::now();
            document.created_at = now;
            document.updated_at = now;

            let document_id = document.document_id.clone();
            let record = IndexRecord::new(document, vector);
            if let Err(error) = self.index.upsert(&self.index_name, &record).await {
                warn!(document_id = %document_id, %error, "skipping document: index write failed");
                continue;
            }

            indexed.push(document_id);
        }

        info!(
            index = %self.index_name,
            indexed = indexed.len(),
            skipped = total - indexed.len(),
            "documents added"
        );
        indexed
    }

    pub async fn delete_by_ids(&self, ids: &[String]) -> Result<Vec<String>, SearchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.index.delete_by_ids(&self.index_name, ids).await?;
        info!(index = %self.index_name, count = ids.len(), "documents deleted");
        Ok(ids.to_vec())
    }

    /// Hybrid lexical + vector search restricted to documents effective at
    /// `filter.effective_at` and carrying every tag in `filter.tags`.
    pub async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<Document>, SearchError> {
        filter.validate()?;

        let texts = BTreeMap::from([(QUERY_VECTOR_KEY.to_string(), query.to_string())]);
        let vector = self
            .embedder
            .embed(&texts)
            .await?
            .remove(QUERY_VECTOR_KEY)
            .ok_or_else(|| SearchError::Embedding("query vector missing".to_string()))?;

        let hybrid = HybridQuery::new(query, vector, filter);
        let mut documents = self.index.search(&self.index_name, &hybrid).await?;
        if documents.is_empty() {
            return Err(SearchError::NoResults);
        }

        documents.truncate(filter.top_k);
        debug!(index = %self.index_name, hits = documents.len(), "search finished");
        Ok(documents)
    }

    /// Drops the whole index. The store cannot be used afterwards.
    pub async fn delete_vectorstore(self) -> Result<(), SearchError> {
        self.index.drop_index(&self.index_name).await?;
        info!(index = %self.index_name, "index dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{end_of_day, FileMeta, PageMeta};
    use crate::stores::memory::MemoryIndex;
    use chrono::{DateTime, Duration, TimeZone};
    use std::sync::Arc;

    const INDEX: &str = "documents";

    fn embedder() -> CharacterNgramEmbedder {
        CharacterNgramEmbedder { dimensions: 64 }
    }

    fn schema() -> IndexSchema {
        IndexSchema {
            dimensions: 64,
            ..IndexSchema::default()
        }
    }

    fn file_meta(from: DateTime<Utc>, to: DateTime<Utc>) -> FileMeta {
        FileMeta {
            file_id: "file-1".to_string(),
            file_path: "rag/handbook.pdf".to_string(),
            file_name: "handbook.pdf".to_string(),
            extension: "pdf".to_string(),
            doc_type: "handbook".to_string(),
            description: "Employee handbook".to_string(),
            effective_from: from,
            effective_to: to,
            author: "unknown".to_string(),
            department: "HR".to_string(),
        }
    }

    fn document(content: &str, tags: &[&str], meta: FileMeta) -> Document {
        Document::new(
            content,
            tags.iter().map(|tag| tag.to_string()),
            meta,
            PageMeta::new(0, 1),
        )
    }

    fn open_window() -> FileMeta {
        file_meta(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(), end_of_day(9999, 12, 31))
    }

    #[tokio::test]
    async fn create_is_idempotent_and_checks_dimensions() {
        let backend = Arc::new(MemoryIndex::default());

        VectorStore::create(backend.clone(), embedder(), INDEX, schema())
            .await
            .expect("first create");
        VectorStore::create(backend.clone(), embedder(), INDEX, schema())
            .await
            .expect("second create");
        assert_eq!(backend.mappings_created(INDEX), 1);

        let mismatch = VectorStore::create(backend, embedder(), INDEX, IndexSchema::default()).await;
        assert!(matches!(mismatch, Err(SearchError::IndexState { .. })));
    }

    #[tokio::test]
    async fn indexed_chunk_matches_its_own_content() {
        let store = VectorStore::create(MemoryIndex::default(), embedder(), INDEX, schema())
            .await
            .expect("create");

        let docs = vec![
            document("Annual leave accrues at two days per month", &["hr"], open_window()),
            document("Expense reports are due within thirty days", &["finance"], open_window()),
            document("Security badges must be worn on site", &["security"], open_window()),
        ];
        let target = docs[1].clone();
        let indexed = store.add_documents(docs).await;
        assert_eq!(indexed.len(), 3);

        let hits = store
            .search(&target.content, &SearchFilter::default())
            .await
            .expect("search finds the chunk");
        assert_eq!(hits[0].document_id, target.document_id);
    }

    #[tokio::test]
    async fn failed_writes_are_skipped_and_only_successes_returned() {
        let good = document("kept chunk", &[], open_window());
        let bad = document("rejected chunk", &[], open_window());
        let backend = MemoryIndex::rejecting(&[bad.document_id.as_str()]);
        let store = VectorStore::create(backend, embedder(), INDEX, schema())
            .await
            .expect("create");

        let stale = Utc::now() - Duration::days(30);
        let mut good_stale = good.clone();
        good_stale.created_at = stale;

        let indexed = store.add_documents(vec![bad, good_stale]).await;
        assert_eq!(indexed, vec![good.document_id.clone()]);

        let hits = store.search("kept chunk", &SearchFilter::default()).await.expect("hit");
        assert!(hits[0].created_at > stale);
    }

    #[tokio::test]
    async fn effective_window_bounds_search_results() {
        let from = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap();
        let store = VectorStore::create(MemoryIndex::default(), embedder(), INDEX, schema())
            .await
            .expect("create");
        store
            .add_documents(vec![document("seasonal hiring notice", &[], file_meta(from, to))])
            .await;

        for outside in [from - Duration::days(1), to + Duration::days(1)] {
            let filter = SearchFilter {
                effective_at: outside,
                ..SearchFilter::default()
            };
            let result = store.search("seasonal hiring notice", &filter).await;
            assert!(matches!(result, Err(SearchError::NoResults)));
        }

        let inside = SearchFilter {
            effective_at: from + Duration::days(10),
            ..SearchFilter::default()
        };
        assert_eq!(store.search("seasonal hiring notice", &inside).await.expect("hit").len(), 1);
    }

    #[tokio::test]
    async fn tag_filters_require_every_tag() {
        let store = VectorStore::create(MemoryIndex::default(), embedder(), INDEX, schema())
            .await
            .expect("create");
        store
            .add_documents(vec![
                document("travel policy for staff", &["hr", "travel"], open_window()),
                document("travel budget for staff", &["finance", "travel"], open_window()),
            ])
            .await;

        let filter = SearchFilter {
            tags: vec!["travel".to_string(), "hr".to_string()],
            ..SearchFilter::default()
        };
        let hits = store.search("travel staff", &filter).await.expect("hit");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].tags.contains("hr"));
    }

    #[tokio::test]
    async fn deleted_ids_disappear_from_search() {
        let store = VectorStore::create(MemoryIndex::default(), embedder(), INDEX, schema())
            .await
            .expect("create");
        let doc = document("retired procedure", &[], open_window());
        let id = doc.document_id.clone();
        store.add_documents(vec![doc]).await;

        assert_eq!(store.delete_by_ids(&[]).await.expect("no-op"), Vec::<String>::new());
        assert_eq!(store.delete_by_ids(&[id.clone()]).await.expect("delete"), vec![id]);

        let result = store.search("retired procedure", &SearchFilter::default()).await;
        assert!(matches!(result, Err(SearchError::NoResults)));
    }

    #[tokio::test]
    async fn results_are_truncated_to_top_k_after_oversampling() {
        let backend = Arc::new(MemoryIndex::default());
        let store = VectorStore::create(backend.clone(), embedder(), INDEX, schema())
            .await
            .expect("create");
        let docs = (0..12)
            .map(|index| document(&format!("safety rule number {index}"), &[], open_window()))
            .collect();
        store.add_documents(docs).await;

        let filter = SearchFilter {
            top_k: 2,
            ..SearchFilter::default()
        };
        let hits = store.search("safety rule", &filter).await.expect("hits");
        assert_eq!(hits.len(), 2);

        let queries = backend.queries.lock().expect("lock").clone();
        assert_eq!(queries[0].size, 6);
        assert_eq!(queries[0].num_candidates, 100);
    }

    #[tokio::test]
    async fn invalid_filter_is_rejected_before_any_call() {
        let store = VectorStore::create(MemoryIndex::default(), embedder(), INDEX, schema())
            .await
            .expect("create");
        let filter = SearchFilter {
            top_k: 0,
            ..SearchFilter::default()
        };
        let result = store.search("anything", &filter).await;
        assert!(matches!(result, Err(SearchError::InvalidFilter(_))));
    }

    #[tokio::test]
    async fn dropping_twice_surfaces_an_error() {
        let backend = Arc::new(MemoryIndex::default());
        let first = VectorStore::create(backend.clone(), embedder(), INDEX, schema())
            .await
            .expect("create");
        let second = VectorStore::create(backend.clone(), embedder(), INDEX, schema())
            .await
            .expect("create");

        first.delete_vectorstore().await.expect("drop");
        let again = second.delete_vectorstore().await;
        assert!(matches!(again, Err(SearchError::IndexState { .. })));
    }
}
