use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{IngestError, SearchError};
use crate::models::{Document, DocumentSource, IndexRecord, IndexSchema};
use crate::ocr::AnalyzeResult;
use crate::query::HybridQuery;

/// Produces the raw layout OCR result for a document.
#[async_trait]
pub trait LayoutSource: Send + Sync {
    async fn analyze(&self, source: &DocumentSource) -> Result<AnalyzeResult, IngestError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    /// Embeds every entry in order, one call at a time. The first failure
    /// discards the whole batch.
    async fn embed(
        &self,
        texts: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, Vec<f32>>, SearchError> {
        let mut vectors = BTreeMap::new();
        for (key, text) in texts {
            let vector = self.embed_one(text).await?;
            if vector.len() != self.dimensions() {
                return Err(SearchError::DimensionMismatch {
                    expected: self.dimensions(),
                    actual: vector.len(),
                });
            }
            vectors.insert(key.clone(), vector);
        }
        Ok(vectors)
    }
}

/// An LLM that answers with JSON conforming to a supplied schema.
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    async fn complete_structured(
        &self,
        system_prompt: &str,
        user_content: &str,
        schema_name: &str,
        schema: &Value,
    ) -> Result<Value, IngestError>;
}

pub async fn parse_structured<L, T>(
    llm: &L,
    system_prompt: &str,
    user_content: &str,
    schema_name: &str,
    schema: &Value,
) -> Result<T, IngestError>
where
    L: StructuredLlm + Sync + ?Sized,
    T: DeserializeOwned,
{
    let value = llm
        .complete_structured(system_prompt, user_content, schema_name, schema)
        .await?;
    serde_json::from_value(value).map_err(|error| {
        IngestError::Classification(format!("{schema_name} response did not match schema: {error}"))
    })
}

/// Storage engine behind the vector store.
#[async_trait]
pub trait HybridIndex: Send + Sync {
    /// Creates the index with the declared mapping unless it already exists.
    /// Returns `true` when the index was created by this call.
    async fn ensure_index(&self, index: &str, schema: &IndexSchema) -> Result<bool, SearchError>;

    async fn upsert(&self, index: &str, record: &IndexRecord) -> Result<(), SearchError>;

    async fn delete_by_ids(&self, index: &str, ids: &[String]) -> Result<(), SearchError>;

    async fn search(&self, index: &str, query: &HybridQuery) -> Result<Vec<Document>, SearchError>;

    async fn drop_index(&self, index: &str) -> Result<(), SearchError>;
}
