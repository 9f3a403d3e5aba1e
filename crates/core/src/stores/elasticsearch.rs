use crate::models::{Document, IndexRecord, IndexSchema};
use crate::query::HybridQuery;
use crate::traits::HybridIndex;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

const BACKEND: &str = "elasticsearch";

/// Hybrid index over the Elasticsearch REST API.
#[derive(Clone)]
pub struct ElasticsearchIndex {
    client: Arc<Client>,
    endpoint: String,
    api_key: Option<String>,
}

impl ElasticsearchIndex {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Arc::new(Client::new()),
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SearchError> {
        let mut url = Url::parse(&self.endpoint)?;
        url.path_segments_mut()
            .map_err(|_| SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("endpoint {} cannot carry a path", self.endpoint),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("ApiKey {key}")),
            None => request,
        }
    }

    async fn backend_error(response: reqwest::Response) -> SearchError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        SearchError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!("{status} {body}"),
        }
    }
}

pub fn index_mapping(schema: &IndexSchema) -> Value {
    json!({
        "mappings": {
            "properties": {
                "document_id": {"type": "keyword"},
                "content": {"type": "text", "analyzer": schema.text_analyzer},
                "vector": {
                    "type": "dense_vector",
                    "dims": schema.dimensions,
                    "index": true,
                    "similarity": "cosine"
                },
                "tags": {"type": "keyword"},
                "page_meta": {
                    "properties": {
                        "number": {"type": "integer"},
                        "total_pages": {"type": "integer"},
                        "prev": {"type": "integer"},
                        "next": {"type": "integer"}
                    }
                },
                "file_meta": {
                    "properties": {
                        "file_id": {"type": "keyword"},
                        "file_path": {"type": "keyword"},
                        "file_name": {"type": "keyword"},
                        "extension": {"type": "keyword"},
                        "type": {"type": "keyword"},
                        "description": {"type": "text", "analyzer": schema.text_analyzer},
                        "effective_from": {"type": "date"},
                        "effective_to": {"type": "date"},
                        "author": {"type": "keyword"},
                        "department": {"type": "keyword"}
                    }
                },
                "is_deleted": {"type": "boolean"},
                "created_at": {"type": "date"},
                "updated_at": {"type": "date"}
            }
        }
    })
}

fn filter_clauses(query: &HybridQuery) -> Vec<Value> {
    let effective_at = query.effective_at.to_rfc3339();
    let mut predicates = vec![
        json!({"term": {"is_deleted": false}}),
        json!({"range": {"file_meta.effective_from": {"lte": effective_at}}}),
        json!({"range": {"file_meta.effective_to": {"gte": effective_at}}}),
    ];

    for tag in &query.tags {
        predicates.push(json!({"term": {"tags": tag}}));
    }

    predicates
}

/// Lexical match and kNN in one request; both legs share the same filter.
pub fn search_body(query: &HybridQuery) -> Value {
    let filters = filter_clauses(query);
    json!({
        "size": query.size,
        "_source": {"excludes": ["vector"]},
        "query": {
            "bool": {
                "filter": filters,
                "should": [
                    {"match": {"content": {"query": query.text, "operator": "and"}}}
                ],
                "minimum_should_match": 1
            }
        },
        "knn": {
            "field": "vector",
            "query_vector": query.vector,
            "k": query.size,
            "num_candidates": query.num_candidates,
            "filter": {"bool": {"filter": filters}}
        }
    })
}

fn parse_hits(response: &Value) -> Vec<Document> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                    match serde_json::from_value::<Document>(source) {
                        Ok(document) => Some(document),
                        Err(error) => {
                            let id = hit.get("_id").and_then(Value::as_str).unwrap_or_default();
                            warn!(
                                id = %id,
                                %error,
                                "skipping malformed hit"
                            );
                            None
                        }
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl HybridIndex for ElasticsearchIndex {
    async fn ensure_index(&self, index: &str, schema: &IndexSchema) -> Result<bool, SearchError> {
        let response = self
            .authorized(self.client.head(self.url(&[index])?))
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            return Ok(false);
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(SearchError::IndexState {
                index: index.to_string(),
                details: format!("existence check returned {}", response.status()),
            });
        }

        let response = self
            .authorized(self.client.put(self.url(&[index])?))
            .json(&index_mapping(schema))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(index = %index, dims = schema.dimensions, "created index");
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            return Ok(false);
        }

        Err(SearchError::IndexState {
            index: index.to_string(),
            details: format!("index setup failed with {status}: {body}"),
        })
    }

    async fn upsert(&self, index: &str, record: &IndexRecord) -> Result<(), SearchError> {
        let response = self
            .authorized(
                self.client
                    .put(self.url(&[index, "_doc", record.document.document_id.as_str()])?),
            )
            .json(record)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response).await);
        }
        Ok(())
    }

    async fn delete_by_ids(&self, index: &str, ids: &[String]) -> Result<(), SearchError> {
        let mut url = self.url(&[index, "_delete_by_query"])?;
        url.query_pairs_mut().append_pair("conflicts", "proceed");

        let response = self
            .authorized(self.client.post(url))
            .json(&json!({"query": {"terms": {"document_id": ids}}}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response).await);
        }
        Ok(())
    }

    async fn search(&self, index: &str, query: &HybridQuery) -> Result<Vec<Document>, SearchError> {
        let response = self
            .authorized(self.client.post(self.url(&[index, "_search"])?))
            .json(&search_body(query))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response).await);
        }

        let response_json: Value = response.json().await?;
        Ok(parse_hits(&response_json))
    }

    async fn drop_index(&self, index: &str) -> Result<(), SearchError> {
        let response = self
            .authorized(self.client.delete(self.url(&[index])?))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::IndexState {
                index: index.to_string(),
                details: format!("delete returned {}", response.status()),
            });
        }
        Ok(())
    }
}
