use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::models::DEFAULT_VECTOR_DIMENSIONS;
use crate::traits::Embedder;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key: None,
            dimensions: DEFAULT_VECTOR_DIMENSIONS,
        }
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config: EmbeddingConfig {
                endpoint: config.endpoint.trim_end_matches('/').to_string(),
                ..config
            },
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.config.endpoint))
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: text,
                dimensions: self.config.dimensions,
            });

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!("{status} {body}"),
            });
        }

        let payload: EmbeddingResponse = response.json().await?;
        payload
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| SearchError::Embedding("response contained no vectors".to_string()))
    }
}

/// Deterministic hashed character-trigram embedder. Needs no network access.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_VECTOR_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.vectorize(text))
    }
}
