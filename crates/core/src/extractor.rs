use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::error::IngestError;
use crate::models::DocumentSource;
use crate::ocr::AnalyzeResult;
use crate::traits::LayoutSource;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model_id: String,
    pub api_version: String,
    pub poll_interval: Duration,
}

impl OcrEndpointConfig {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            model_id: "prebuilt-layout".to_string(),
            api_version: "2024-11-30".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Layout analysis through the Document Intelligence REST API: submit, then
/// poll the returned operation until it settles.
pub struct AzureLayoutClient {
    client: Client,
    config: OcrEndpointConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<Value>,
}

impl AzureLayoutClient {
    pub fn new(config: OcrEndpointConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn analyze_url(&self) -> Result<Url, IngestError> {
        let mut url = Url::parse(&format!(
            "{}/documentintelligence/documentModels/{}:analyze",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model_id
        ))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header(SUBSCRIPTION_KEY_HEADER, key),
            None => request,
        }
    }

    async fn request_body(source: &DocumentSource) -> Result<Value, IngestError> {
        Ok(match source {
            DocumentSource::Url(url) => json!({ "urlSource": url }),
            DocumentSource::Path(path) => {
                let bytes = tokio::fs::read(path).await?;
                json!({ "base64Source": STANDARD.encode(bytes) })
            }
        })
    }
}

#[async_trait]
impl LayoutSource for AzureLayoutClient {
    async fn analyze(&self, source: &DocumentSource) -> Result<AnalyzeResult, IngestError> {
        let body = Self::request_body(source).await?;
        let response = self
            .authorized(self.client.post(self.analyze_url()?))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(IngestError::OcrFailed(format!(
                "analyze request for {} returned {status}: {text}",
                source.location()
            )));
        }

        let operation = response
            .headers()
            .get("operation-location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                IngestError::OcrFailed("analyze response has no operation-location".to_string())
            })?;

        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            let response = self
                .authorized(self.client.get(&operation))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(IngestError::OcrFailed(format!(
                    "polling {operation} returned {}",
                    response.status()
                )));
            }

            let state: AnalyzeOperation = response.json().await?;
            debug!(operation = %operation, status = %state.status, "layout analysis polled");

            match state.status.as_str() {
                "succeeded" => {
                    return state.analyze_result.ok_or_else(|| {
                        IngestError::OcrFailed("succeeded without analyzeResult".to_string())
                    })
                }
                "failed" | "canceled" => {
                    return Err(IngestError::OcrFailed(format!(
                        "layout analysis {}: {}",
                        state.status,
                        state.error.unwrap_or(Value::Null)
                    )))
                }
                _ => continue,
            }
        }
    }
}

/// Reads a previously saved layout result from disk, with or without the
/// `analyzeResult` envelope of the REST response.
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedLayoutReader;

impl SavedLayoutReader {
    pub async fn read(path: &Path) -> Result<AnalyzeResult, IngestError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(IngestError::FileNotFound(path.display().to_string()))
            }
            Err(error) => return Err(error.into()),
        };
        let mut payload: Value = serde_json::from_slice(&bytes)?;
        let result = match payload.get_mut("analyzeResult") {
            Some(inner) => inner.take(),
            None => payload,
        };
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl LayoutSource for SavedLayoutReader {
    async fn analyze(&self, source: &DocumentSource) -> Result<AnalyzeResult, IngestError> {
        match source {
            DocumentSource::Path(path) => Self::read(path).await,
            DocumentSource::Url(url) => Err(IngestError::InvalidArgument(format!(
                "saved layouts are read from disk, got url {url}"
            ))),
        }
    }
}
