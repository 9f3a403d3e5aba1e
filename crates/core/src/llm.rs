use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::IngestError;
use crate::traits::StructuredLlm;

pub const DEFAULT_CHAT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-5-nano";

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            api_key: None,
        }
    }
}

/// Chat completions client that requests `json_schema` structured output.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: Client,
    config: ChatConfig,
}

impl OpenAiChat {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            client: Client::new(),
            config: ChatConfig {
                endpoint: config.endpoint.trim_end_matches('/').to_string(),
                ..config
            },
        }
    }
}

#[async_trait]
impl StructuredLlm for OpenAiChat {
    async fn complete_structured(
        &self,
        system_prompt: &str,
        user_content: &str,
        schema_name: &str,
        schema: &Value,
    ) -> Result<Value, IngestError> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_content}
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "schema": schema,
                    "strict": true
                }
            }
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.config.endpoint))
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IngestError::Classification(format!(
                "chat completion returned {status}: {text}"
            )));
        }

        let payload: Value = response.json().await?;
        let message = payload
            .pointer("/choices/0/message")
            .ok_or_else(|| IngestError::Classification("response has no choices".to_string()))?;

        if let Some(refusal) = message.get("refusal").and_then(Value::as_str) {
            return Err(IngestError::Classification(format!("model refused: {refusal}")));
        }

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| IngestError::Classification("message has no content".to_string()))?;

        serde_json::from_str(content).map_err(|error| {
            IngestError::Classification(format!("model returned non-JSON content: {error}"))
        })
    }
}
