//! LLM-backed classification of whole documents and individual chunks.
//!
//! Whole-document classification failing is fatal for the file; tagging is
//! requested per chunk and its failures are left to the caller to isolate.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::models::{FileMeta, FileRecord, PipelineOptions};
use crate::traits::{parse_structured, StructuredLlm};

const DOCUMENT_SCHEMA_NAME: &str = "document_classification";
const TAGS_SCHEMA_NAME: &str = "chunk_tags";

#[derive(Debug, Clone, Deserialize)]
struct DocumentClassification {
    #[serde(rename = "type", default)]
    doc_type: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    effective_from: Option<String>,
    #[serde(default)]
    effective_to: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    department: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkTags {
    #[serde(default)]
    tags: Vec<String>,
}

fn nullable_string(description: &str) -> Value {
    json!({"type": ["string", "null"], "description": description})
}

fn document_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["type", "description", "effective_from", "effective_to", "author", "department"],
        "properties": {
            "type": {"type": "string", "description": "Kind of document, e.g. invoice, contract, report."},
            "description": {"type": "string", "description": "One sentence summary of the document."},
            "effective_from": nullable_string("ISO 8601 date the document becomes valid, null if unknown."),
            "effective_to": nullable_string("ISO 8601 date the document stops being valid, null if open ended."),
            "author": nullable_string("Author of the document, null if it cannot be identified."),
            "department": nullable_string("Department the document belongs to, null if general.")
        }
    })
}

fn tags_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["tags"],
        "properties": {
            "tags": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Short topical tags for the passage."
            }
        }
    })
}

fn document_prompt(now: DateTime<Utc>) -> String {
    format!(
        "## Role\n\
         You are a document analyzer. Read the document and extract its metadata.\n\n\
         ## Requirements\n\
         - Identify the author. Answer null when it cannot be identified.\n\
         - Identify the document type (invoice, contract, report, ...).\n\
         - Identify the validity period. Answer null for unknown bounds.\n\
         - Identify the owning department. Answer null for general documents.\n\n\
         ## Current time\n{}",
        now.to_rfc3339()
    )
}

const TAGS_PROMPT: &str = "## Role\n\
    You are a document analyzer. Read the passage and extract its topics.\n\n\
    ## Requirements\n\
    - Return the list of tags that best describe the passage.";

pub struct MetadataExtractor<L> {
    llm: L,
    options: PipelineOptions,
}

impl<L> MetadataExtractor<L>
where
    L: StructuredLlm,
{
    pub fn new(llm: L, options: PipelineOptions) -> Self {
        Self { llm, options }
    }

    /// Classifies the file from the text of its first page.
    pub async fn classify_document(
        &self,
        first_page: &str,
        file: &FileRecord,
    ) -> Result<FileMeta, IngestError> {
        let now = Utc::now();
        let classification: DocumentClassification = parse_structured(
            &self.llm,
            &document_prompt(now),
            first_page,
            DOCUMENT_SCHEMA_NAME,
            &document_schema(),
        )
        .await?;
        debug!(file_id = %file.file_id, doc_type = %classification.doc_type, "document classified");

        let effective_from = classification
            .effective_from
            .as_deref()
            .and_then(|raw| parse_date(raw, &file.file_id))
            .unwrap_or(now);
        let effective_to = classification
            .effective_to
            .as_deref()
            .and_then(|raw| parse_date(raw, &file.file_id))
            .unwrap_or(self.options.indefinite_effective_to);

        if effective_from > effective_to {
            return Err(IngestError::InvalidDocument(format!(
                "effective window is inverted for {}: {effective_from} > {effective_to}",
                file.file_id
            )));
        }

        Ok(FileMeta {
            file_id: file.file_id.clone(),
            file_path: file.file_path.clone(),
            file_name: file.file_name.clone(),
            extension: file.extension.clone(),
            doc_type: classification.doc_type,
            description: classification.description,
            effective_from,
            effective_to,
            author: non_blank(classification.author)
                .unwrap_or_else(|| self.options.default_author.clone()),
            department: non_blank(classification.department)
                .unwrap_or_else(|| self.options.default_department.clone()),
        })
    }

    pub async fn tag_chunk(&self, chunk: &str) -> Result<Vec<String>, IngestError> {
        let tags: ChunkTags =
            parse_structured(&self.llm, TAGS_PROMPT, chunk, TAGS_SCHEMA_NAME, &tags_schema())
                .await?;

        Ok(tags
            .tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("unknown"))
}

/// Accepts RFC 3339 timestamps, naive timestamps and plain dates.
fn parse_date(raw: &str, file_id: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        });

    if parsed.is_none() {
        warn!(file_id = %file_id, value = %raw, "ignoring unparseable effective date");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        answers: Mutex<Vec<Result<Value, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(answers: Vec<Result<Value, String>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StructuredLlm for ScriptedLlm {
        async fn complete_structured(
            &self,
            _system_prompt: &str,
            user_content: &str,
            _schema_name: &str,
            _schema: &Value,
        ) -> Result<Value, IngestError> {
            self.prompts.lock().expect("lock").push(user_content.to_string());
            self.answers
                .lock()
                .expect("lock")
                .remove(0)
                .map_err(IngestError::Classification)
        }
    }

    fn file() -> FileRecord {
        FileRecord {
            file_id: "file-1".to_string(),
            file_path: "rag/handbook.pdf".to_string(),
            file_name: "handbook.pdf".to_string(),
            extension: "pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_fields_fall_back_to_configured_defaults() {
        let llm = ScriptedLlm::new(vec![Ok(json!({
            "type": "handbook",
            "description": "Employee handbook",
            "effective_from": null,
            "effective_to": null,
            "author": null,
            "department": ""
        }))]);
        let options = PipelineOptions::default();
        let extractor = MetadataExtractor::new(llm, options.clone());

        let before = Utc::now();
        let meta = extractor
            .classify_document("first page", &file())
            .await
            .expect("classification succeeds");

        assert_eq!(meta.doc_type, "handbook");
        assert_eq!(meta.author, "unknown");
        assert_eq!(meta.department, "Common");
        assert!(meta.effective_from >= before);
        assert_eq!(meta.effective_to, options.indefinite_effective_to);
        assert_eq!(meta.file_name, "handbook.pdf");
    }

    #[tokio::test]
    async fn plain_dates_are_accepted_and_inverted_windows_rejected() {
        let llm = ScriptedLlm::new(vec![
            Ok(json!({
                "type": "notice",
                "description": "Recruiting notice",
                "effective_from": "2025-03-01",
                "effective_to": "2025-06-30T18:00:00Z",
                "author": "HR team",
                "department": "HR"
            })),
            Ok(json!({
                "type": "notice",
                "description": "Broken",
                "effective_from": "2025-06-30",
                "effective_to": "2025-03-01",
                "author": null,
                "department": null
            })),
        ]);
        let extractor = MetadataExtractor::new(llm, PipelineOptions::default());

        let meta = extractor
            .classify_document("page", &file())
            .await
            .expect("classification succeeds");
        assert_eq!(meta.effective_from.to_rfc3339(), "2025-03-01T00:00:00+00:00");
        assert_eq!(meta.department, "HR");

        let inverted = extractor.classify_document("page", &file()).await;
        assert!(matches!(inverted, Err(IngestError::InvalidDocument(_))));
    }

    #[tokio::test]
    async fn tags_are_requested_with_chunk_text() {
        let llm = ScriptedLlm::new(vec![
            Ok(json!({"tags": [" AI ", "", "report"]})),
            Err("timeout".to_string()),
        ]);
        let extractor = MetadataExtractor::new(llm, PipelineOptions::default());

        let tags = extractor.tag_chunk("## Intro\nchunk body").await.expect("tags");
        assert_eq!(tags, vec!["AI".to_string(), "report".to_string()]);
        assert!(extractor.tag_chunk("second").await.is_err());

        let prompts = extractor.llm.prompts.lock().expect("lock").clone();
        assert_eq!(prompts, vec!["## Intro\nchunk body".to_string(), "second".to_string()]);
    }
}
