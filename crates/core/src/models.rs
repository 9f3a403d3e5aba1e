use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::SearchError;

pub const DEFAULT_VECTOR_DIMENSIONS: usize = 1536;

/// Whole-file metadata shared by every chunk cut from that file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMeta {
    pub file_id: String,
    pub file_path: String,
    pub file_name: String,
    #[serde(default)]
    pub extension: String,
    #[serde(rename = "type", default)]
    pub doc_type: String,
    #[serde(default)]
    pub description: String,
    pub effective_from: DateTime<Utc>,
    pub effective_to: DateTime<Utc>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub department: String,
}

impl FileMeta {
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_from <= at && at <= self.effective_to
    }
}

/// Position of a chunk's page inside its file. `number` is zero based.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMeta {
    pub number: i64,
    pub total_pages: i64,
    pub prev: i64,
    pub next: i64,
}

impl PageMeta {
    pub fn new(number: usize, total_pages: usize) -> Self {
        let number = number as i64;
        let total_pages = total_pages as i64;
        Self {
            number,
            total_pages,
            prev: if number > 0 { number - 1 } else { -1 },
            next: if number + 1 < total_pages {
                number + 1
            } else {
                -1
            },
        }
    }
}

/// One indexable chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub document_id: String,
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub file_meta: FileMeta,
    pub page_meta: PageMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        content: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
        file_meta: FileMeta,
        page_meta: PageMeta,
    ) -> Self {
        let now = Utc::now();
        Self {
            document_id: format!("doc-{}", uuid::Uuid::new_v4()),
            content: content.into(),
            tags: tags.into_iter().collect(),
            file_meta,
            page_meta,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The persisted projection of a [`Document`] in the hybrid index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    #[serde(flatten)]
    pub document: Document,
    pub vector: Vec<f32>,
    pub is_deleted: bool,
}

impl IndexRecord {
    pub fn new(document: Document, vector: Vec<f32>) -> Self {
        Self {
            document,
            vector,
            is_deleted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchFilter {
    pub top_k: usize,
    /// Accepted and validated, reserved for score thresholding.
    pub stride_score: f64,
    pub effective_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            top_k: 10,
            stride_score: 0.5,
            effective_at: Utc::now(),
            tags: Vec::new(),
        }
    }
}

impl SearchFilter {
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.top_k == 0 {
            return Err(SearchError::InvalidFilter(
                "top_k must be at least 1".to_string(),
            ));
        }
        if !(self.stride_score > 0.0 && self.stride_score < 1.0) {
            return Err(SearchError::InvalidFilter(format!(
                "stride_score {} is outside (0, 1)",
                self.stride_score
            )));
        }
        Ok(())
    }
}

/// Declared shape of the hybrid index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub dimensions: usize,
    pub text_analyzer: String,
}

impl Default for IndexSchema {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_VECTOR_DIMENSIONS,
            text_analyzer: "standard".to_string(),
        }
    }
}

/// Reading-ordered text of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Where a document to analyze lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Url(String),
    Path(PathBuf),
}

impl DocumentSource {
    pub fn location(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Path(path) => path.to_string_lossy().to_string(),
        }
    }
}

/// Caller-known facts about an uploaded file, before classification.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub file_id: String,
    pub file_path: String,
    pub file_name: String,
    pub extension: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub header_markers: Vec<String>,
    pub keep_first_header: bool,
    pub figure_canvas_width: usize,
    pub figure_canvas_height: usize,
    pub indefinite_effective_to: DateTime<Utc>,
    pub default_department: String,
    pub default_author: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            header_markers: vec!["##".to_string(), "###".to_string()],
            keep_first_header: true,
            figure_canvas_width: 60,
            figure_canvas_height: 20,
            indefinite_effective_to: end_of_day(9999, 12, 31),
            default_department: "Common".to_string(),
            default_author: "unknown".to_string(),
        }
    }
}

pub fn end_of_day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
