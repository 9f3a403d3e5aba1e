use thiserror::Error;

/// Coarse failure classes shared by ingestion and retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ExternalCall,
    Validation,
    NotFound,
    IndexState,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("layout OCR failed: {0}")]
    OcrFailed(String),

    #[error("llm classification failed: {0}")]
    Classification(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Store(#[from] SearchError),
}

impl IngestError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Io(_) | Self::Http(_) | Self::OcrFailed(_) | Self::Classification(_) => {
                FailureKind::ExternalCall
            }
            Self::Url(_) | Self::Json(_) | Self::InvalidDocument(_) | Self::InvalidArgument(_) => {
                FailureKind::Validation
            }
            Self::FileNotFound(_) => FailureKind::NotFound,
            Self::Store(error) => error.kind(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid search filter: {0}")]
    InvalidFilter(String),

    #[error("no documents matched the query")]
    NoResults,

    #[error("index {index} unavailable: {details}")]
    IndexState { index: String, details: String },
}

impl SearchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::BackendResponse { .. } | Self::Http(_) | Self::Embedding(_) => {
                FailureKind::ExternalCall
            }
            Self::Url(_)
            | Self::Serialization(_)
            | Self::DimensionMismatch { .. }
            | Self::InvalidFilter(_) => FailureKind::Validation,
            Self::NoResults => FailureKind::NotFound,
            Self::IndexState { .. } => FailureKind::IndexState,
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_kind_inside_ingest_errors() {
        let wrapped = IngestError::from(SearchError::NoResults);
        assert_eq!(wrapped.kind(), FailureKind::NotFound);

        let wrapped = IngestError::from(SearchError::IndexState {
            index: "documents".to_string(),
            details: "403".to_string(),
        });
        assert_eq!(wrapped.kind(), FailureKind::IndexState);
    }

    #[test]
    fn classification_is_an_external_call_failure() {
        let error = IngestError::Classification("timeout".to_string());
        assert_eq!(error.kind(), FailureKind::ExternalCall);
    }
}
