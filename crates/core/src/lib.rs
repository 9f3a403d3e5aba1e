pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod layout;
pub mod llm;
pub mod metadata;
pub mod models;
pub mod ocr;
pub mod query;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{split_by_headers, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, EmbeddingConfig, OpenAiEmbedder};
pub use error::{FailureKind, IngestError, SearchError};
pub use extractor::{AzureLayoutClient, OcrEndpointConfig, SavedLayoutReader};
pub use ingest::{
    discover_layout_files, file_id_for, file_record_for, FailedFile, FileIngestor, FolderReport,
    IngestionReport,
};
pub use layout::LayoutReconstructor;
pub use llm::{ChatConfig, OpenAiChat};
pub use metadata::MetadataExtractor;
pub use models::{
    Document, DocumentSource, FileMeta, FileRecord, FileStatus, IndexRecord, IndexSchema,
    PageMeta, PageText, PipelineOptions, SearchFilter,
};
pub use query::HybridQuery;
pub use store::VectorStore;
pub use stores::ElasticsearchIndex;
pub use traits::{Embedder, HybridIndex, LayoutSource, StructuredLlm};
